use crate::{
    broadcast::{Listener, ListenerGuard},
    error::SignalError,
};

/// Receives values pushed by a subject or property, plus an end-of-stream notice.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: T);

    /// Called once when the source completes or is disposed
    fn on_completed(&self) {}
}

/// Core trait for anything that pushes values to registered listeners.
///
/// Implemented by [`Subject`](crate::Subject), [`Property`](crate::Property) and
/// [`ReadProperty`](crate::ReadProperty), and by the command triggers built on top of them.
pub trait Observable<T> {
    /// Register a listener. Dropping the returned guard removes exactly that listener.
    fn listen(&self, listener: Listener<T>) -> Result<ListenerGuard<T>, SignalError>;

    /// Subscribe a closure that receives each pushed value
    fn subscribe<F>(&self, f: F) -> Result<ListenerGuard<T>, SignalError>
    where
        F: Fn(T) + Send + Sync + 'static,
        Self: Sized,
    {
        self.listen(Listener::payload(f))
    }
}

/// Synchronous read of a present value
pub trait Get<T> {
    fn get(&self) -> Result<T, SignalError>;
}
