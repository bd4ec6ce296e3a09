use crate::{broadcast::Listener, error::SignalError, observable::Observable};

/// Helper trait for `wait_for` to allow flexible predicate return types.
///
/// ## Semantics
/// - `result()` returns `Some(output)` to stop waiting and return `output`
/// - `result()` returns `None` to continue waiting for the next value
pub trait WaitResult {
    type Output;
    /// Returns Some(output) if we should stop waiting, None if we should continue
    fn result(self) -> Option<Self::Output>;
}

// true = stop with (), false = continue waiting
impl WaitResult for bool {
    type Output = ();
    fn result(self) -> Option<Self::Output> { if self { Some(()) } else { None } }
}

// Some(value) = stop with value, None = continue waiting
impl<T> WaitResult for Option<T> {
    type Output = T;
    fn result(self) -> Option<Self::Output> { self }
}

/// Trait for waiting on pushed values asynchronously.
///
/// Properties replay their current value on subscription, so waiting on a property that
/// already holds a matching value resolves immediately. Subjects only match later emits.
/// Fails with [`SignalError::Completed`] if the source completes first.
pub trait Wait<T: 'static> {
    /// Wait for the source to push a specific value
    fn wait_value(&self, target_value: T) -> impl std::future::Future<Output = Result<(), SignalError>> + Send
    where T: PartialEq + Send + Sync;

    /// Wait for the source to push a value matching the given predicate
    fn wait_for<F, R>(&self, predicate: F) -> impl std::future::Future<Output = Result<R::Output, SignalError>> + Send
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: WaitResult;
}

impl<T, S> Wait<T> for S
where
    S: Observable<T> + Sync,
    T: Send + 'static,
{
    fn wait_value(&self, target_value: T) -> impl std::future::Future<Output = Result<(), SignalError>> + Send
    where T: PartialEq + Send + Sync {
        self.wait_for(move |value| *value == target_value)
    }

    fn wait_for<F, R>(&self, predicate: F) -> impl std::future::Future<Output = Result<R::Output, SignalError>> + Send
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: WaitResult,
    {
        // Bridge the synchronous listener to async through a channel
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let subscription = self.listen(Listener::channel(tx));

        async move {
            let _guard = subscription?;
            while let Some(value) = rx.recv().await {
                if let Some(result) = predicate(&value).result() {
                    return Ok(result);
                }
            }
            Err(SignalError::Completed)
        }
    }
}
