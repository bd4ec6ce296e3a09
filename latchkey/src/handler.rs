use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::trace;

use crate::error::HandlerError;

/// What a handler hands back when invoked
pub enum Dispatch {
    /// Work continues asynchronously; the command waits for it before reopening
    Deferred(BoxFuture<'static, Result<(), HandlerError>>),
    /// Nothing left to wait for
    Done,
}

impl Dispatch {
    pub fn deferred<F>(future: F) -> Self
    where F: Future<Output = Result<(), HandlerError>> + Send + 'static {
        Dispatch::Deferred(future.boxed())
    }
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Deferred(_) => write!(f, "Dispatch::Deferred"),
            Dispatch::Done => write!(f, "Dispatch::Done"),
        }
    }
}

/// The work an [`AsyncCommand`](crate::AsyncCommand) performs for a parameter.
///
/// An `Err` returned from the call itself is a dispatch fault: it reaches the caller of
/// `execute`. An `Err` from the deferred future is reported through the execution token.
pub struct AsyncHandler<T>(Arc<dyn Fn(T) -> Result<Dispatch, HandlerError> + Send + Sync>);

impl<T> Clone for AsyncHandler<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: 'static> AsyncHandler<T> {
    /// Handler whose work is entirely asynchronous
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self(Arc::new(move |param| Ok(Dispatch::Deferred(f(param).boxed()))))
    }

    /// Handler that may fail, or finish outright, before returning
    pub fn from_dispatch<F>(f: F) -> Self
    where F: Fn(T) -> Result<Dispatch, HandlerError> + Send + Sync + 'static {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, param: T) -> Result<Dispatch, HandlerError> { (self.0)(param) }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandlerId(usize);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

pub(crate) struct Registered<T> {
    pub(crate) id: HandlerId,
    pub(crate) handler: AsyncHandler<T>,
}

impl<T> Clone for Registered<T> {
    fn clone(&self) -> Self { Self { id: self.id, handler: self.handler.clone() } }
}

/// Ordered, copy-on-write set of handlers.
///
/// Writers build a new list under the lock and swap the reference; readers take the current
/// `Arc` and iterate it without holding anything, so a snapshot never changes under them.
pub(crate) struct HandlerRegistry<T> {
    handlers: Mutex<Arc<Vec<Registered<T>>>>,
    next_id: AtomicUsize,
}

impl<T> HandlerRegistry<T> {
    pub fn new() -> Arc<Self> { Arc::new(Self { handlers: Mutex::new(Arc::new(Vec::new())), next_id: AtomicUsize::new(0) }) }

    pub fn add(self: &Arc<Self>, handler: AsyncHandler<T>) -> HandlerGuard<T> {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut current = self.handlers.lock().expect("handler registry lock poisoned");
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Registered { id, handler });
        *current = Arc::new(next);
        trace!("Registered handler {id}, {} now registered", current.len());
        HandlerGuard { registry: Arc::downgrade(self), id }
    }

    /// Removes the handler with this id from whatever the current list is. Returns whether it was present.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut current = self.handlers.lock().expect("handler registry lock poisoned");
        if !current.iter().any(|r| r.id == id) {
            return false;
        }
        let next: Vec<_> = current.iter().filter(|r| r.id != id).cloned().collect();
        *current = Arc::new(next);
        trace!("Removed handler {id}, {} remain", current.len());
        true
    }

    pub fn contains(&self, id: HandlerId) -> bool { self.handlers.lock().expect("handler registry lock poisoned").iter().any(|r| r.id == id) }

    pub fn snapshot(&self) -> Arc<Vec<Registered<T>>> { self.handlers.lock().expect("handler registry lock poisoned").clone() }

    pub fn len(&self) -> usize { self.handlers.lock().expect("handler registry lock poisoned").len() }
}

/// Registration token for one handler. Dropping it removes exactly that handler, no matter
/// what was added or removed in between.
pub struct HandlerGuard<T> {
    registry: Weak<HandlerRegistry<T>>,
    id: HandlerId,
}

impl<T> HandlerGuard<T> {
    pub fn id(&self) -> HandlerId { self.id }

    pub fn is_registered(&self) -> bool { self.registry.upgrade().is_some_and(|registry| registry.contains(self.id)) }

    /// Same as dropping the guard
    pub fn dispose(self) {}
}

impl<T> Drop for HandlerGuard<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl<T> std::fmt::Debug for HandlerGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("HandlerGuard").field("id", &self.id).finish() }
}
