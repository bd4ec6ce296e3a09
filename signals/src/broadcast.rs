use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::trace;

use crate::{
    error::SignalError,
    observable::{Observable, Observer},
};

/// A unique identifier for a subject that cannot be forged or extracted.
/// Can only be created by a Subject and used for deduplication/comparison.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubjectId(usize);

impl From<SubjectId> for usize {
    fn from(id: SubjectId) -> Self { id.0 }
}
impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// A listener that is called when a subject pushes a value.
/// Payload and notify-only listeners ignore completion; observers receive it.
pub enum Listener<T> {
    /// Full listener receives the pushed value
    Payload(Arc<dyn Fn(T) + Send + Sync + 'static>),
    /// Unit listener only receives notification, ignores the value
    NotifyOnly(Arc<dyn Fn() + Send + Sync + 'static>),
    /// Receives values and the end-of-stream notice
    Observer(Arc<dyn Observer<T>>),
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        match self {
            Listener::Payload(f) => Listener::Payload(f.clone()),
            Listener::NotifyOnly(f) => Listener::NotifyOnly(f.clone()),
            Listener::Observer(o) => Listener::Observer(o.clone()),
        }
    }
}

impl<T> Listener<T> {
    pub fn payload<F>(f: F) -> Self
    where F: Fn(T) + Send + Sync + 'static {
        Listener::Payload(Arc::new(f))
    }

    pub fn notify_only<F>(f: F) -> Self
    where F: Fn() + Send + Sync + 'static {
        Listener::NotifyOnly(Arc::new(f))
    }

    pub fn observer<O>(observer: O) -> Self
    where O: Observer<T> + 'static {
        Listener::Observer(Arc::new(observer))
    }

    /// Forward every value into a tokio channel. Send errors are ignored; the
    /// sender is dropped when the source completes, which closes the channel.
    #[cfg(feature = "tokio")]
    pub fn channel(tx: tokio::sync::mpsc::UnboundedSender<T>) -> Self
    where T: Send + 'static {
        Listener::payload(move |value| {
            let _ = tx.send(value);
        })
    }

    pub fn std_channel(tx: std::sync::mpsc::Sender<T>) -> Self
    where T: Send + 'static {
        Listener::payload(move |value| {
            let _ = tx.send(value);
        })
    }

    pub(crate) fn next(&self, value: T) {
        match self {
            Listener::Payload(callback) => callback(value),
            Listener::NotifyOnly(callback) => callback(),
            Listener::Observer(observer) => observer.on_next(value),
        }
    }

    pub(crate) fn completed(&self) {
        if let Listener::Observer(observer) = self {
            observer.on_completed();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Live,
    Completed,
    Disposed,
}

/// A multicast push source. `emit` fans a value out to every listener registered at the
/// moment of the call; listeners added during delivery only see later values.
pub struct Subject<T>(Arc<Inner<T>>);

struct Inner<T> {
    registry: RwLock<Registry<T>>,
    next_id: AtomicUsize,
}

struct Registry<T> {
    status: Status,
    listeners: BTreeMap<usize, Listener<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Default for Subject<T> {
    fn default() -> Self { Self::new() }
}

impl<T> std::fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.0.registry.read().expect("subject registry lock poisoned");
        f.debug_struct("Subject").field("status", &registry.status).field("listeners", &registry.listeners.len()).finish()
    }
}

/// A subscription handle. Dropping it removes exactly the listener it was issued for.
pub struct ListenerGuard<T> {
    inner: Weak<Inner<T>>,
    id: usize,
}

impl<T> ListenerGuard<T> {
    /// A guard that owns no registration, handed out by sources that have already completed
    pub(crate) fn inert() -> Self { Self { inner: Weak::new(), id: usize::MAX } }

    /// Get the id of the subject this guard is subscribed to
    pub fn subject_id(&self) -> SubjectId {
        // A ListenerGuard does not keep the subject alive, but the address is
        // reserved until all Arc/Weak references are dropped.
        SubjectId(self.inner.as_ptr() as *const () as usize)
    }

    /// Whether the registration is still held by a live subject
    pub fn is_active(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.registry.read().expect("subject registry lock poisoned").listeners.contains_key(&self.id),
            None => false,
        }
    }
}

impl<T> Drop for ListenerGuard<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.registry.write().expect("subject registry lock poisoned").listeners.remove(&self.id);
        }
    }
}

impl<T> Subject<T> {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            registry: RwLock::new(Registry { status: Status::Live, listeners: BTreeMap::new() }),
            next_id: AtomicUsize::new(0),
        }))
    }

    /// Get the unique identifier for this subject
    pub fn id(&self) -> SubjectId { SubjectId(Arc::as_ptr(&self.0) as *const () as usize) }

    /// Signal end-of-stream to all listeners, then detach them. Later emits are ignored.
    pub fn complete(&self) { self.terminate(Status::Completed) }

    /// Completes the subject if it is still live and refuses any further subscriptions.
    /// Idempotent.
    pub fn dispose(&self) { self.terminate(Status::Disposed) }

    fn terminate(&self, status: Status) {
        let listeners = {
            let mut registry = self.0.registry.write().expect("subject registry lock poisoned");
            match registry.status {
                Status::Live => {}
                Status::Completed => {
                    if status == Status::Disposed {
                        registry.status = Status::Disposed;
                    }
                    return;
                }
                Status::Disposed => return,
            }
            registry.status = status;
            std::mem::take(&mut registry.listeners)
        };

        trace!("Subject({}) terminated as {:?}, completing {} listeners", self.id(), status, listeners.len());
        for listener in listeners.values() {
            listener.completed();
        }
    }

    pub fn is_completed(&self) -> bool { self.0.registry.read().expect("subject registry lock poisoned").status != Status::Live }

    pub fn is_disposed(&self) -> bool { self.0.registry.read().expect("subject registry lock poisoned").status == Status::Disposed }

    pub fn listener_count(&self) -> usize { self.0.registry.read().expect("subject registry lock poisoned").listeners.len() }

    pub fn has_listeners(&self) -> bool { self.listener_count() > 0 }
}

impl<T: Clone> Subject<T> {
    /// Sends a value to all listeners registered at the time of the call
    pub fn emit(&self, value: T) {
        // Snapshot the listeners so no lock is held while callbacks run
        let listeners = {
            let registry = self.0.registry.read().expect("subject registry lock poisoned");
            if registry.status != Status::Live {
                trace!("Subject({}) ignoring emit after completion", self.id());
                return;
            }
            registry.listeners.values().cloned().collect::<Vec<_>>()
        };

        // clone the value for each listener except the last one
        if let Some((last, rest)) = listeners.split_last() {
            for listener in rest {
                listener.next(value.clone());
            }
            last.next(value);
        }
    }
}

impl<T> Observable<T> for Subject<T> {
    fn listen(&self, listener: Listener<T>) -> Result<ListenerGuard<T>, SignalError> {
        let mut registry = self.0.registry.write().expect("subject registry lock poisoned");
        match registry.status {
            Status::Disposed => Err(SignalError::Disposed),
            Status::Completed => {
                drop(registry);
                listener.completed();
                Ok(ListenerGuard::inert())
            }
            Status::Live => {
                let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
                registry.listeners.insert(id, listener);
                Ok(ListenerGuard { inner: Arc::downgrade(&self.0), id })
            }
        }
    }
}
