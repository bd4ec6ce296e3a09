use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use tracing::trace;

use crate::{
    broadcast::{Listener, ListenerGuard, Subject},
    error::SignalError,
    observable::{Get, Observable},
};

/// Mutable (stateful) value that notifies listeners whenever it changes.
///
/// Writers hold a `Property`; code that should only observe gets a [`ReadProperty`]
/// via [`Property::read`]. Both share the same storage.
///
/// - `set` is a no-op when the new value equals the current one.
/// - Notifications are delivered in the order the values were stored, even across threads.
///   A write made while another thread (or a listener on this thread) is delivering is queued
///   and delivered by that drainer before it returns.
/// - Subscribing replays the current value immediately, then every change.
/// - After `dispose`, reads, writes and subscriptions fail with [`SignalError::Disposed`].
pub struct Property<T>(Arc<Inner<T>>);

/// Read-only view of a [`Property`]
pub struct ReadProperty<T>(Arc<Inner<T>>);

struct Inner<T> {
    state: RwLock<State<T>>,
    subject: Subject<T>,
    outbox: Mutex<Outbox<T>>,
}

/// Stored values awaiting delivery, in store order
struct Outbox<T> {
    queue: VecDeque<T>,
    draining: bool,
}

/// Clears the draining flag if a listener panics mid-delivery, so later writes still notify
struct Drain<'a, T>(&'a Mutex<Outbox<T>>);

impl<T> Drop for Drain<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if let Ok(mut outbox) = self.0.lock() {
                outbox.draining = false;
            }
        }
    }
}

struct State<T> {
    value: T,
    disposed: bool,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Clone for ReadProperty<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Inner<T> {
    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, SignalError> {
        let state = self.state.read().expect("property lock poisoned");
        if state.disposed {
            return Err(SignalError::Disposed);
        }
        Ok(f(&state.value))
    }

    fn is_disposed(&self) -> bool { self.state.read().expect("property lock poisoned").disposed }
}

impl<T: Clone> Inner<T> {
    /// Queue a freshly stored value. Must be called with the state write lock held.
    fn enqueue(&self, value: T) { self.outbox.lock().expect("property outbox lock poisoned").queue.push_back(value); }

    /// Deliver queued values in order, unless another caller is already doing so
    fn deliver(&self) {
        {
            let mut outbox = self.outbox.lock().expect("property outbox lock poisoned");
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        let _drain = Drain(&self.outbox);
        loop {
            let next = {
                let mut outbox = self.outbox.lock().expect("property outbox lock poisoned");
                match outbox.queue.pop_front() {
                    Some(value) => value,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.subject.emit(next);
        }
    }

    fn listen(&self, listener: Listener<T>) -> Result<ListenerGuard<T>, SignalError> {
        let (guard, current) = {
            let state = self.state.read().expect("property lock poisoned");
            if state.disposed {
                return Err(SignalError::Disposed);
            }
            (self.subject.listen(listener.clone())?, state.value.clone())
        };
        // A set racing with this subscription may be delivered ahead of the replay.
        listener.next(current);
        Ok(guard)
    }
}

impl<T> Property<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(Inner {
            state: RwLock::new(State { value, disposed: false }),
            subject: Subject::new(),
            outbox: Mutex::new(Outbox { queue: VecDeque::new(), draining: false }),
        }))
    }

    /// Readonly view sharing this property's storage
    pub fn read(&self) -> ReadProperty<T> { ReadProperty(self.0.clone()) }

    /// Calls a closure with a borrow of the current value
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, SignalError> { self.0.with(f) }

    /// Completes and detaches all listeners, then refuses further access. Idempotent.
    pub fn dispose(&self) {
        {
            let mut state = self.0.state.write().expect("property lock poisoned");
            if state.disposed {
                return;
            }
            state.disposed = true;
        }
        trace!("Property({}) disposed", self.0.subject.id());
        self.0.subject.dispose();
    }

    pub fn is_disposed(&self) -> bool { self.0.is_disposed() }

    pub fn listener_count(&self) -> usize { self.0.subject.listener_count() }

    /// True when both handles refer to the same storage
    pub fn ptr_eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl<T> Property<T>
where T: Clone + PartialEq
{
    /// Assigns a new value. Listeners are notified, in subscription order, only if the value
    /// differs from the previous one. Returns whether a change happened.
    pub fn set(&self, value: T) -> Result<bool, SignalError> {
        {
            let mut state = self.0.state.write().expect("property lock poisoned");
            if state.disposed {
                return Err(SignalError::Disposed);
            }
            if state.value == value {
                return Ok(false);
            }
            state.value = value.clone();
            self.0.enqueue(value);
        }
        self.0.deliver();
        Ok(true)
    }

    /// Writes `value` only if the current value equals `expected`; the check and the write
    /// happen under one lock. Returns whether the write happened.
    pub fn compare_and_set(&self, expected: &T, value: T) -> Result<bool, SignalError> {
        {
            let mut state = self.0.state.write().expect("property lock poisoned");
            if state.disposed {
                return Err(SignalError::Disposed);
            }
            if state.value != *expected {
                return Ok(false);
            }
            if state.value == value {
                return Ok(true);
            }
            state.value = value.clone();
            self.0.enqueue(value);
        }
        self.0.deliver();
        Ok(true)
    }
}

impl<T> ReadProperty<T> {
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, SignalError> { self.0.with(f) }

    pub fn is_disposed(&self) -> bool { self.0.is_disposed() }
}

impl<T: Clone> Get<T> for Property<T> {
    fn get(&self) -> Result<T, SignalError> { self.0.with(T::clone) }
}

impl<T: Clone> Get<T> for ReadProperty<T> {
    fn get(&self) -> Result<T, SignalError> { self.0.with(T::clone) }
}

impl<T: Clone> Observable<T> for Property<T> {
    fn listen(&self, listener: Listener<T>) -> Result<ListenerGuard<T>, SignalError> { self.0.listen(listener) }
}

impl<T: Clone> Observable<T> for ReadProperty<T> {
    fn listen(&self, listener: Listener<T>) -> Result<ListenerGuard<T>, SignalError> { self.0.listen(listener) }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.read().expect("property lock poisoned");
        f.debug_struct("Property").field("value", &state.value).field("disposed", &state.disposed).finish()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReadProperty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.read().expect("property lock poisoned");
        f.debug_struct("ReadProperty").field("value", &state.value).field("disposed", &state.disposed).finish()
    }
}

impl<T: std::fmt::Display> std::fmt::Display for ReadProperty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.with(|v| write!(f, "{}", v)) {
            Ok(result) => result,
            Err(_) => write!(f, "<disposed>"),
        }
    }
}
