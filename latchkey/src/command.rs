use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use latchkey_signals::{Listener, ListenerGuard, Observable, ReadProperty, SignalError, Subject, Wait, distinct_until_changed};
use tracing::{debug, trace};

use crate::{error::CommandError, gate::Gate};

/// A gated trigger. `execute` pushes its parameter to subscribers only while the gate is open.
///
/// The gate is either fixed open, or follows an external `Observable<bool>` (validation state,
/// connectivity, ...) with consecutive duplicates filtered out.
///
/// `execute` reads the gate and then emits; the two steps are not atomic. A concurrent gate
/// change between them is resolved last-writer-wins. The command never writes its own gate
/// from `execute`, so a race can at worst let one emission through just as the gate closes.
pub struct Command<T> {
    gate: Gate,
    trigger: Subject<T>,
    gate_subscription: Mutex<Option<ListenerGuard<bool>>>,
    disposed: AtomicBool,
}

impl<T> Command<T>
where T: Clone + Send + 'static
{
    /// A command whose gate is always open
    pub fn new() -> Self { Self::from_parts(Gate::new(true), None) }

    /// A command whose gate starts at `initial` and then follows `source`
    pub fn with_source<S>(source: &S, initial: bool) -> Result<Self, CommandError>
    where S: Observable<bool> + ?Sized {
        let gate = Gate::new(initial);
        let subscription = {
            let gate = gate.clone();
            source.listen(distinct_until_changed(Listener::payload(move |open: bool| {
                if let Err(e) = gate.set(open) {
                    trace!("Command gate ignored source value {open}: {e}");
                }
            })))?
        };
        Ok(Self::from_parts(gate, Some(subscription)))
    }

    fn from_parts(gate: Gate, gate_subscription: Option<ListenerGuard<bool>>) -> Self {
        Self { gate, trigger: Subject::new(), gate_subscription: Mutex::new(gate_subscription), disposed: AtomicBool::new(false) }
    }

    /// Emits `parameter` if the gate is open. Returns whether it was emitted.
    pub fn execute(&self, parameter: T) -> Result<bool, CommandError> {
        if self.is_disposed() {
            return Err(CommandError::Disposed);
        }
        if !self.gate.is_open()? {
            trace!("Command gate closed, not emitting");
            return Ok(false);
        }
        self.trigger.emit(parameter);
        Ok(true)
    }

    /// Emits `parameter` regardless of the gate
    pub fn force_execute(&self, parameter: T) -> Result<(), CommandError> {
        if self.is_disposed() {
            return Err(CommandError::Disposed);
        }
        self.trigger.emit(parameter);
        Ok(())
    }

    /// Resolves with the next parameter this command emits
    pub async fn wait_until_execute(&self) -> Result<T, CommandError> {
        Ok(self.wait_for(|parameter: &T| Some(parameter.clone())).await?)
    }
}

impl<T> Command<T> {
    /// Observable, read-only gate (`CanExecute`)
    pub fn can_execute(&self) -> ReadProperty<bool> { self.gate.read() }

    pub fn is_disposed(&self) -> bool { self.disposed.load(Ordering::SeqCst) }

    /// Closes the gate for good, completes subscribers and releases the source subscription.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate.dispose();
        self.trigger.complete();
        self.trigger.dispose();
        self.gate_subscription.lock().expect("gate subscription lock poisoned").take();
        debug!("Command disposed");
    }
}

impl<T> Observable<T> for Command<T> {
    fn listen(&self, listener: Listener<T>) -> Result<ListenerGuard<T>, SignalError> { self.trigger.listen(listener) }
}

impl<T: Clone + Send + 'static> Default for Command<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Drop for Command<T> {
    fn drop(&mut self) { self.dispose(); }
}

impl<T> std::fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("gate", &self.gate)
            .field("listeners", &self.trigger.listener_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
