use latchkey_signals::{Get, Listener, ListenerGuard, Observable, Property, ReadProperty, SignalError};

use crate::error::CommandError;

/// The boolean that decides whether a command may run.
///
/// Clones share one underlying property, so async commands built on clones of the same
/// gate exclude each other: while one is running, the others see the gate closed.
/// A gate is owned by no single command; whoever created it decides when to dispose it.
#[derive(Clone, Debug)]
pub struct Gate(Property<bool>);

impl Default for Gate {
    fn default() -> Self { Self::new(true) }
}

impl Gate {
    pub fn new(open: bool) -> Self { Self(Property::new(open)) }

    pub fn is_open(&self) -> Result<bool, CommandError> { Ok(self.0.get()?) }

    /// Atomically flips the gate from open to closed. Returns false if it was already closed,
    /// in which case nothing changes.
    pub fn try_close(&self) -> Result<bool, CommandError> { Ok(self.0.compare_and_set(&true, false)?) }

    pub fn reopen(&self) -> Result<(), CommandError> {
        self.0.set(true)?;
        Ok(())
    }

    /// Returns whether the value changed
    pub fn set(&self, open: bool) -> Result<bool, CommandError> { Ok(self.0.set(open)?) }

    /// Observable, read-only view of the gate (`CanExecute`)
    pub fn read(&self) -> ReadProperty<bool> { self.0.read() }

    pub fn dispose(&self) { self.0.dispose() }

    pub fn is_disposed(&self) -> bool { self.0.is_disposed() }

    /// True when both handles refer to the same shared gate
    pub fn shares_with(&self, other: &Gate) -> bool { self.0.ptr_eq(&other.0) }
}

impl From<Property<bool>> for Gate {
    fn from(property: Property<bool>) -> Self { Self(property) }
}

impl Get<bool> for Gate {
    fn get(&self) -> Result<bool, SignalError> { self.0.get() }
}

impl Observable<bool> for Gate {
    fn listen(&self, listener: Listener<bool>) -> Result<ListenerGuard<bool>, SignalError> { self.0.listen(listener) }
}
