use latchkey_signals::SignalError;
use thiserror::Error;

/// Error produced by a registered async handler, either while dispatching or later
pub type HandlerError = anyhow::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    /// The command, or the gate/trigger it operates on, has been disposed
    #[error("command has been disposed")]
    Disposed,

    /// A handler failed before producing a deferred result. The gate was reopened first.
    #[error("handler failed during dispatch: {0}")]
    HandlerFault(HandlerError),

    /// One or more deferred handler results failed. All siblings were still awaited.
    #[error("{} handler(s) failed: {}", .0.len(), first_message(.0))]
    HandlerFaults(Vec<HandlerError>),

    /// Completion could not finish inline and there was no runtime to drive it
    #[error("no async runtime available to drive command completion")]
    NoRuntime,

    /// The completion pipeline was dropped before it reported an outcome
    #[error("execution was abandoned before completion")]
    Abandoned,
}

fn first_message(errors: &[HandlerError]) -> String { errors.first().map(|e| e.to_string()).unwrap_or_default() }

impl From<SignalError> for CommandError {
    fn from(_: SignalError) -> Self { CommandError::Disposed }
}

impl CommandError {
    /// Handler errors carried by this error, if any
    pub fn handler_errors(&self) -> &[HandlerError] {
        match self {
            CommandError::HandlerFault(e) => std::slice::from_ref(e),
            CommandError::HandlerFaults(errors) => errors,
            _ => &[],
        }
    }
}
