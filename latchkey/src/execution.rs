use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::{CommandError, HandlerError};

/// Token for one call to [`AsyncCommand::execute`](crate::AsyncCommand::execute).
///
/// Dropping it only stops observing the outcome. Handlers keep running and the gate is
/// reopened regardless.
#[must_use = "dropping an Execution discards its outcome"]
pub struct Execution {
    state: State,
}

enum State {
    /// The gate was closed, nothing ran
    Skipped,
    Running(oneshot::Receiver<Vec<HandlerError>>),
    Ready(Vec<HandlerError>),
    Abandoned,
}

impl Execution {
    pub(crate) fn skipped() -> Self { Self { state: State::Skipped } }

    pub(crate) fn running(rx: oneshot::Receiver<Vec<HandlerError>>) -> Self { Self { state: State::Running(rx) } }

    /// Whether `execute` got past the gate and dispatched to handlers
    pub fn is_started(&self) -> bool { !matches!(self.state, State::Skipped) }

    /// True once every handler has finished and the gate has been reopened (or nothing ran)
    pub fn is_complete(&mut self) -> bool {
        if let State::Running(rx) = &mut self.state {
            match rx.try_recv() {
                Ok(faults) => self.state = State::Ready(faults),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => self.state = State::Abandoned,
            }
        }
        !matches!(self.state, State::Running(_))
    }

    /// Resolves after all handlers finished and the gate was reopened. Deferred handler
    /// failures are reported here as [`CommandError::HandlerFaults`].
    pub async fn wait(self) -> Result<(), CommandError> {
        let faults = match self.state {
            State::Skipped => return Ok(()),
            State::Abandoned => return Err(CommandError::Abandoned),
            State::Ready(faults) => faults,
            State::Running(rx) => rx.await.map_err(|_| CommandError::Abandoned)?,
        };
        if faults.is_empty() { Ok(()) } else { Err(CommandError::HandlerFaults(faults)) }
    }

    /// Same as dropping the token
    pub fn dispose(self) {}
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Skipped => "skipped",
            State::Running(_) => "running",
            State::Ready(faults) if faults.is_empty() => "complete",
            State::Ready(_) => "faulted",
            State::Abandoned => "abandoned",
        };
        f.debug_struct("Execution").field("state", &state).finish()
    }
}
