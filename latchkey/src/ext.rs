use latchkey_signals::Observable;

use crate::{
    async_command::AsyncCommand,
    command::Command,
    error::CommandError,
    gate::Gate,
    scheduler::Scheduler,
};

/// Build a [`Command`] whose gate follows this boolean source
pub trait ToCommand {
    fn to_command<T>(&self, initial: bool) -> Result<Command<T>, CommandError>
    where T: Clone + Send + 'static;
}

impl<S> ToCommand for S
where S: Observable<bool> + ?Sized
{
    fn to_command<T>(&self, initial: bool) -> Result<Command<T>, CommandError>
    where T: Clone + Send + 'static {
        Command::with_source(self, initial)
    }
}

/// Build an [`AsyncCommand`] sharing this gate
pub trait ToAsyncCommand {
    fn to_async_command<T>(&self) -> AsyncCommand<T>
    where T: Clone + 'static;

    fn to_throttled_async_command<T>(&self, ticks: u64, scheduler: impl Scheduler + 'static) -> AsyncCommand<T>
    where T: Clone + 'static;
}

impl ToAsyncCommand for Gate {
    fn to_async_command<T>(&self) -> AsyncCommand<T>
    where T: Clone + 'static {
        AsyncCommand::with_gate(self.clone())
    }

    fn to_throttled_async_command<T>(&self, ticks: u64, scheduler: impl Scheduler + 'static) -> AsyncCommand<T>
    where T: Clone + 'static {
        AsyncCommand::with_throttle(self.clone(), ticks, scheduler)
    }
}
