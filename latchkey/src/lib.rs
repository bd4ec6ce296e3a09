/*!
Gated reactive commands

A [`Command`] is a trigger guarded by a boolean gate: `execute` only reaches subscribers while
the gate is open. An [`AsyncCommand`] runs a set of async handlers and keeps its gate closed
while they are in flight, so the same command cannot overlap itself. Async commands built on
clones of one [`Gate`] exclude each other.

The gate is exposed read-only through `can_execute()`, which UI code can observe to enable or
disable whatever invokes the command.

# Basic usage

```rust
use latchkey::*;

let form_valid = Property::new(false);
let submit: Command<String> = form_valid.to_command(false).unwrap();
let _guard = submit.subscribe(|name| println!("submitting {name}")).unwrap();

assert!(!submit.execute("ignored".into()).unwrap());
form_valid.set(true).unwrap();
assert!(submit.execute("Buffy".into()).unwrap());
```

# Async commands

```rust
use latchkey::*;

# #[tokio::main(flavor = "current_thread")]
# async fn main() -> Result<(), CommandError> {
let save = AsyncCommand::<u32>::new();
let _handler = save.subscribe_fn(|id| async move {
    println!("saving {id}");
    Ok(())
})?;

let execution = save.execute(7)?;
assert!(execution.is_started());
execution.wait().await?;
assert!(save.can_execute().get()?);
# Ok(())
# }
```
*/

mod async_command;
mod command;
mod error;
mod execution;
mod ext;
mod gate;
mod handler;
mod scheduler;
pub mod task;

pub use async_command::*;
pub use command::*;
pub use error::*;
pub use execution::*;
pub use ext::*;
pub use gate::*;
pub use handler::{AsyncHandler, Dispatch, HandlerGuard, HandlerId};
pub use scheduler::*;

pub use latchkey_signals as signals;
pub use latchkey_signals::{Get, Listener, ListenerGuard, Observable, Observer, Property, ReadProperty, SignalError, Subject, Wait};
