/*!
Reactive substrate for latchkey commands

# Design requirements:
- Writers and readers are different types: a [`Property`] can be written, a [`ReadProperty`] can only be read and observed
- Subjects deliver to a snapshot of their listeners, so listeners may subscribe and unsubscribe from inside a callback
- No lock is held while a listener runs
- Every subscription hands back a guard; dropping the guard removes exactly that listener

# Nomenclature:
- `subscribe` on a [`Property`] immediately calls the closure with the current value, and also with future changes
- `subscribe` on a [`Subject`] only calls the closure for values emitted after subscribing

# Basic usage

```rust
use latchkey_signals::*;

let signal = Property::new(42);
let _guard = signal.read().subscribe(|value: i32| println!("Read value: {}", value)).unwrap();
signal.set(43).unwrap();
// Should print:
// Read value: 42
// Read value: 43
```

# Subjects

```rust
use latchkey_signals::*;

let clicks = Subject::<u32>::new();
let guard = clicks.subscribe(|n| println!("clicked {n}")).unwrap();
clicks.emit(1);
drop(guard);
clicks.emit(2); // nobody is listening
clicks.complete();
```
*/

mod broadcast;
mod error;
mod observable;
pub mod porcelain;
mod property;

pub use broadcast::*;
pub use error::*;
pub use observable::*;
pub use porcelain::*;
pub use property::*;
