pub mod distinct;
#[cfg(feature = "tokio")]
pub mod wait;

pub use distinct::*;
#[cfg(feature = "tokio")]
pub use wait::*;
