use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    /// The property or subject was disposed; reads, writes and new subscriptions are refused
    #[error("signal has been disposed")]
    Disposed,
    /// The source completed before the awaited value arrived
    #[error("signal completed")]
    Completed,
}
