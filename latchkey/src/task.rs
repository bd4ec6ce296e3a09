use futures::future::BoxFuture;

use crate::error::CommandError;

/// Spawn a task onto the ambient tokio runtime
pub fn spawn(task: BoxFuture<'static, ()>) -> Result<(), CommandError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| CommandError::NoRuntime)?;
    handle.spawn(task);
    Ok(())
}
