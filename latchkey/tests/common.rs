use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    // if LOG_LEVEL env var is set, use it
    let level = std::env::var("LOG_LEVEL").ok().and_then(|level| Level::from_str(&level).ok()).unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).with_test_writer().init();
}

/// A recording listener and a function that drains what it has recorded so far
#[allow(unused)]
pub fn change_watcher<T: Send + 'static>() -> (impl Fn(T) + Send + Sync + 'static, impl Fn() -> Vec<T> + Send + Sync + 'static) {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let watcher = {
        let changes = changes.clone();
        move |value: T| changes.lock().unwrap().push(value)
    };
    let check = move || changes.lock().unwrap().drain(..).collect::<Vec<T>>();
    (watcher, check)
}

/// Let spawned completion pipelines run on the current-thread test runtime
#[allow(unused)]
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
