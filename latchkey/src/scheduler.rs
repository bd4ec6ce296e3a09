use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::task::ArcWake;
use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::{error::CommandError, task};

/// Environment variable read by [`TokioScheduler::from_env`], in milliseconds
pub const TICK_ENV_VAR: &str = "LATCHKEY_TICK_MS";

/// One 60Hz frame
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);

/// Timing and task primitive consumed by async commands.
///
/// `delay` is used only to defer reopening a throttled gate. `spawn` drives completion
/// pipelines that could not finish inline.
pub trait Scheduler: Send + Sync {
    /// A future that resolves once `ticks` scheduling ticks have elapsed after this call
    fn delay(&self, ticks: u64) -> BoxFuture<'static, ()>;

    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), CommandError> { task::spawn(task) }
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn delay(&self, ticks: u64) -> BoxFuture<'static, ()> { (**self).delay(ticks) }

    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), CommandError> { (**self).spawn(task) }
}

/// Wall-clock ticks on the tokio timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokioScheduler {
    tick: Duration,
}

impl Default for TokioScheduler {
    fn default() -> Self { Self { tick: DEFAULT_TICK } }
}

impl TokioScheduler {
    pub fn new(tick: Duration) -> Self { Self { tick } }

    /// Tick length from `LATCHKEY_TICK_MS`, falling back to [`DEFAULT_TICK`]
    pub fn from_env() -> Self {
        match std::env::var(TICK_ENV_VAR) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Self::new(Duration::from_millis(ms)),
                Err(e) => {
                    warn!("Ignoring {TICK_ENV_VAR}={raw:?}: {e}");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn tick(&self) -> Duration { self.tick }

    fn duration(&self, ticks: u64) -> Duration {
        u32::try_from(ticks).ok().and_then(|n| self.tick.checked_mul(n)).unwrap_or(Duration::MAX)
    }
}

impl Scheduler for TokioScheduler {
    fn delay(&self, ticks: u64) -> BoxFuture<'static, ()> {
        if ticks == 0 {
            return futures::future::ready(()).boxed();
        }
        let duration = self.duration(ticks);
        // The sleep is created on first poll so that it binds to the runtime driving it
        async move { tokio::time::sleep(duration).await }.boxed()
    }
}

/// Virtual ticks that only advance when told to. Deterministic; meant for tests and for
/// hosts that drive their own frame loop.
///
/// Tasks handed to [`Scheduler::spawn`] are owned and polled by the scheduler itself, so no
/// async runtime is needed: they make progress inside `spawn`, [`advance`](Self::advance)
/// and [`run_until_stalled`](Self::run_until_stalled).
#[derive(Clone, Default)]
pub struct ManualScheduler(Arc<ManualInner>);

#[derive(Default)]
struct ManualInner {
    clock: Mutex<ManualClock>,
    /// Spawned but not yet adopted by the driver
    spawned: Mutex<Vec<BoxFuture<'static, ()>>>,
    running: Mutex<FuturesUnordered<BoxFuture<'static, ()>>>,
}

#[derive(Default)]
struct ManualClock {
    now: u64,
    waiters: BTreeMap<u64, Vec<oneshot::Sender<()>>>,
}

impl ManualScheduler {
    pub fn new() -> Self { Self::default() }

    pub fn now(&self) -> u64 { self.0.clock.lock().expect("scheduler lock poisoned").now }

    /// Number of delays that have not yet elapsed
    pub fn pending(&self) -> usize { self.0.clock.lock().expect("scheduler lock poisoned").waiters.values().map(Vec::len).sum() }

    /// Number of spawned tasks that have not finished
    pub fn tasks(&self) -> usize {
        let spawned = self.0.spawned.lock().expect("scheduler lock poisoned").len();
        spawned + self.0.running.lock().expect("scheduler lock poisoned").len()
    }

    /// Moves time forward, releases every delay whose deadline has been reached and runs
    /// the tasks that were waiting on them
    pub fn advance(&self, ticks: u64) {
        let (now, due) = {
            let mut clock = self.0.clock.lock().expect("scheduler lock poisoned");
            clock.now = clock.now.saturating_add(ticks);
            let cut = clock.now.saturating_add(1);
            let later = clock.waiters.split_off(&cut);
            let due = std::mem::replace(&mut clock.waiters, later);
            (clock.now, due)
        };
        let released: usize = due.values().map(Vec::len).sum();
        if released > 0 {
            debug!("ManualScheduler at tick {now} releasing {released} delays");
        }
        for tx in due.into_values().flatten() {
            let _ = tx.send(());
        }
        self.run_until_stalled();
    }

    /// Polls spawned tasks until none of them can make progress.
    ///
    /// Reentrant calls, and calls made while another thread is driving, return immediately;
    /// the active driver picks up whatever they spawned.
    pub fn run_until_stalled(&self) {
        let mut running = match self.0.running.try_lock() {
            Ok(running) => running,
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        let woken = Arc::new(Woken(AtomicBool::new(false)));
        let waker = futures::task::waker(woken.clone());
        let mut cx = Context::from_waker(&waker);
        loop {
            running.extend(self.0.spawned.lock().expect("scheduler lock poisoned").drain(..));
            woken.0.store(false, Ordering::SeqCst);
            if let Poll::Ready(Some(())) = running.poll_next_unpin(&mut cx) {
                continue;
            }
            // FuturesUnordered yields with a self-wake when it has more ready work
            if !woken.0.load(Ordering::SeqCst) && self.0.spawned.lock().expect("scheduler lock poisoned").is_empty() {
                break;
            }
        }
        trace!("ManualScheduler stalled with {} tasks outstanding", running.len());
    }
}

struct Woken(AtomicBool);

impl ArcWake for Woken {
    fn wake_by_ref(arc_self: &Arc<Self>) { arc_self.0.store(true, Ordering::SeqCst); }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler").field("now", &self.now()).field("pending", &self.pending()).finish()
    }
}

impl Scheduler for ManualScheduler {
    fn delay(&self, ticks: u64) -> BoxFuture<'static, ()> {
        if ticks == 0 {
            return futures::future::ready(()).boxed();
        }
        let (tx, rx) = oneshot::channel();
        {
            let mut clock = self.0.clock.lock().expect("scheduler lock poisoned");
            let deadline = clock.now.saturating_add(ticks);
            clock.waiters.entry(deadline).or_default().push(tx);
        }
        // A dropped scheduler releases its waiters
        async move {
            let _ = rx.await;
        }
        .boxed()
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), CommandError> {
        self.0.spawned.lock().expect("scheduler lock poisoned").push(task);
        self.run_until_stalled();
        Ok(())
    }
}
