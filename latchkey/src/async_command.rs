use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use latchkey_signals::{Listener, ListenerGuard, Observable, ReadProperty};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::{
    error::{CommandError, HandlerError},
    execution::Execution,
    gate::Gate,
    handler::{AsyncHandler, Dispatch, HandlerGuard, HandlerRegistry, Registered},
    scheduler::{Scheduler, TokioScheduler},
};

/// How long the gate stays closed after all handlers have finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Throttle {
    /// Reopen as soon as the last handler finishes
    #[default]
    None,
    /// Reopen this many scheduler ticks after the last handler finishes
    Ticks(u64),
}

impl Throttle {
    fn ticks(self) -> Option<u64> {
        match self {
            Throttle::Ticks(ticks) if ticks > 0 => Some(ticks),
            _ => None,
        }
    }
}

/// A command whose work is a set of async handlers.
///
/// `execute` closes the gate before any handler runs, fans the parameter out to a snapshot
/// of the registered handlers, waits for every one of them, and then reopens the gate
/// (after the throttle delay, if one is configured). While the gate is closed further
/// `execute` calls are no-ops, including calls on other commands sharing the same [`Gate`].
pub struct AsyncCommand<T> {
    gate: Gate,
    gate_subscription: Mutex<Option<ListenerGuard<bool>>>,
    handlers: Arc<HandlerRegistry<T>>,
    throttle: Throttle,
    scheduler: Arc<dyn Scheduler>,
    disposed: AtomicBool,
}

impl<T> AsyncCommand<T>
where T: Clone + 'static
{
    /// Command with its own open gate and no throttle
    pub fn new() -> Self { Self::builder().build() }

    /// Command bound to a shared gate
    pub fn with_gate(gate: Gate) -> Self { Self::builder().gate(gate).build() }

    /// Command bound to a shared gate that stays closed for `ticks` after each execution
    pub fn with_throttle(gate: Gate, ticks: u64, scheduler: impl Scheduler + 'static) -> Self {
        Self::builder().gate(gate).throttle(Throttle::Ticks(ticks)).scheduler(scheduler).build()
    }

    pub fn builder() -> AsyncCommandBuilder<T> { AsyncCommandBuilder::default() }

    fn bind(gate: Gate, throttle: Throttle, scheduler: Arc<dyn Scheduler>) -> Self {
        // Keeps the injected gate observed; this is where gate-driving logic would attach.
        let gate_subscription = match gate.listen(Listener::payload(|open: bool| trace!("AsyncCommand gate is now {open}"))) {
            Ok(guard) => Some(guard),
            Err(e) => {
                debug!("AsyncCommand bound to an unusable gate: {e}");
                None
            }
        };
        Self {
            gate,
            gate_subscription: Mutex::new(gate_subscription),
            handlers: HandlerRegistry::new(),
            throttle,
            scheduler,
            disposed: AtomicBool::new(false),
        }
    }

    /// Runs every registered handler with `parameter` if the gate is open.
    ///
    /// Returns a skipped [`Execution`] if the gate was closed. If a handler fails while being
    /// invoked, the remaining handlers are not invoked, the gate is reopened and the failure is
    /// returned as [`CommandError::HandlerFault`]. A handler that panics while being invoked
    /// also gets the gate reopened before the panic propagates.
    pub fn execute(&self, parameter: T) -> Result<Execution, CommandError> {
        if self.is_disposed() {
            return Err(CommandError::Disposed);
        }
        if !self.gate.try_close()? {
            debug!("AsyncCommand gate closed, skipping execute");
            return Ok(Execution::skipped());
        }

        let mut unwind = ReopenOnUnwind { gate: &self.gate, armed: true };

        let handlers = self.handlers.snapshot();
        let pending = match dispatch(&handlers, parameter) {
            Ok(pending) => pending,
            Err(e) => {
                unwind.armed = false;
                warn!("AsyncCommand handler failed during dispatch: {e}");
                reopen(&self.gate);
                return Err(CommandError::HandlerFault(e));
            }
        };
        debug!("AsyncCommand dispatched to {} handlers, {} deferred", handlers.len(), pending.len());

        let (tx, rx) = oneshot::channel();
        let completed = self.complete(pending, tx);
        unwind.armed = false;
        completed?;
        Ok(Execution::running(rx))
    }

    /// Joins the deferred results, then reopens the gate and reports. Completes inline when
    /// every result is already finished and no throttle applies; otherwise hands the rest to
    /// the scheduler. A result that panics counts as a fault.
    fn complete(
        &self,
        pending: Vec<BoxFuture<'static, Result<(), HandlerError>>>,
        tx: oneshot::Sender<Vec<HandlerError>>,
    ) -> Result<(), CommandError> {
        let mut join = futures::future::join_all(pending.into_iter().map(|future| AssertUnwindSafe(future).catch_unwind())).boxed();
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());

        match join.as_mut().poll(&mut cx) {
            Poll::Ready(results) => {
                let faults = collect_faults(results);
                match self.throttle.ticks() {
                    None => {
                        reopen(&self.gate);
                        let _ = tx.send(faults);
                        Ok(())
                    }
                    Some(ticks) => {
                        let delay = self.scheduler.delay(ticks);
                        let gate = self.gate.clone();
                        self.spawn(
                            async move {
                                delay.await;
                                reopen(&gate);
                                let _ = tx.send(faults);
                            }
                            .boxed(),
                        )
                    }
                }
            }
            Poll::Pending => {
                let gate = self.gate.clone();
                let throttle = self.throttle;
                let scheduler = self.scheduler.clone();
                self.spawn(
                    async move {
                        let faults = collect_faults(join.await);
                        if let Some(ticks) = throttle.ticks() {
                            scheduler.delay(ticks).await;
                        }
                        reopen(&gate);
                        let _ = tx.send(faults);
                    }
                    .boxed(),
                )
            }
        }
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), CommandError> {
        self.scheduler.spawn(task).inspect_err(|_| {
            warn!("No runtime to drive AsyncCommand completion, reopening gate");
            reopen(&self.gate);
        })
    }

    /// Registers a handler. Dropping the returned guard removes exactly this handler.
    /// Executions already in flight keep the handler set they started with.
    pub fn subscribe(&self, handler: AsyncHandler<T>) -> Result<HandlerGuard<T>, CommandError> {
        if self.is_disposed() {
            return Err(CommandError::Disposed);
        }
        Ok(self.handlers.add(handler))
    }

    /// Registers an async closure as a handler
    pub fn subscribe_fn<F, Fut>(&self, f: F) -> Result<HandlerGuard<T>, CommandError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(AsyncHandler::new(f))
    }
}

impl<T> AsyncCommand<T> {
    /// Observable, read-only gate (`CanExecute`)
    pub fn can_execute(&self) -> ReadProperty<bool> { self.gate.read() }

    /// The shared gate this command is bound to
    pub fn gate(&self) -> &Gate { &self.gate }

    pub fn throttle(&self) -> Throttle { self.throttle }

    pub fn handler_count(&self) -> usize { self.handlers.len() }

    pub fn is_disposed(&self) -> bool { self.disposed.load(Ordering::SeqCst) }

    /// Releases the gate subscription. Registered handlers, in-flight executions and the
    /// shared gate itself are left alone. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate_subscription.lock().expect("gate subscription lock poisoned").take();
        debug!("AsyncCommand disposed");
    }
}

impl<T: Clone + 'static> Default for AsyncCommand<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Drop for AsyncCommand<T> {
    fn drop(&mut self) { self.dispose(); }
}

impl<T> std::fmt::Debug for AsyncCommand<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCommand")
            .field("gate", &self.gate)
            .field("handlers", &self.handlers.len())
            .field("throttle", &self.throttle)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Invokes each handler in registration order. The first dispatch fault aborts the loop;
/// deferred results collected so far are dropped without being polled.
fn dispatch<T: Clone + 'static>(
    handlers: &[Registered<T>],
    parameter: T,
) -> Result<Vec<BoxFuture<'static, Result<(), HandlerError>>>, HandlerError> {
    let mut pending = Vec::with_capacity(handlers.len());
    let mut push = |result: Dispatch| {
        if let Dispatch::Deferred(future) = result {
            pending.push(future);
        }
    };

    // clone the parameter for each handler except the last one
    if let Some((last, rest)) = handlers.split_last() {
        for registered in rest {
            push(registered.handler.call(parameter.clone())?);
        }
        push(last.handler.call(parameter)?);
    }
    Ok(pending)
}

fn collect_faults(results: Vec<std::thread::Result<Result<(), HandlerError>>>) -> Vec<HandlerError> {
    let faults: Vec<_> = results
        .into_iter()
        .filter_map(|result| match result {
            Ok(outcome) => outcome.err(),
            Err(panic) => Some(anyhow::anyhow!("handler panicked: {}", panic_message(panic.as_ref()))),
        })
        .collect();
    if !faults.is_empty() {
        warn!("{} AsyncCommand handler(s) failed after dispatch", faults.len());
    }
    faults
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    match payload.downcast_ref::<&str>() {
        Some(message) => *message,
        None => payload.downcast_ref::<String>().map(String::as_str).unwrap_or("non-string panic payload"),
    }
}

/// Reopens the gate if a handler unwinds out of `execute`
struct ReopenOnUnwind<'a> {
    gate: &'a Gate,
    armed: bool,
}

impl Drop for ReopenOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("AsyncCommand handler panicked during dispatch, reopening gate");
            reopen(self.gate);
        }
    }
}

fn reopen(gate: &Gate) {
    match gate.reopen() {
        Ok(()) => debug!("AsyncCommand gate reopened"),
        Err(e) => debug!("AsyncCommand gate not reopened: {e}"),
    }
}

/// Builder for [`AsyncCommand`] with sensible defaults: a private open gate, no throttle,
/// and a [`TokioScheduler`] with the default tick.
pub struct AsyncCommandBuilder<T> {
    gate: Option<Gate>,
    throttle: Throttle,
    scheduler: Option<Arc<dyn Scheduler>>,
    _parameter: PhantomData<fn(T)>,
}

impl<T> Default for AsyncCommandBuilder<T> {
    fn default() -> Self { Self { gate: None, throttle: Throttle::None, scheduler: None, _parameter: PhantomData } }
}

impl<T> AsyncCommandBuilder<T>
where T: Clone + 'static
{
    pub fn gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn throttle_ticks(self, ticks: u64) -> Self { self.throttle(Throttle::Ticks(ticks)) }

    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn build(self) -> AsyncCommand<T> {
        let scheduler = self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler::default()));
        AsyncCommand::bind(self.gate.unwrap_or_default(), self.throttle, scheduler)
    }
}
