mod common;

use common::{change_watcher, settle};
use latchkey::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn is_open(command: &AsyncCommand<u32>) -> bool { command.can_execute().get().unwrap() }

/// Handler that records the gate state it observes when invoked, then finishes synchronously
fn gate_probe(gate: ReadProperty<bool>, seen: Arc<Mutex<Vec<bool>>>) -> AsyncHandler<u32> {
    AsyncHandler::from_dispatch(move |_| {
        seen.lock().unwrap().push(gate.get()?);
        Ok(Dispatch::Done)
    })
}

#[test]
fn test_gate_is_closed_while_handler_runs() {
    let command = AsyncCommand::<u32>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _guard = command.subscribe(gate_probe(command.can_execute(), seen.clone())).unwrap();

    let mut execution = command.execute(1).unwrap();
    assert!(execution.is_started());
    assert!(execution.is_complete());
    assert_eq!(*seen.lock().unwrap(), [false]);
    assert!(is_open(&command));
}

#[test]
fn test_ready_futures_complete_without_runtime() {
    let command = AsyncCommand::<u32>::new();
    let (watcher, check) = change_watcher();
    let _guard = command
        .subscribe_fn(move |value| {
            watcher(value);
            async { Ok(()) }
        })
        .unwrap();

    let mut execution = command.execute(7).unwrap();
    assert!(execution.is_complete());
    assert_eq!(check(), [7]);
    assert!(is_open(&command));
}

#[tokio::test]
async fn test_gate_reopens_after_slowest_handler() {
    let clock = ManualScheduler::new();
    let command = AsyncCommand::<u32>::new();
    let _guards: Vec<_> = (1..=3)
        .map(|ticks| {
            let delay = clock.clone();
            command
                .subscribe_fn(move |_| {
                    let delay = delay.delay(ticks);
                    async move {
                        delay.await;
                        Ok(())
                    }
                })
                .unwrap()
        })
        .collect();

    let mut execution = command.execute(1).unwrap();
    assert_eq!(clock.pending(), 3);

    for tick in 1..=2 {
        clock.advance(1);
        settle().await;
        assert!(!is_open(&command), "gate opened early at tick {tick}");
        assert!(!execution.is_complete());
    }

    clock.advance(1);
    settle().await;
    assert!(is_open(&command));
    assert!(execution.is_complete());
    execution.wait().await.unwrap();
}

#[tokio::test]
async fn test_throttle_holds_gate_after_completion() {
    let clock = ManualScheduler::new();
    let command = AsyncCommand::<u32>::with_throttle(Gate::default(), 5, clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let _guard = {
        let calls = calls.clone();
        command
            .subscribe(AsyncHandler::from_dispatch(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Dispatch::Done)
            }))
            .unwrap()
    };

    let execution = command.execute(1).unwrap();
    settle().await;
    assert!(!is_open(&command));

    clock.advance(4);
    settle().await;
    assert!(!is_open(&command));
    let mut skipped = command.execute(2).unwrap();
    assert!(!skipped.is_started());
    assert!(skipped.is_complete());

    clock.advance(1);
    settle().await;
    assert!(is_open(&command));
    execution.wait().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_throttle_runs_without_runtime() {
    let clock = ManualScheduler::new();
    let command = AsyncCommand::<u32>::with_throttle(Gate::default(), 5, clock.clone());
    let _guard = command.subscribe(AsyncHandler::from_dispatch(|_| Ok(Dispatch::Done))).unwrap();

    let mut execution = command.execute(1).unwrap();
    assert!(!is_open(&command));
    assert_eq!(clock.pending(), 1);

    clock.advance(4);
    assert!(!is_open(&command));
    assert!(!execution.is_complete());

    clock.advance(1);
    assert!(is_open(&command));
    assert!(execution.is_complete());
    tokio_test::block_on(execution.wait()).unwrap();
}

#[test]
fn test_throttle_counts_from_last_handler_finishing() {
    let clock = ManualScheduler::new();
    let command = AsyncCommand::<u32>::with_throttle(Gate::default(), 3, clock.clone());
    let _guard = {
        let clock = clock.clone();
        command
            .subscribe_fn(move |_| {
                let delay = clock.delay(2);
                async move {
                    delay.await;
                    Ok(())
                }
            })
            .unwrap()
    };

    let mut execution = command.execute(1).unwrap();
    clock.advance(2);
    // handler done at tick 2, throttle runs until tick 5
    assert!(!is_open(&command));
    assert_eq!(clock.pending(), 1);

    clock.advance(2);
    assert!(!is_open(&command), "gate opened early at tick {}", clock.now());

    clock.advance(1);
    assert!(is_open(&command));
    assert!(execution.is_complete());
    assert_eq!(clock.tasks(), 0);
}

#[test]
fn test_zero_throttle_is_no_throttle() {
    let command = AsyncCommand::<u32>::builder().throttle_ticks(0).scheduler(ManualScheduler::new()).build();
    let _guard = command.subscribe(AsyncHandler::from_dispatch(|_| Ok(Dispatch::Done))).unwrap();

    let mut execution = command.execute(1).unwrap();
    assert!(execution.is_complete());
    assert!(is_open(&command));
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_throttle() {
    let command = AsyncCommand::<u32>::builder().throttle_ticks(3).scheduler(TokioScheduler::new(Duration::from_millis(10))).build();
    let _guard = command.subscribe(AsyncHandler::from_dispatch(|_| Ok(Dispatch::Done))).unwrap();

    let execution = command.execute(1).unwrap();
    tokio::time::sleep(Duration::from_millis(29)).await;
    assert!(!is_open(&command));

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(is_open(&command));
    execution.wait().await.unwrap();
}

#[test]
fn test_removed_handler_is_not_invoked() {
    let command = AsyncCommand::<u32>::new();
    let (watcher, check) = change_watcher();
    let watcher = Arc::new(watcher);
    let handler = |name: &'static str| {
        let watcher = watcher.clone();
        AsyncHandler::from_dispatch(move |_| {
            watcher(name);
            Ok(Dispatch::Done)
        })
    };

    let a = command.subscribe(handler("a")).unwrap();
    let b = command.subscribe(handler("b")).unwrap();
    let c = command.subscribe(handler("c")).unwrap();
    assert_eq!(command.handler_count(), 3);

    drop(a);
    let _ = command.execute(1).unwrap();
    assert_eq!(check(), ["b", "c"]);

    b.dispose();
    assert!(c.is_registered());
    let _ = command.execute(2).unwrap();
    assert_eq!(check(), ["c"]);
}

#[test]
fn test_handlers_added_during_dispatch_wait_for_next_execution() {
    let command = Arc::new(AsyncCommand::<u32>::new());
    let (watcher, check) = change_watcher();
    let watcher = Arc::new(watcher);
    let late_guards = Arc::new(Mutex::new(Vec::new()));

    let weak = Arc::downgrade(&command);
    let _guard = {
        let watcher = watcher.clone();
        let late_guards = late_guards.clone();
        command
            .subscribe(AsyncHandler::from_dispatch(move |value| {
                watcher(("first", value));
                if let Some(command) = weak.upgrade() {
                    let watcher = watcher.clone();
                    let guard = command.subscribe(AsyncHandler::from_dispatch(move |value| {
                        watcher(("late", value));
                        Ok(Dispatch::Done)
                    }))?;
                    late_guards.lock().unwrap().push(guard);
                }
                Ok(Dispatch::Done)
            }))
            .unwrap()
    };

    let _ = command.execute(1).unwrap();
    assert_eq!(check(), [("first", 1)]);

    let _ = command.execute(2).unwrap();
    assert_eq!(check(), [("first", 2), ("late", 2)]);
    late_guards.lock().unwrap().clear();
}

#[test]
fn test_dispatch_fault_reopens_gate_and_stops_dispatch() {
    let command = AsyncCommand::<u32>::new();
    let (watcher, check) = change_watcher();
    let watcher = Arc::new(watcher);

    let _first = {
        let watcher = watcher.clone();
        command
            .subscribe(AsyncHandler::from_dispatch(move |_| {
                watcher("first");
                // never completes; dropped with the failed dispatch
                Ok(Dispatch::deferred(futures::future::pending()))
            }))
            .unwrap()
    };
    let _faulty = command.subscribe(AsyncHandler::from_dispatch(|_| Err(anyhow::anyhow!("invalid parameter")))).unwrap();
    let _third = {
        let watcher = watcher.clone();
        command
            .subscribe(AsyncHandler::from_dispatch(move |_| {
                watcher("third");
                Ok(Dispatch::Done)
            }))
            .unwrap()
    };

    let err = command.execute(1).unwrap_err();
    assert!(matches!(&err, CommandError::HandlerFault(e) if e.to_string() == "invalid parameter"));
    assert_eq!(check(), ["first"]);
    assert!(is_open(&command));
}

#[tokio::test]
async fn test_deferred_fault_reported_after_join() {
    let clock = ManualScheduler::new();
    let command = AsyncCommand::<u32>::new();
    let _failing = command.subscribe_fn(|_| async { Err(anyhow::anyhow!("disk full")) }).unwrap();
    let _slow = {
        let clock = clock.clone();
        command
            .subscribe_fn(move |_| {
                let delay = clock.delay(2);
                async move {
                    delay.await;
                    Ok(())
                }
            })
            .unwrap()
    };

    let execution = command.execute(1).unwrap();
    settle().await;
    // the failed handler does not cut the join short
    assert!(!is_open(&command));

    clock.advance(2);
    settle().await;
    assert!(is_open(&command));

    let err = execution.wait().await.unwrap_err();
    assert_eq!(err.handler_errors().len(), 1);
    assert_eq!(err.to_string(), "1 handler(s) failed: disk full");
}

#[tokio::test]
async fn test_shared_gate_excludes_other_command() {
    let clock = ManualScheduler::new();
    let gate = Gate::default();
    let upload = AsyncCommand::<u32>::with_gate(gate.clone());
    let delete = gate.to_async_command::<u32>();
    assert!(upload.gate().shares_with(delete.gate()));

    let _upload = {
        let clock = clock.clone();
        upload
            .subscribe_fn(move |_| {
                let delay = clock.delay(1);
                async move {
                    delay.await;
                    Ok(())
                }
            })
            .unwrap()
    };
    let deletes = Arc::new(AtomicUsize::new(0));
    let _delete = {
        let deletes = deletes.clone();
        delete
            .subscribe(AsyncHandler::from_dispatch(move |_| {
                deletes.fetch_add(1, Ordering::SeqCst);
                Ok(Dispatch::Done)
            }))
            .unwrap()
    };

    let running = upload.execute(1).unwrap();
    assert!(!delete.can_execute().get().unwrap());
    assert!(!delete.execute(1).unwrap().is_started());
    assert_eq!(deletes.load(Ordering::SeqCst), 0);

    clock.advance(1);
    settle().await;
    running.wait().await.unwrap();

    assert!(delete.execute(2).unwrap().is_started());
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_token_still_reopens_gate() {
    let clock = ManualScheduler::new();
    let command = AsyncCommand::<u32>::new();
    let _guard = {
        let clock = clock.clone();
        command
            .subscribe_fn(move |_| {
                let delay = clock.delay(1);
                async move {
                    delay.await;
                    Ok(())
                }
            })
            .unwrap()
    };

    command.execute(1).unwrap().dispose();
    settle().await;
    assert!(!is_open(&command));

    clock.advance(1);
    settle().await;
    assert!(is_open(&command));
}

#[test]
fn test_panicking_handler_reopens_gate() {
    let command = AsyncCommand::<u32>::new();
    let _guard = command
        .subscribe(AsyncHandler::from_dispatch(|value| {
            if value == 1 {
                panic!("bug");
            }
            Ok(Dispatch::Done)
        }))
        .unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| command.execute(1)));
    assert!(result.is_err());
    assert!(is_open(&command));

    let mut execution = command.execute(2).unwrap();
    assert!(execution.is_started());
    assert!(execution.is_complete());
}

fn lose_connection() -> Result<(), anyhow::Error> { panic!("lost connection") }

#[test]
fn test_panicking_future_is_reported_as_fault() {
    let clock = ManualScheduler::new();
    let command = AsyncCommand::<u32>::builder().scheduler(clock.clone()).build();
    let _guard = {
        let clock = clock.clone();
        command
            .subscribe_fn(move |_| {
                let delay = clock.delay(1);
                async move {
                    delay.await;
                    lose_connection()
                }
            })
            .unwrap()
    };
    let _immediate = command.subscribe_fn(|_| async { lose_connection() }).unwrap();

    let execution = command.execute(1).unwrap();
    assert!(!is_open(&command));

    clock.advance(1);
    assert!(is_open(&command));

    let err = tokio_test::block_on(execution.wait()).unwrap_err();
    assert_eq!(err.handler_errors().len(), 2);
    assert_eq!(err.to_string(), "2 handler(s) failed: handler panicked: lost connection");
}

#[test]
fn test_no_runtime_reopens_gate() {
    let command = AsyncCommand::<u32>::new();
    let _guard = command.subscribe_fn(|_| futures::future::pending()).unwrap();

    assert!(matches!(command.execute(1), Err(CommandError::NoRuntime)));
    assert!(is_open(&command));
}

#[test]
fn test_dispose_is_idempotent_and_leaves_gate_alone() {
    let gate = Gate::default();
    let command = AsyncCommand::<u32>::with_gate(gate.clone());
    let guard = command.subscribe(AsyncHandler::from_dispatch(|_| Ok(Dispatch::Done))).unwrap();

    command.dispose();
    command.dispose();

    assert!(command.is_disposed());
    assert!(matches!(command.execute(1), Err(CommandError::Disposed)));
    assert!(matches!(command.subscribe(AsyncHandler::from_dispatch(|_| Ok(Dispatch::Done))), Err(CommandError::Disposed)));
    assert!(guard.is_registered());

    // the shared gate outlives the command
    assert!(gate.is_open().unwrap());
    let other = AsyncCommand::<u32>::with_gate(gate.clone());
    let mut execution = other.execute(1).unwrap();
    assert!(execution.is_started());
    assert!(execution.is_complete());
}

#[test]
fn test_disposed_gate_fails_execute() {
    let gate = Gate::default();
    let command = AsyncCommand::<u32>::with_gate(gate.clone());
    gate.dispose();
    assert!(matches!(command.execute(1), Err(CommandError::Disposed)));
}
