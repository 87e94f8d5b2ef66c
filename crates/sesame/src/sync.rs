//! Blocking bridge for the asynchronous API.
//!
//! Each call builds a private current-thread runtime, drives the future on
//! it, waits for tasks the future spawned to finish, and then tears the
//! runtime down. Threads never share a runtime.

use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SecretError};

/// Longest a blocking call waits for leftover tasks after its future.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Turns spent yielding before the drain starts to sleep between checks.
const DRAIN_SPIN_TURNS: usize = 64;

/// Run `future` to completion from synchronous code.
///
/// Fails with [`SecretError::Runtime`] when called from inside an async
/// runtime, since blocking there would stall its worker.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    if Handle::try_current().is_ok() {
        return Err(SecretError::Runtime(
            "blocking call made from inside an async runtime".to_string(),
        ));
    }

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SecretError::Runtime(format!("Couldn't start runtime: {}", e)))?;

    let output = runtime.block_on(async move {
        let output = future.await;
        drain(DRAIN_DEADLINE).await;
        output
    });

    debug!("Blocking call finished");
    Ok(output)
}

/// Wait until no spawned task is alive on the current runtime, or until
/// `deadline` has passed.
async fn drain(deadline: Duration) {
    let metrics = Handle::current().metrics();
    let give_up = Instant::now() + deadline;
    let mut turns = 0;

    loop {
        let alive = metrics.num_alive_tasks();
        if alive == 0 {
            return;
        }
        if Instant::now() >= give_up {
            warn!(alive, "Tasks still running after blocking call, dropping them");
            return;
        }
        if turns < DRAIN_SPIN_TURNS {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        turns += 1;
    }
}

/// [`block_on`] for fallible futures.
pub(crate) fn wait<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    block_on(future)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_block_on_returns_output() {
        let value = block_on(async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_spawned_tasks_are_drained() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);

        block_on(async move {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                flag.store(true, Ordering::SeqCst);
            });
        })
        .unwrap();

        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drain_outlasts_many_turns() {
        let turns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&turns);

        block_on(async move {
            tokio::spawn(async move {
                for _ in 0..100 {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        })
        .unwrap();

        assert_eq!(turns.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_drain_waits_for_timers() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);

        block_on(async move {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                flag.store(true, Ordering::SeqCst);
            });
        })
        .unwrap();

        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drain_gives_up_at_deadline() {
        let runtime = Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            tokio::spawn(std::future::pending::<()>());
            let started = std::time::Instant::now();
            drain(Duration::from_millis(30)).await;
            assert!(started.elapsed() >= Duration::from_millis(30));
            assert_eq!(Handle::current().metrics().num_alive_tasks(), 1);
        });
    }

    #[test]
    fn test_independent_threads() {
        let count = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let count = Arc::clone(&count);
                std::thread::spawn(move || {
                    block_on(async move {
                        tokio::task::yield_now().await;
                        count.fetch_add(i, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_wait_flattens_errors() {
        let result: Result<()> = wait(async { Err(SecretError::AlreadyTriggered) });
        assert!(matches!(result, Err(SecretError::AlreadyTriggered)));
    }

    #[tokio::test]
    async fn test_inside_runtime_is_rejected() {
        let result = block_on(async {});
        assert!(matches!(result, Err(SecretError::Runtime(_))));
    }
}
