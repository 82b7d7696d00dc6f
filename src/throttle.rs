//! Per-name call throttle for expensive history scans.
//!
//! The first call for a name opens a window and runs at once. Calls inside
//! that window with the same arguments share its result, even if it is still
//! in flight. Calls with other arguments wait for the window to close and
//! then compete to open the next one, so nobody receives a result computed for
//! someone else's arguments.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Window<K, V> {
    opened: Instant,
    key: K,
    result: SharedResult<V>,
}

pub struct CallThrottle<K, V> {
    period: Duration,
    windows: Mutex<HashMap<&'static str, Window<K, V>>>,
}

enum Decision<V> {
    Join(SharedResult<V>),
    WaitUntil(Instant),
}

impl<K, V> CallThrottle<K, V>
where
    K: PartialEq + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `op` under the throttle for `name`, keyed by `key`.
    ///
    /// `op` is only invoked when this call opens a new window.
    pub async fn call<F, Fut>(&self, name: &'static str, key: K, op: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut op = Some(op);
        loop {
            let decision = {
                let mut windows = self.windows.lock().await;
                let now = Instant::now();
                match windows.get(name) {
                    Some(w) if now < w.opened + self.period => {
                        if w.key == key {
                            tracing::debug!("Joining throttled {} call", name);
                            Decision::Join(w.result.clone())
                        } else {
                            Decision::WaitUntil(w.opened + self.period)
                        }
                    }
                    _ => {
                        // `op` is only taken on the path that returns.
                        let Some(op) = op.take() else {
                            continue;
                        };
                        let result = op().boxed().shared();
                        windows.insert(
                            name,
                            Window {
                                opened: now,
                                key: key.clone(),
                                result: result.clone(),
                            },
                        );
                        tracing::debug!(
                            "Opened {}ms window for {} call",
                            self.period.as_millis(),
                            name
                        );
                        Decision::Join(result)
                    }
                }
            };

            match decision {
                Decision::Join(result) => return result.await,
                Decision::WaitUntil(deadline) => {
                    tracing::debug!("Deferring {} call to the next window", name);
                    tokio::time::sleep_until(deadline).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReviewError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn counted(
        throttle: &CallThrottle<u32, String>,
        runs: Arc<AtomicUsize>,
        arg: u32,
    ) -> Result<String> {
        throttle
            .call("list_commits", arg, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(format!("page {}", arg))
            })
            .await
    }

    #[tokio::test]
    async fn test_identical_calls_share_one_execution() {
        let throttle = CallThrottle::new(Duration::from_millis(1000));
        let runs = Arc::new(AtomicUsize::new(0));

        let results = futures_util::future::join_all(
            (0..5).map(|_| counted(&throttle, runs.clone(), 1)),
        )
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 5);
        for r in results {
            assert_eq!(r.unwrap(), "page 1");
        }
    }

    #[tokio::test]
    async fn test_completed_result_shared_within_window() {
        let throttle = CallThrottle::new(Duration::from_millis(1000));
        let runs = Arc::new(AtomicUsize::new(0));

        assert_eq!(counted(&throttle, runs.clone(), 3).await.unwrap(), "page 3");
        assert_eq!(counted(&throttle, runs.clone(), 3).await.unwrap(), "page 3");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_args_deferred_to_next_window() {
        let throttle = CallThrottle::new(Duration::from_millis(1000));
        let runs = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let (first, second) = tokio::join!(
            counted(&throttle, runs.clone(), 1),
            counted(&throttle, runs.clone(), 2)
        );

        assert_eq!(first.unwrap(), "page 1");
        assert_eq!(second.unwrap(), "page 2");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_window_runs_again() {
        let throttle = CallThrottle::new(Duration::from_millis(1000));
        let runs = Arc::new(AtomicUsize::new(0));

        counted(&throttle, runs.clone(), 1).await.unwrap();
        tokio::time::advance(Duration::from_millis(1001)).await;
        counted(&throttle, runs.clone(), 1).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let throttle: CallThrottle<u32, String> = CallThrottle::new(Duration::from_millis(1000));
        let runs = Arc::new(AtomicUsize::new(0));

        let call = |runs: Arc<AtomicUsize>| {
            throttle.call("list_commits", 9, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Err(ReviewError::command_failed("git log", "boom"))
            })
        };

        let (a, b) = tokio::join!(call(runs.clone()), call(runs.clone()));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
