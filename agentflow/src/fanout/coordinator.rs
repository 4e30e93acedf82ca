//! Concurrent fan-out over a batch of independent items.

use crate::cancellation::CancellationToken;
use crate::config::AgentflowConfig;
use crate::errors::StageError;
use crate::stages::{call_with_timeout, StageFunction, StageResult};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Settings of a fan-out batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutConfig {
    /// Timeout applied to each item's call.
    pub call_timeout: Duration,
    /// Optional cap on concurrently running item tasks.
    pub max_concurrency: Option<usize>,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self::from(&AgentflowConfig::default())
    }
}

impl From<&AgentflowConfig> for FanOutConfig {
    fn from(config: &AgentflowConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            max_concurrency: config.max_concurrency,
        }
    }
}

impl FanOutConfig {
    /// Sets the per-item timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Caps the number of concurrent item tasks.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }
}

/// A failed item of a batch.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    /// Position of the item in the input batch.
    pub index: usize,
    /// Why the item failed.
    pub error: StageError,
}

/// Every item's result, in input order.
#[derive(Debug, Clone)]
pub struct BatchOutcome<O> {
    /// One result per input item.
    pub results: Vec<StageResult<O>>,
    /// Wall-clock duration of the batch.
    pub duration: Duration,
}

impl<O> BatchOutcome<O> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Number of items in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if the batch was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of successful items.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// The failed items.
    #[must_use]
    pub fn failures(&self) -> Vec<ItemFailure> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, r)| {
                r.failure().map(|error| ItemFailure {
                    index,
                    error: error.clone(),
                })
            })
            .collect()
    }

    /// The successful values, in input order.
    #[must_use]
    pub fn into_successes(self) -> Vec<O> {
        self.results.into_iter().filter_map(StageResult::success).collect()
    }
}

/// Runs one stage function concurrently over a batch of items.
///
/// Each item runs in its own task with nothing shared but the function, and
/// its result lands in its own slot. A failing, timing-out or panicking item
/// never aborts the batch. Cancellation aborts every in-flight task and
/// discards partial results.
#[derive(Debug, Clone)]
pub struct FanOutCoordinator {
    name: String,
    config: FanOutConfig,
    token: Option<Arc<CancellationToken>>,
}

impl FanOutCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(name: impl Into<String>, config: FanOutConfig) -> Self {
        Self {
            name: name.into(),
            config,
            token: None,
        }
    }

    /// Observes a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = Some(token);
        self
    }

    /// Returns the coordinator name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the batch and returns the successes in input order.
    ///
    /// Failed items are logged and excluded. The only error is cancellation.
    pub async fn run_batch<I, O>(
        &self,
        items: Vec<I>,
        stage_fn: Arc<dyn StageFunction<I, O>>,
    ) -> Result<Vec<O>, StageError>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        Ok(self.run_batch_detailed(items, stage_fn).await?.into_successes())
    }

    /// Runs the batch and returns every item's result in input order.
    pub async fn run_batch_detailed<I, O>(
        &self,
        items: Vec<I>,
        stage_fn: Arc<dyn StageFunction<I, O>>,
    ) -> Result<BatchOutcome<O>, StageError>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        if items.is_empty() {
            return Ok(BatchOutcome::empty());
        }
        self.check_cancelled()?;

        let started = Instant::now();
        let total = items.len();
        let semaphore = self.config.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let stage_fn = Arc::clone(&stage_fn);
            let semaphore = semaphore.clone();
            let timeout = self.config.call_timeout;
            let name = self.name.clone();

            tasks.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            return (index, Err(StageError::fatal(name, "fan-out semaphore closed")));
                        }
                    },
                    None => None,
                };

                let result = AssertUnwindSafe(call_with_timeout(stage_fn.as_ref(), item, timeout))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(StageError::fatal(name, format!("item {index} panicked"))));
                (index, result)
            });
        }

        let mut slots: Vec<Option<StageResult<O>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = self.join_next(&mut tasks).await? {
            match joined {
                Ok((index, result)) => {
                    if let Err(ref e) = result {
                        warn!(
                            fan_out = %self.name,
                            item_index = index,
                            error = %e,
                            "Fan-out item failed, excluding it from the batch"
                        );
                    }
                    slots[index] = Some(result.into());
                }
                Err(e) => warn!(fan_out = %self.name, error = %e, "Fan-out task did not complete"),
            }
        }

        let results: Vec<StageResult<O>> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    StageResult::Failure(StageError::fatal(self.name.clone(), "item task did not complete"))
                })
            })
            .collect();

        let outcome = BatchOutcome {
            results,
            duration: started.elapsed(),
        };
        debug!(
            fan_out = %self.name,
            total,
            succeeded = outcome.success_count(),
            duration_ms = outcome.duration.as_secs_f64() * 1000.0,
            "Fan-out batch joined"
        );
        Ok(outcome)
    }

    fn check_cancelled(&self) -> Result<(), StageError> {
        match &self.token {
            Some(token) if token.is_cancelled() => {
                Err(StageError::cancelled(&self.name, token.reason_or_default()))
            }
            _ => Ok(()),
        }
    }

    async fn join_next<T: 'static>(
        &self,
        tasks: &mut JoinSet<T>,
    ) -> Result<Option<Result<T, tokio::task::JoinError>>, StageError> {
        let Some(token) = &self.token else {
            return Ok(tasks.join_next().await);
        };

        tokio::select! {
            biased;
            () = token.cancelled() => {
                tasks.abort_all();
                debug!(fan_out = %self.name, "Fan-out cancelled, in-flight items aborted");
                Err(StageError::cancelled(&self.name, token.reason_or_default()))
            }
            joined = tasks.join_next() => Ok(joined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExternalCallError;
    use crate::stages::stage_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator() -> FanOutCoordinator {
        FanOutCoordinator::new(
            "test",
            FanOutConfig::default().with_call_timeout(Duration::from_millis(200)),
        )
    }

    #[tokio::test]
    async fn test_empty_batch_schedules_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let f = stage_fn("count", move |n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, StageError>(n) }
        });

        let out = coordinator().run_batch(Vec::new(), f).await.unwrap();

        assert!(out.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_failing_item_never_aborts_the_batch() {
        let f = stage_fn("validate", |n: u32| async move {
            if n == 5 {
                Err(StageError::from(ExternalCallError::failed("validate", "item 5 always fails")))
            } else {
                Ok(n * 10)
            }
        });

        let out = coordinator().run_batch((1..=10).collect(), f).await.unwrap();

        assert_eq!(out.len(), 9);
        assert!(!out.contains(&50));
    }

    #[tokio::test]
    async fn test_successes_keep_input_order() {
        let f = stage_fn("sleepy", |n: u64| async move {
            tokio::time::sleep(Duration::from_millis(50 - n * 10)).await;
            Ok::<_, StageError>(n)
        });

        let out = coordinator().run_batch(vec![0, 1, 2, 3, 4], f).await.unwrap();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_timeouts_and_panics_are_isolated() {
        let f = stage_fn("mixed", |n: u32| async move {
            match n {
                0 => tokio::time::sleep(Duration::from_secs(5)).await,
                1 => panic!("boom"),
                _ => {}
            }
            Ok::<_, StageError>(n)
        });

        let outcome = coordinator().run_batch_detailed(vec![0, 1, 2], f).await.unwrap();

        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome.success_count(), 1);
        let failures = outcome.failures();
        assert_eq!(failures.len(), 2);
        assert!(matches!(
            failures[0].error,
            StageError::ExternalCall(ExternalCallError::Timeout { .. })
        ));
        assert_eq!(failures[1].index, 1);
        assert_eq!(outcome.into_successes(), vec![2]);
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let f = stage_fn("capped", move |n: u32| {
            let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, StageError>(n)
            }
        });

        let config = FanOutConfig::default()
            .with_call_timeout(Duration::from_secs(1))
            .with_max_concurrency(2);
        let out = FanOutCoordinator::new("capped", config)
            .run_batch((0..8).collect(), f)
            .await
            .unwrap();

        assert_eq!(out.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_items() {
        let token = Arc::new(CancellationToken::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        let f = stage_fn("slow", move |n: u32| {
            let done = Arc::clone(&done);
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StageError>(n)
            }
        });

        let coordinator = FanOutCoordinator::new(
            "cancel",
            FanOutConfig::default().with_call_timeout(Duration::from_secs(5)),
        )
        .with_cancellation(Arc::clone(&token));

        let canceller = {
            let token = Arc::clone(&token);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel("caller left");
            })
        };

        let err = coordinator.run_batch(vec![1, 2, 3], f).await.unwrap_err();
        canceller.await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(err.is_cancelled());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_schedules_nothing() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("early");
        let f = stage_fn("never", |n: u32| async move { Ok::<_, StageError>(n) });

        let err = coordinator()
            .with_cancellation(token)
            .run_batch(vec![1], f)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
