//! Two independent analyses of the same item, joined into one record.

use crate::errors::StageError;
use crate::stages::StageFunction;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Runs two calls on the same item concurrently; both must succeed.
pub async fn run_paired<I, A, B>(
    item: I,
    first: &dyn StageFunction<I, A>,
    second: &dyn StageFunction<I, B>,
) -> Result<(A, B), StageError>
where
    I: Clone + Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    futures::try_join!(first.call(item.clone()), second.call(item))
}

type Combine<I, A, B, C> = dyn Fn(I, A, B) -> Result<C, StageError> + Send + Sync;

/// A [`StageFunction`] that runs two analyses of an item concurrently and
/// combines them into one record.
///
/// If either analysis fails the whole call fails, so under a fan-out the item
/// is dropped from the surviving set.
pub struct PairedCall<I, A, B, C> {
    name: String,
    first: Arc<dyn StageFunction<I, A>>,
    second: Arc<dyn StageFunction<I, B>>,
    combine: Box<Combine<I, A, B, C>>,
}

impl<I, A, B, C> PairedCall<I, A, B, C>
where
    I: Clone + Send + Sync + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    /// Creates a paired call.
    pub fn new<F>(
        name: impl Into<String>,
        first: Arc<dyn StageFunction<I, A>>,
        second: Arc<dyn StageFunction<I, B>>,
        combine: F,
    ) -> Self
    where
        F: Fn(I, A, B) -> Result<C, StageError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            first,
            second,
            combine: Box::new(combine),
        }
    }
}

impl<I, A, B, C> Debug for PairedCall<I, A, B, C>
where
    I: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairedCall")
            .field("name", &self.name)
            .field("first", &self.first.name())
            .field("second", &self.second.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, A, B, C> StageFunction<I, C> for PairedCall<I, A, B, C>
where
    I: Clone + Send + Sync + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, input: I) -> Result<C, StageError> {
        let (a, b) = run_paired(input.clone(), self.first.as_ref(), self.second.as_ref()).await?;
        (self.combine)(input, a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExternalCallError;
    use crate::fanout::{FanOutConfig, FanOutCoordinator, FanOutStage};
    use crate::stages::stage_fn;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_paired_calls_run_concurrently() {
        let validate = stage_fn("validate", |name: String| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, StageError>(!name.is_empty())
        });
        let signals = stage_fn("signals", |name: String| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, StageError>(name.len())
        });

        let started = Instant::now();
        let (valid, len) = run_paired("Acme".to_string(), validate.as_ref(), signals.as_ref())
            .await
            .unwrap();

        assert!(valid);
        assert_eq!(len, 4);
        assert!(started.elapsed() < Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_item_dropped_when_either_analysis_fails() {
        let validate = stage_fn("validate", |n: u32| async move { Ok::<_, StageError>(n) });
        let signals = stage_fn("signals", |n: u32| async move {
            if n % 2 == 0 {
                Err(StageError::from(ExternalCallError::failed("signals", "no data")))
            } else {
                Ok(n * 100)
            }
        });
        let paired: Arc<dyn StageFunction<u32, (u32, u32)>> = Arc::new(PairedCall::new(
            "analyze",
            validate,
            signals,
            |_, v, s| Ok((v, s)),
        ));

        let out = FanOutCoordinator::new("analyze", FanOutConfig::default())
            .run_batch(vec![1, 2, 3, 4], paired)
            .await
            .unwrap();

        assert_eq!(out, vec![(1, 100), (3, 300)]);
    }

    #[test]
    fn test_debug_names_both_analyses() {
        let validate = stage_fn("validate", |n: u32| async move { Ok::<_, StageError>(n) });
        let signals = stage_fn("signals", |n: u32| async move { Ok::<_, StageError>(n + 1) });
        let paired = PairedCall::new("analyze", validate, signals, |_, v, s| Ok(v + s));
        let score = stage_fn("score", |n: u32| async move { Ok::<_, StageError>(n) });
        let stage = FanOutStage::new("analyze_all", "items", "analyses", score);

        let paired_debug = format!("{paired:?}");
        assert!(paired_debug.contains("\"validate\""));
        assert!(paired_debug.contains("\"signals\""));
        let stage_debug = format!("{stage:?}");
        assert!(stage_debug.contains("\"analyze_all\""));
        assert!(stage_debug.contains("\"score\""));
    }
}
