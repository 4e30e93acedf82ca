//! Weighted ranking and bucketing of analysis records.

use super::weights::{Bucket, BucketThresholds, ScoreWeights, Scored};
use crate::config::ScoringConfig;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A record with its priority score and bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecord<R> {
    /// The consolidated record.
    pub record: R,
    /// Weighted priority score in [0, 1].
    pub priority_score: f64,
    /// Assigned bucket.
    pub bucket: Bucket,
    /// Position of the record in the input batch.
    pub batch_index: usize,
}

/// Counts reported alongside a consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ConsolidationCounts {
    /// Records handed to the consolidator.
    pub total_analyzed: usize,
    /// Records that passed validation and were ranked.
    pub total_valid: usize,
    /// Records in the high bucket.
    pub high: usize,
    /// Records in the medium bucket.
    pub medium: usize,
    /// Valid records below the medium threshold.
    pub low: usize,
    /// `total_valid / total_analyzed`, or 0 for an empty batch.
    pub validation_rate: f64,
}

/// Result of consolidating a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consolidation<R> {
    /// Every valid record, highest score first.
    pub all: Vec<RankedRecord<R>>,
    /// High bucket, in ranking order.
    pub high: Vec<RankedRecord<R>>,
    /// Medium bucket, in ranking order.
    pub medium: Vec<RankedRecord<R>>,
    /// Batch counts.
    pub counts: ConsolidationCounts,
}

impl<R> Consolidation<R> {
    /// A consolidation of an empty batch.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            all: Vec::new(),
            high: Vec::new(),
            medium: Vec::new(),
            counts: ConsolidationCounts::default(),
        }
    }

    /// Valid records below the medium threshold, in ranking order.
    pub fn low(&self) -> impl Iterator<Item = &RankedRecord<R>> {
        self.all.iter().filter(|r| r.bucket == Bucket::Low)
    }
}

/// Ranks and buckets a batch of analysis records.
///
/// Ranking is deterministic: records are filtered to the valid ones, scored
/// with the configured weights, then stably sorted by descending score so that
/// ties keep their batch order.
#[derive(Debug, Clone, PartialEq)]
pub struct Consolidator {
    weights: ScoreWeights,
    thresholds: BucketThresholds,
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new(ScoreWeights::lead_default(), BucketThresholds::default())
    }
}

impl Consolidator {
    /// Creates a consolidator from validated weights and thresholds.
    #[must_use]
    pub fn new(weights: ScoreWeights, thresholds: BucketThresholds) -> Self {
        Self {
            weights,
            thresholds,
        }
    }

    /// Creates a consolidator from scoring configuration.
    pub fn from_config(config: &ScoringConfig) -> Result<Self, ConfigurationError> {
        Ok(Self::new(config.weights()?, config.thresholds()?))
    }

    /// Returns the weights.
    #[must_use]
    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Returns the thresholds.
    #[must_use]
    pub fn thresholds(&self) -> &BucketThresholds {
        &self.thresholds
    }

    /// Consolidates a batch.
    pub fn consolidate<R>(&self, records: Vec<R>) -> Consolidation<R>
    where
        R: Scored + Clone,
    {
        let total_analyzed = records.len();
        if total_analyzed == 0 {
            return Consolidation::empty();
        }

        let mut all: Vec<RankedRecord<R>> = records
            .into_iter()
            .enumerate()
            .filter(|(_, record)| record.is_valid())
            .map(|(batch_index, record)| {
                let priority_score = self.weights.score(&record);
                RankedRecord {
                    bucket: Bucket::classify(priority_score, &self.thresholds),
                    record,
                    priority_score,
                    batch_index,
                }
            })
            .collect();

        // Stable: equal scores keep batch order.
        all.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));

        let in_bucket = |bucket: Bucket| -> Vec<RankedRecord<R>> {
            all.iter().filter(|r| r.bucket == bucket).cloned().collect()
        };
        let high = in_bucket(Bucket::High);
        let medium = in_bucket(Bucket::Medium);

        let total_valid = all.len();
        #[allow(clippy::cast_precision_loss)]
        let validation_rate = total_valid as f64 / total_analyzed as f64;
        let counts = ConsolidationCounts {
            total_analyzed,
            total_valid,
            high: high.len(),
            medium: medium.len(),
            low: total_valid - high.len() - medium.len(),
            validation_rate,
        };

        debug!(
            total_analyzed,
            total_valid,
            high = counts.high,
            medium = counts.medium,
            "Consolidated batch"
        );

        Consolidation {
            all,
            high,
            medium,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn single_weight() -> Consolidator {
        Consolidator::new(
            ScoreWeights::new([("score", 1.0)]).unwrap(),
            BucketThresholds::default(),
        )
    }

    fn record(name: &str, score: f64) -> Value {
        json!({"name": name, "score": score})
    }

    fn names(records: &[RankedRecord<Value>]) -> Vec<&str> {
        records
            .iter()
            .map(|r| r.record["name"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_empty_batch_has_zero_counts() {
        let result = Consolidator::default().consolidate(Vec::<Value>::new());

        assert!(result.all.is_empty());
        assert_eq!(result.counts, ConsolidationCounts::default());
    }

    #[test]
    fn test_buckets_use_half_open_intervals() {
        let result = single_weight().consolidate(vec![
            record("a", 0.7),
            record("b", 0.5),
            record("c", 0.49999),
            record("d", 0.69999),
        ]);

        assert_eq!(names(&result.high), vec!["a"]);
        assert_eq!(names(&result.medium), vec!["d", "b"]);
        assert_eq!(result.low().count(), 1);
        assert_eq!(result.all.len(), 4);
        assert_eq!(result.counts.low, 1);
    }

    #[test]
    fn test_invalid_records_are_filtered() {
        let result = single_weight().consolidate(vec![
            record("a", 0.9),
            json!({"name": "b", "score": 1.0, "is_valid": false}),
            record("c", 0.1),
        ]);

        assert_eq!(result.counts.total_analyzed, 3);
        assert_eq!(result.counts.total_valid, 2);
        assert!((result.counts.validation_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(names(&result.all), vec!["a", "c"]);
    }

    #[test]
    fn test_ties_keep_batch_order() {
        let result = single_weight().consolidate(vec![
            record("first", 0.8),
            record("top", 0.95),
            record("second", 0.8),
            record("third", 0.8),
        ]);

        assert_eq!(names(&result.all), vec!["top", "first", "second", "third"]);
        assert_eq!(result.all[1].batch_index, 0);
    }

    #[test]
    fn test_consolidation_is_deterministic() {
        let batch: Vec<Value> = (0..50)
            .map(|i| record(&format!("item-{i}"), f64::from(i % 7) / 7.0))
            .collect();
        let consolidator = single_weight();

        let first = consolidator.consolidate(batch.clone());
        for _ in 0..10 {
            assert_eq!(consolidator.consolidate(batch.clone()), first);
        }
    }

    #[test]
    fn test_lead_weights_ranking() {
        let result = Consolidator::default().consolidate(vec![
            json!({"name": "weak", "validation_score": 0.2, "match_score": 0.2, "recommendation_score": 0.2}),
            json!({"name": "strong", "validation_score": 1.0, "match_score": 1.0, "recommendation_score": 0.5}),
            json!({"name": "mid", "validation_score": 0.5, "match_score": 0.5, "recommendation_score": 0.6}),
        ]);

        assert_eq!(names(&result.all), vec!["strong", "mid", "weak"]);
        assert_eq!(names(&result.high), vec!["strong"]);
        assert_eq!(names(&result.medium), vec!["mid"]);
    }

    #[test]
    fn test_from_config() {
        let config = ScoringConfig::default().with_weights([("a", 0.6), ("b", 0.3)]);
        assert!(Consolidator::from_config(&config).is_err());

        let config = ScoringConfig::default().with_weights([("a", 0.6), ("b", 0.4)]);
        let consolidator = Consolidator::from_config(&config).unwrap();
        assert_eq!(consolidator.weights().len(), 2);
    }
}
