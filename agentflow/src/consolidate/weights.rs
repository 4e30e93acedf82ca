//! Score weights, bucket thresholds and bucket assignment.

use crate::errors::{ConfigurationCodes, ConfigurationError, ContractErrorInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Allowed distance between the sum of the weights and 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

/// Scores are rounded to this many decimal places before bucketing.
const SCORE_PRECISION: f64 = 1e9;

/// Anything that exposes named sub-scores for weighted ranking.
pub trait Scored {
    /// Returns the sub-score with the given name, if present.
    fn sub_score(&self, name: &str) -> Option<f64>;

    /// Returns false if the record failed validation and must not be ranked.
    fn is_valid(&self) -> bool {
        true
    }
}

/// JSON records expose their numeric top-level fields as sub-scores and an
/// optional boolean `is_valid` flag (absent means valid).
impl Scored for serde_json::Value {
    fn sub_score(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(serde_json::Value::as_f64)
    }

    fn is_valid(&self) -> bool {
        self.get("is_valid")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }
}

/// A validated, ordered set of named weights summing to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreWeights {
    weights: Vec<(String, f64)>,
}

impl ScoreWeights {
    /// Validates and creates a weight set.
    pub fn new<I, K>(weights: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut validated: Vec<(String, f64)> = Vec::new();
        for (name, weight) in weights {
            let name = name.into();
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                return Err(weight_error(format!(
                    "Weight '{name}' must be within [0, 1], got {weight}"
                )));
            }
            if validated.iter().any(|(existing, _)| *existing == name) {
                return Err(weight_error(format!("Weight '{name}' is defined twice")));
            }
            validated.push((name, weight));
        }

        if validated.is_empty() {
            return Err(weight_error("At least one weight is required".to_string()));
        }

        let total: f64 = validated.iter().map(|(_, w)| w).sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(weight_error(format!("Weights sum to {total}, expected 1.0"))
                .with_error_info(
                    ContractErrorInfo::new(ConfigurationCodes::WEIGHTS, "Weights do not sum to 1.0")
                        .with_fix_hint(
                            ConfigurationCodes::suggestion(ConfigurationCodes::WEIGHTS)
                                .unwrap_or_default(),
                        )
                        .with_context_entry("total", total.to_string()),
                ));
        }

        Ok(Self { weights: validated })
    }

    /// Lead ranking weights: validation 0.3, pattern match 0.3, recommendation 0.4.
    #[must_use]
    pub fn lead_default() -> Self {
        Self {
            weights: vec![
                ("validation_score".to_string(), 0.3),
                ("match_score".to_string(), 0.3),
                ("recommendation_score".to_string(), 0.4),
            ],
        }
    }

    /// Iterates over `(name, weight)` pairs in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(name, w)| (name.as_str(), *w))
    }

    /// Returns the weight for a sub-score.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.iter().find(|(n, _)| *n == name).map(|(_, w)| w)
    }

    /// Returns the number of weights.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Always false for a validated weight set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Computes the priority score of a record.
    ///
    /// Missing or non-finite sub-scores count as 0 and every sub-score is
    /// clamped to [0, 1]. The result is rounded to nine decimal places so
    /// that threshold comparisons are not at the mercy of float drift.
    #[must_use]
    pub fn score<R: Scored + ?Sized>(&self, record: &R) -> f64 {
        let raw: f64 = self
            .weights
            .iter()
            .map(|(name, weight)| {
                let sub = record
                    .sub_score(name)
                    .filter(|s| s.is_finite())
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0);
                weight * sub
            })
            .sum();
        ((raw * SCORE_PRECISION).round() / SCORE_PRECISION).clamp(0.0, 1.0)
    }
}

fn weight_error(message: String) -> ConfigurationError {
    let info = ContractErrorInfo::new(ConfigurationCodes::WEIGHTS, message.clone()).with_fix_hint(
        ConfigurationCodes::suggestion(ConfigurationCodes::WEIGHTS).unwrap_or_default(),
    );
    ConfigurationError::new(message)
        .with_field("scoring.weights")
        .with_error_info(info)
}

/// Lower bounds of the high and medium buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketThresholds {
    high: f64,
    medium: f64,
}

impl Default for BucketThresholds {
    fn default() -> Self {
        Self {
            high: Self::DEFAULT_HIGH,
            medium: Self::DEFAULT_MEDIUM,
        }
    }
}

impl BucketThresholds {
    /// Default lower bound of the high bucket.
    pub const DEFAULT_HIGH: f64 = 0.7;
    /// Default lower bound of the medium bucket.
    pub const DEFAULT_MEDIUM: f64 = 0.5;

    /// Validates and creates thresholds.
    pub fn new(high: f64, medium: f64) -> Result<Self, ConfigurationError> {
        let in_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_range(high) || !in_range(medium) || high < medium {
            let message = format!("Invalid bucket thresholds: high={high}, medium={medium}");
            return Err(ConfigurationError::new(message.clone())
                .with_field("scoring.thresholds")
                .with_error_info(
                    ContractErrorInfo::new(ConfigurationCodes::THRESHOLDS, message).with_fix_hint(
                        ConfigurationCodes::suggestion(ConfigurationCodes::THRESHOLDS)
                            .unwrap_or_default(),
                    ),
                ));
        }
        Ok(Self { high, medium })
    }

    /// Lower bound of the high bucket.
    #[must_use]
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Lower bound of the medium bucket.
    #[must_use]
    pub fn medium(&self) -> f64 {
        self.medium
    }
}

/// Priority bucket of a ranked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// `score >= high`.
    High,
    /// `medium <= score < high`.
    Medium,
    /// Below `medium`; kept in the full result set only.
    Low,
}

impl Bucket {
    /// Assigns a bucket using half-open intervals.
    #[must_use]
    pub fn classify(score: f64, thresholds: &BucketThresholds) -> Self {
        if score >= thresholds.high {
            Self::High
        } else if score >= thresholds.medium {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}
