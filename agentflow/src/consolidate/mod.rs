//! Weighted scoring, ranking and bucketing of analyzed records.

mod consolidator;
mod stage;
mod weights;

pub use consolidator::{Consolidation, ConsolidationCounts, Consolidator, RankedRecord};
pub use stage::ConsolidateStage;
pub use weights::{Bucket, BucketThresholds, ScoreWeights, Scored, WEIGHT_SUM_TOLERANCE};
