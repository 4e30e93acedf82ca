//! Configuration for agentflow runs.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. [`AgentflowConfig::validate`] is the single place
//! misconfiguration is detected; nothing is re-checked at run time.

use crate::consolidate::{BucketThresholds, ScoreWeights};
use crate::errors::{AgentflowError, ConfigurationCodes, ConfigurationError, ContractErrorInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::Level;

/// Environment variable overriding [`LoggingConfig::level`].
pub const ENV_LOG_LEVEL: &str = "AGENTFLOW_LOG_LEVEL";
/// Environment variable overriding [`AgentflowConfig::call_timeout_ms`].
pub const ENV_CALL_TIMEOUT_MS: &str = "AGENTFLOW_CALL_TIMEOUT_MS";
/// Environment variable overriding [`AgentflowConfig::max_iterations`].
pub const ENV_MAX_ITERATIONS: &str = "AGENTFLOW_MAX_ITERATIONS";

/// Top-level configuration for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentflowConfig {
    /// Timeout applied to every external collaborator call, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Optional timeout applied to a whole stage, in milliseconds.
    #[serde(default)]
    pub stage_timeout_ms: Option<u64>,
    /// Optional cap on concurrently running fan-out tasks.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Default iteration cap for retry loops.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Consolidation scoring.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_max_iterations() -> u32 {
    3
}

impl Default for AgentflowConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            stage_timeout_ms: None,
            max_concurrency: None,
            max_iterations: default_max_iterations(),
            scoring: ScoringConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AgentflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(raw: &str) -> Result<Self, AgentflowError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `AGENTFLOW_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigurationError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides looked up by environment variable name.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(raw) = lookup(ENV_CALL_TIMEOUT_MS) {
            self.call_timeout_ms = parse_override(ENV_CALL_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            self.max_iterations = parse_override(ENV_MAX_ITERATIONS, &raw)?;
        }
        Ok(self)
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Sets the per-stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    /// Caps the number of concurrent fan-out tasks.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Sets the default retry loop iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Replaces the scoring configuration.
    #[must_use]
    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// Replaces the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Gets the call timeout as a Duration.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Gets the stage timeout as a Duration.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.call_timeout_ms == 0 {
            return Err(limit_error("call_timeout_ms", "Call timeout must be positive"));
        }
        if self.stage_timeout_ms == Some(0) {
            return Err(limit_error("stage_timeout_ms", "Stage timeout must be positive"));
        }
        if self.max_concurrency == Some(0) {
            return Err(limit_error("max_concurrency", "Concurrency cap must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(limit_error("max_iterations", "Iteration cap must be positive"));
        }
        self.scoring.weights()?;
        self.scoring.thresholds()?;
        self.logging.tracing_level()?;
        Ok(())
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigurationError> {
    raw.trim().parse().map_err(|_| {
        ConfigurationError::new(format!("{name} is not a valid number: '{raw}'"))
            .with_field(name)
            .with_error_info(
                ContractErrorInfo::new(ConfigurationCodes::LIMITS, "Unparseable override")
                    .with_fix_hint("Set the variable to a positive integer."),
            )
    })
}

fn limit_error(field: &str, message: &str) -> ConfigurationError {
    ConfigurationError::new(message)
        .with_field(field)
        .with_error_info(
            ContractErrorInfo::new(ConfigurationCodes::LIMITS, message).with_fix_hint(
                ConfigurationCodes::suggestion(ConfigurationCodes::LIMITS).unwrap_or_default(),
            ),
        )
}

/// Weighted scoring and bucket thresholds for consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Sub-score name to weight. Must sum to 1.0.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
    /// Minimum score for the high bucket.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    /// Minimum score for the medium bucket.
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
}

fn default_weights() -> BTreeMap<String, f64> {
    ScoreWeights::lead_default().iter().map(|(name, w)| (name.to_string(), w)).collect()
}

fn default_high_threshold() -> f64 {
    BucketThresholds::DEFAULT_HIGH
}

fn default_medium_threshold() -> f64 {
    BucketThresholds::DEFAULT_MEDIUM
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
        }
    }
}

impl ScoringConfig {
    /// Sets a single weight.
    #[must_use]
    pub fn with_weight(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(name.into(), weight);
        self
    }

    /// Replaces all weights.
    #[must_use]
    pub fn with_weights<I, K>(mut self, weights: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        self.weights = weights.into_iter().map(|(k, w)| (k.into(), w)).collect();
        self
    }

    /// Sets both thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, high: f64, medium: f64) -> Self {
        self.high_threshold = high;
        self.medium_threshold = medium;
        self
    }

    /// Builds validated weights.
    pub fn weights(&self) -> Result<ScoreWeights, ConfigurationError> {
        ScoreWeights::new(self.weights.iter().map(|(k, w)| (k.clone(), *w)))
    }

    /// Builds validated thresholds.
    pub fn thresholds(&self) -> Result<BucketThresholds, ConfigurationError> {
        BucketThresholds::new(self.high_threshold, self.medium_threshold)
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of DEBUG, INFO, WARNING, ERROR, CRITICAL (case-insensitive).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Switches JSON output on or off.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Maps the configured level onto a `tracing` level.
    ///
    /// CRITICAL has no `tracing` counterpart and maps to ERROR.
    pub fn tracing_level(&self) -> Result<Level, ConfigurationError> {
        match self.level.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::TRACE),
            "DEBUG" => Ok(Level::DEBUG),
            "INFO" => Ok(Level::INFO),
            "WARNING" | "WARN" => Ok(Level::WARN),
            "ERROR" | "CRITICAL" => Ok(Level::ERROR),
            _ => Err(ConfigurationError::new(format!("Unknown log level '{}'", self.level))
                .with_field("logging.level")
                .with_error_info(
                    ContractErrorInfo::new(ConfigurationCodes::LOGGING, "Unknown log level")
                        .with_fix_hint(
                            ConfigurationCodes::suggestion(ConfigurationCodes::LOGGING)
                                .unwrap_or_default(),
                        )
                        .with_context_entry("level", self.level.clone()),
                )),
        }
    }
}
