//! # Engine Configuration
//!
//! Explicit configuration value threaded into
//! [`ExperimentService::new`](crate::service::ExperimentService::new). There is
//! no process-wide state: two services in one process may run with different
//! settings.
//!
//! Mirrors the TOML layout accepted by the CLI `--config` flag:
//! ```toml
//! allowed_confidence_levels = [90, 95, 99]
//! trend_window_days = 7
//! trend_threshold   = 0.05
//! rate_unit         = "percent"
//! lower_is_better   = ["bounce_rate", "cost_per_click"]
//!
//! [metric_families]
//! opens = "count"
//!
//! [storage]
//! backend = "sqlite"
//! path    = "experiments.db"
//! busy_timeout_ms = 5000
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::MetricFamily;
use crate::error::{ExperimentError, Result};

/// How rate metrics are expressed by reporting pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    /// `2.5` means 2.5%.
    Percent,
    /// `0.025` means 2.5%.
    Fraction,
}

impl RateUnit {
    /// Convert a reported rate to a proportion in `[0, 1]`.
    pub fn to_proportion(self, value: f64) -> f64 {
        let p = match self {
            RateUnit::Percent => value / 100.0,
            RateUnit::Fraction => value,
        };
        p.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Storage settings used by the binary; library callers construct stores
/// directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
    /// How long a writer waits for the SQLite write lock before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from("experiments.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Tunables of the orchestration service and the analysis module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Confidence levels (percent) an experiment may target.
    pub allowed_confidence_levels: Vec<u8>,
    /// Number of most recent days used for the trend signal.
    pub trend_window_days: usize,
    /// Relative daily slope above which a metric counts as still moving.
    pub trend_threshold: f64,
    pub rate_unit: RateUnit,
    /// Metrics where a smaller value is the better outcome.
    pub lower_is_better: Vec<String>,
    /// Explicit family per metric name; unlisted names are classified by suffix.
    pub metric_families: BTreeMap<String, MetricFamily>,
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allowed_confidence_levels: vec![90, 95, 99],
            trend_window_days: 7,
            trend_threshold: 0.05,
            rate_unit: RateUnit::Percent,
            lower_is_better: vec![
                "bounce_rate".into(),
                "unsubscribe_rate".into(),
                "cost_per_click".into(),
                "cost_per_acquisition".into(),
            ],
            metric_families: BTreeMap::new(),
            storage: StorageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)
            .map_err(|e| ExperimentError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(target: "experiments::config", path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Parse and validate TOML text. Missing keys fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| ExperimentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.allowed_confidence_levels.is_empty() {
            problems.push("allowed_confidence_levels must not be empty".to_string());
        }
        for &level in &self.allowed_confidence_levels {
            if !(1..=99).contains(&level) {
                problems.push(format!("confidence level must be in [1, 99], got {level}"));
            }
        }
        if self.trend_window_days < 2 {
            problems.push(format!("trend_window_days must be >= 2, got {}", self.trend_window_days));
        }
        if !self.trend_threshold.is_finite() || self.trend_threshold <= 0.0 {
            problems.push(format!("trend_threshold must be > 0, got {}", self.trend_threshold));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ExperimentError::Config(problems.join("; ")))
        }
    }

    pub fn is_lower_better(&self, metric: &str) -> bool {
        self.lower_is_better.iter().any(|m| m == metric)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
