//! # Stage: Metric Aggregators
//!
//! ## Responsibility
//! One [`MetricAggregator`] per metric family. Every family reports the same
//! row-level summary (`count`, `total`, unweighted `average`), but each picks
//! the significance test that fits how its values are produced:
//!
//! | family       | examples                         | test                          |
//! |--------------|----------------------------------|-------------------------------|
//! | `rate`       | `click_rate`, `open_rate`, `ctr` | pooled two-proportion z-test  |
//! | `count`      | `conversions`, `impressions`     | Welch t on per-observation rows |
//! | `continuous` | `revenue`, `time_on_page`        | Welch t on raw rows           |
//!
//! The aggregator for a metric is chosen by name through
//! [`AggregatorRegistry::for_metric`], with explicit overrides from
//! [`EngineConfig::metric_families`](crate::config::EngineConfig).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, RateUnit};
use crate::model::MetricSample;
use crate::stats::{two_proportion_z_test, welch_t_test, RowStats, TestResult};

/// Metric families with distinct comparison semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFamily {
    Rate,
    Count,
    Continuous,
}

const COUNT_METRICS: &[&str] = &[
    "clicks",
    "comments",
    "conversions",
    "impressions",
    "likes",
    "opens",
    "reach",
    "replies",
    "sends",
    "shares",
    "signups",
    "unsubscribes",
    "views",
];

impl MetricFamily {
    /// Classify a metric by its name when no override is configured.
    pub fn classify(metric_name: &str) -> Self {
        let name = metric_name.trim().to_ascii_lowercase();
        if name.ends_with("_rate") || name == "ctr" || name.ends_with("_ctr") || name.ends_with("_pct") {
            MetricFamily::Rate
        } else if name.ends_with("_count") || COUNT_METRICS.contains(&name.as_str()) {
            MetricFamily::Count
        } else {
            MetricFamily::Continuous
        }
    }
}

impl std::fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricFamily::Rate => write!(f, "rate"),
            MetricFamily::Count => write!(f, "count"),
            MetricFamily::Continuous => write!(f, "continuous"),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricAggregate — the row-level summary every family shares
// ---------------------------------------------------------------------------

/// Summary of all rows recorded for one metric of one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    /// Number of sample rows.
    pub count: usize,
    /// Sum of row values.
    pub total: f64,
    /// Unweighted mean across rows.
    pub average: f64,
    /// Sum of the rows' `sample_size`.
    pub observations: u64,
}

impl MetricAggregate {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a MetricSample>) -> Self {
        let mut stats = RowStats::new();
        let mut observations = 0u64;
        for row in rows {
            stats.record(row.value);
            observations = observations.saturating_add(row.sample_size);
        }
        Self { count: stats.count(), total: stats.sum(), average: stats.mean(), observations }
    }
}

// ---------------------------------------------------------------------------
// MetricAggregator
// ---------------------------------------------------------------------------

/// Family-specific summary and significance behaviour.
pub trait MetricAggregator: Send + Sync {
    fn family(&self) -> MetricFamily;

    /// Row-level summary. Rows are the unit of aggregation for every family.
    fn summarize(&self, rows: &[&MetricSample]) -> MetricAggregate {
        MetricAggregate::from_rows(rows.iter().copied())
    }

    /// Compare treatment rows against control rows. `None` when there is not
    /// enough data for the family's test.
    fn significance(&self, control: &[&MetricSample], treatment: &[&MetricSample]) -> Option<TestResult>;
}

/// Rates reported as percent or fraction, compared as pooled proportions.
#[derive(Debug, Clone, Copy)]
pub struct RateAggregator {
    pub unit: RateUnit,
}

impl RateAggregator {
    /// Observation-weighted proportion and its observation count.
    fn pooled(&self, rows: &[&MetricSample]) -> (f64, f64) {
        let n: f64 = rows.iter().map(|r| r.sample_size as f64).sum();
        if n <= 0.0 {
            return (0.0, 0.0);
        }
        let successes: f64 = rows
            .iter()
            .map(|r| self.unit.to_proportion(r.value) * r.sample_size as f64)
            .sum();
        (successes / n, n)
    }
}

impl MetricAggregator for RateAggregator {
    fn family(&self) -> MetricFamily {
        MetricFamily::Rate
    }

    fn significance(&self, control: &[&MetricSample], treatment: &[&MetricSample]) -> Option<TestResult> {
        let (p_c, n_c) = self.pooled(control);
        let (p_t, n_t) = self.pooled(treatment);
        if n_c > 0.0 && n_t > 0.0 {
            return two_proportion_z_test(p_c, n_c, p_t, n_t);
        }
        // Rows without observation counts: fall back to comparing the rows themselves.
        let c: RowStats = control.iter().map(|r| self.unit.to_proportion(r.value)).collect();
        let t: RowStats = treatment.iter().map(|r| self.unit.to_proportion(r.value)).collect();
        welch_t_test(&c, &t)
    }
}

/// Daily counts, normalised per observation so arms with different traffic
/// shares stay comparable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountAggregator;

impl CountAggregator {
    fn per_observation(rows: &[&MetricSample]) -> RowStats {
        rows.iter()
            .filter(|r| r.sample_size > 0)
            .map(|r| r.value / r.sample_size as f64)
            .collect()
    }
}

impl MetricAggregator for CountAggregator {
    fn family(&self) -> MetricFamily {
        MetricFamily::Count
    }

    fn significance(&self, control: &[&MetricSample], treatment: &[&MetricSample]) -> Option<TestResult> {
        let c = Self::per_observation(control);
        let t = Self::per_observation(treatment);
        if c.count() >= 2 && t.count() >= 2 {
            return welch_t_test(&c, &t);
        }
        let c: RowStats = control.iter().map(|r| r.value).collect();
        let t: RowStats = treatment.iter().map(|r| r.value).collect();
        welch_t_test(&c, &t)
    }
}

/// Arbitrary numeric metrics compared on raw row values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuousAggregator;

impl MetricAggregator for ContinuousAggregator {
    fn family(&self) -> MetricFamily {
        MetricFamily::Continuous
    }

    fn significance(&self, control: &[&MetricSample], treatment: &[&MetricSample]) -> Option<TestResult> {
        let c: RowStats = control.iter().map(|r| r.value).collect();
        let t: RowStats = treatment.iter().map(|r| r.value).collect();
        welch_t_test(&c, &t)
    }
}

// ---------------------------------------------------------------------------
// AggregatorRegistry
// ---------------------------------------------------------------------------

/// Resolves the aggregator for a metric name.
#[derive(Debug, Clone)]
pub struct AggregatorRegistry {
    rate: RateAggregator,
    count: CountAggregator,
    continuous: ContinuousAggregator,
    overrides: BTreeMap<String, MetricFamily>,
}

impl AggregatorRegistry {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            rate: RateAggregator { unit: config.rate_unit },
            count: CountAggregator,
            continuous: ContinuousAggregator,
            overrides: config.metric_families.clone(),
        }
    }

    pub fn family_of(&self, metric_name: &str) -> MetricFamily {
        self.overrides
            .get(metric_name)
            .copied()
            .unwrap_or_else(|| MetricFamily::classify(metric_name))
    }

    pub fn for_metric(&self, metric_name: &str) -> &dyn MetricAggregator {
        match self.family_of(metric_name) {
            MetricFamily::Rate => &self.rate,
            MetricFamily::Count => &self.count,
            MetricFamily::Continuous => &self.continuous,
        }
    }
}

impl Default for AggregatorRegistry {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
