//! # Stage: Experiment Data Model
//!
//! ## Responsibility
//! The three durable entities of the engine (Experiment, Variant,
//! MetricSample) plus the value types they are built from: identifiers,
//! content references, lifecycle status and traffic splits.
//!
//! ## Guarantees
//! - Status transitions are checked by [`ExperimentStatus::can_transition_to`];
//!   `stopped` and `completed` are terminal
//! - [`TrafficSplit`] is stored in tenths of a percent so cumulative split
//!   checks are exact integer arithmetic
//! - Non-panicking: all conversions from untrusted input return `Option`/`Result`
//!
//! ## NOT Responsible For
//! - Persistence (see [`crate::store`])
//! - Enforcing cross-entity rules such as the 100% split cap (see [`crate::service`])

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Free-form JSON metadata attached to experiments and variants.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }
    };
}

macro_rules! external_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

row_id!(
    /// Storage identity of an experiment.
    ExperimentId
);
row_id!(
    /// Storage identity of a variant (control included).
    VariantId
);
row_id!(
    /// Storage identity of one metric sample row.
    SampleId
);

external_ref!(
    /// Reference to a content artifact owned by the content system.
    ContentRef
);
external_ref!(
    /// Reference to the owning campaign or content plan.
    CampaignRef
);
external_ref!(
    /// Reference to the user performing an operation.
    UserRef
);

// ---------------------------------------------------------------------------
// ExperimentStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an experiment, mirrored by each of its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Active,
    Paused,
    Stopped,
    Completed,
}

impl ExperimentStatus {
    pub const ALL: [ExperimentStatus; 5] = [
        ExperimentStatus::Draft,
        ExperimentStatus::Active,
        ExperimentStatus::Paused,
        ExperimentStatus::Stopped,
        ExperimentStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Active => "active",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Stopped => "stopped",
            ExperimentStatus::Completed => "completed",
        }
    }

    /// `true` for states no transition can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExperimentStatus::Stopped | ExperimentStatus::Completed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Draft, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active | Paused, Stopped)
                | (Active | Paused, Completed)
        )
    }

    /// Checked transition: returns the target state or the validation error
    /// an operator should see.
    pub fn transition(self, next: ExperimentStatus) -> Result<ExperimentStatus, ValidationError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ValidationError::IllegalTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ExperimentStatus::Draft),
            "active" => Ok(ExperimentStatus::Active),
            "paused" => Ok(ExperimentStatus::Paused),
            "stopped" => Ok(ExperimentStatus::Stopped),
            "completed" => Ok(ExperimentStatus::Completed),
            other => Err(format!("unknown experiment status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// TrafficSplit
// ---------------------------------------------------------------------------

/// Share of experiment traffic assigned to one variant, with one-decimal
/// precision. Stored as tenths of a percent (`0..=1000`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct TrafficSplit(u16);

impl TrafficSplit {
    pub const ZERO: TrafficSplit = TrafficSplit(0);
    pub const FULL: TrafficSplit = TrafficSplit(1000);

    /// Convert a percentage, rounding to the nearest tenth. `None` when the
    /// value is not finite or lies outside `0..=100`.
    pub fn from_percent(pct: f64) -> Option<Self> {
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return None;
        }
        Some(Self((pct * 10.0).round() as u16))
    }

    pub fn from_tenths(tenths: u16) -> Option<Self> {
        (tenths <= Self::FULL.0).then_some(Self(tenths))
    }

    pub fn tenths(self) -> u16 {
        self.0
    }

    pub fn as_percent(self) -> f64 {
        f64::from(self.0) / 10.0
    }

    /// Equal share for `count` variants: `100 / count` rounded to one
    /// decimal, rounded down instead when rounding up would overflow 100%.
    pub fn even_share(count: usize) -> Option<Self> {
        if count == 0 {
            return None;
        }
        let count = u32::try_from(count).ok()?;
        let full = u32::from(Self::FULL.0);
        let nearest = (f64::from(full) / f64::from(count)).round() as u32;
        let tenths = if nearest * count > full { full / count } else { nearest };
        u16::try_from(tenths).ok().and_then(Self::from_tenths)
    }

    /// Sum of splits in tenths; never saturates because variant counts are bounded
    /// by `u32` in practice.
    pub fn total<'a>(splits: impl IntoIterator<Item = &'a TrafficSplit>) -> u32 {
        splits.into_iter().map(|s| u32::from(s.0)).sum()
    }
}

impl TryFrom<f64> for TrafficSplit {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_percent(value).ok_or_else(|| format!("traffic split must be in [0, 100], got {value}"))
    }
}

impl From<TrafficSplit> for f64 {
    fn from(split: TrafficSplit) -> f64 {
        split.as_percent()
    }
}

impl fmt::Display for TrafficSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.as_percent())
    }
}

// ---------------------------------------------------------------------------
// ExperimentConfig — creation input
// ---------------------------------------------------------------------------

/// Everything needed to create an experiment in `draft`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    pub campaign: CampaignRef,
    #[serde(default)]
    pub description: String,
    /// Metric the winner is judged on, e.g. `"click_rate"`.
    pub primary_goal: String,
    /// Target confidence in percent (must be one of the configured levels).
    pub confidence_level: u8,
    /// Aggregate sample size across all arms required before completion.
    pub minimum_sample_size: u64,
    pub duration_days: u32,
    /// Share of the total audience enrolled in the experiment, in percent.
    #[serde(default = "default_traffic_allocation")]
    pub traffic_allocation: f64,
    pub control_content: ContentRef,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_traffic_allocation() -> f64 {
    100.0
}

impl ExperimentConfig {
    /// Collect every configuration problem instead of stopping at the first.
    pub fn validate(&self, allowed_confidence_levels: &[u8]) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(ValidationError::EmptyName);
        }
        if self.control_content.is_blank() {
            errors.push(ValidationError::MissingControl);
        }
        if self.primary_goal.trim().is_empty() {
            errors.push(ValidationError::MissingPrimaryGoal);
        }
        if !allowed_confidence_levels.contains(&self.confidence_level) {
            errors.push(ValidationError::UnsupportedConfidenceLevel {
                level: self.confidence_level,
                allowed: allowed_confidence_levels.to_vec(),
            });
        }
        if self.minimum_sample_size == 0 {
            errors.push(ValidationError::NonPositiveMinimumSampleSize);
        }
        if self.duration_days == 0 {
            errors.push(ValidationError::NonPositiveDuration);
        }
        if !self.traffic_allocation.is_finite()
            || self.traffic_allocation <= 0.0
            || self.traffic_allocation > 100.0
        {
            errors.push(ValidationError::InvalidTrafficAllocation(self.traffic_allocation));
        }
        errors
    }
}

// ---------------------------------------------------------------------------
// Experiment / Variant / MetricSample
// ---------------------------------------------------------------------------

/// A single content A/B test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub name: String,
    pub campaign: CampaignRef,
    pub created_by: UserRef,
    pub description: String,
    pub primary_goal: String,
    pub confidence_level: u8,
    pub minimum_sample_size: u64,
    pub duration_days: u32,
    pub traffic_allocation: f64,
    pub control_content: ContentRef,
    pub status: ExperimentStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    /// Days elapsed since start, clamped at the end date for finished tests.
    pub fn days_running(&self, now: DateTime<Utc>) -> i64 {
        match self.start_date {
            None => 0,
            Some(start) => {
                let until = match (self.status.is_terminal(), self.end_date) {
                    (true, Some(end)) => end.min(now),
                    _ => now,
                };
                (until - start).num_days().max(0)
            }
        }
    }

    /// `true` when an active experiment has run past its planned window.
    pub fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ExperimentStatus::Active && self.end_date.is_some_and(|end| now >= end)
    }
}

/// Ceiling for a variant's running sample size. Matches the signed 64-bit
/// column the durable store keeps it in.
pub const MAX_SAMPLE_SIZE: u64 = i64::MAX as u64;

/// One arm of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub experiment_id: ExperimentId,
    pub name: String,
    pub content_ref: ContentRef,
    pub traffic_split: TrafficSplit,
    pub is_control: bool,
    pub status: ExperimentStatus,
    /// Running total of recorded sample sizes.
    pub sample_size: u64,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// One recorded observation of a named metric for a variant on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: SampleId,
    pub experiment_id: ExperimentId,
    pub variant_id: VariantId,
    pub metric_name: String,
    pub value: f64,
    pub sample_size: u64,
    pub recorded_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

/// A variant about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVariant {
    pub name: String,
    pub content_ref: ContentRef,
    pub traffic_split: TrafficSplit,
    pub is_control: bool,
    pub status: ExperimentStatus,
    pub created_at: DateTime<Utc>,
}

/// A sample about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub variant_id: VariantId,
    pub metric_name: String,
    pub value: f64,
    pub sample_size: u64,
    pub recorded_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

/// One entry of an ingestion batch, as supplied by reporting pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub variant_id: VariantId,
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub sample_size: u64,
    /// Day the observation belongs to; defaults to the current day.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl ResultEntry {
    pub fn new(variant_id: VariantId, metric_name: impl Into<String>, value: f64, sample_size: u64) -> Self {
        Self { variant_id, metric_name: metric_name.into(), value, sample_size, date: None }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

// ---------------------------------------------------------------------------
// ExperimentAggregate — the unit of contention
// ---------------------------------------------------------------------------

/// An experiment loaded together with all of its variants.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentAggregate {
    pub experiment: Experiment,
    /// Variants in creation order; the control comes first.
    pub variants: Vec<Variant>,
}

impl ExperimentAggregate {
    pub fn id(&self) -> ExperimentId {
        self.experiment.id
    }

    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }

    /// Non-control arms.
    pub fn treatments(&self) -> impl Iterator<Item = &Variant> {
        self.variants.iter().filter(|v| !v.is_control)
    }

    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// Cumulative split of non-control arms, in tenths of a percent.
    pub fn allocated_tenths(&self) -> u32 {
        TrafficSplit::total(self.treatments().map(|v| &v.traffic_split))
    }

    /// Share the control receives implicitly.
    pub fn control_share(&self) -> TrafficSplit {
        let remaining = u32::from(TrafficSplit::FULL.tenths()).saturating_sub(self.allocated_tenths());
        u16::try_from(remaining).ok().and_then(TrafficSplit::from_tenths).unwrap_or(TrafficSplit::ZERO)
    }

    /// Sum of running sample sizes across every arm, control included.
    pub fn total_sample_size(&self) -> u64 {
        self.variants.iter().fold(0u64, |acc, v| acc.saturating_add(v.sample_size))
    }

    /// `true` when `content` is already linked to the control or a variant.
    pub fn uses_content(&self, content: &ContentRef) -> bool {
        self.experiment.control_content == *content || self.variants.iter().any(|v| v.content_ref == *content)
    }
}

/// Samples grouped per variant, the input of every analysis routine.
pub type SamplesByVariant = BTreeMap<VariantId, Vec<MetricSample>>;

/// Group a flat sample list by variant, preserving insertion order.
pub fn group_by_variant(samples: Vec<MetricSample>) -> SamplesByVariant {
    let mut grouped = SamplesByVariant::new();
    for sample in samples {
        grouped.entry(sample.variant_id).or_default().push(sample);
    }
    grouped
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
