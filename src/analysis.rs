//! # Stage: Analysis & Reporting
//!
//! ## Responsibility
//! Turn an experiment snapshot plus its sample ledger into operator-facing
//! structures: per-metric summaries, comparisons against control, daily
//! trends, a winner verdict and a prioritised list of recommendations.
//!
//! ## Guarantees
//! - Never fails: missing control, missing metrics or an empty ledger yield
//!   empty sections, never an error
//! - Never declares a winner below the experiment's confidence target, and
//!   always exposes the confidence actually achieved
//! - Never declares a winner before the experiment-wide sample size reaches
//!   `minimum_sample_size`
//! - Recommendations are non-empty for any non-draft experiment with at least
//!   one recorded sample
//! - Pure: identical inputs produce identical outputs
//!
//! ## NOT Responsible For
//! - Loading data (see [`crate::service`])
//! - Choosing a significance test per metric (see [`crate::aggregate`])

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::aggregate::{AggregatorRegistry, MetricAggregate};
use crate::config::EngineConfig;
use crate::model::{
    ContentRef, ExperimentAggregate, ExperimentId, ExperimentStatus, MetricSample, SamplesByVariant,
    TrafficSplit, Variant, VariantId,
};
use crate::stats::{linear_slope, TestResult};

/// Per-metric summaries of one arm, keyed by metric name.
pub type MetricSummary = BTreeMap<String, MetricAggregate>;

// ---------------------------------------------------------------------------
// Comparison and snapshot types
// ---------------------------------------------------------------------------

/// One metric of a variant set against the same metric of control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricComparison {
    pub control_average: f64,
    pub variant_average: f64,
    /// `variant_average - control_average`.
    pub delta: f64,
    /// Delta relative to control, in percent. `None` when control averages 0.
    pub relative_improvement: Option<f64>,
    /// Whether the variant is ahead, honouring `lower_is_better` metrics.
    pub improved: bool,
}

/// Snapshot of one arm for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArmResult {
    pub variant_id: VariantId,
    pub variant_name: String,
    pub content_ref: ContentRef,
    /// For the control this is the implicit remainder.
    pub traffic_split: TrafficSplit,
    pub is_control: bool,
    pub status: ExperimentStatus,
    pub sample_size: u64,
    pub metrics: MetricSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentResults {
    pub control: Option<ArmResult>,
    pub variants: Vec<ArmResult>,
}

// ---------------------------------------------------------------------------
// Trends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
    /// Fewer than two days of data inside the window.
    Insufficient,
}

impl TrendDirection {
    pub fn is_moving(self) -> bool {
        matches!(self, TrendDirection::Rising | TrendDirection::Falling)
    }
}

/// Daily summary of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub average: f64,
    pub rows: usize,
    pub observations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricTrend {
    pub points: Vec<TrendPoint>,
    pub direction: TrendDirection,
    /// OLS slope per day over the trend window, divided by the window mean.
    pub relative_slope: Option<f64>,
    /// Moving in the metric's favourable direction.
    pub improving: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantTrend {
    pub variant_id: VariantId,
    pub variant_name: String,
    pub is_control: bool,
    pub metrics: BTreeMap<String, MetricTrend>,
}

// ---------------------------------------------------------------------------
// Winner declaration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    /// Experiment-wide sample size below the minimum.
    InsufficientData,
    /// Enough data, but no arm separates from control at the target confidence.
    Inconclusive,
    VariantWins { variant_id: VariantId, variant_name: String },
    /// Every tested variant is significantly worse than control.
    ControlHolds,
}

/// Primary-metric comparison of one treatment arm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateResult {
    pub variant_id: VariantId,
    pub variant_name: String,
    pub control_average: Option<f64>,
    pub variant_average: Option<f64>,
    pub relative_improvement: Option<f64>,
    pub better_than_control: bool,
    pub significant: bool,
    pub confidence_achieved: Option<f64>,
    pub test: Option<TestResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinnerDeclaration {
    pub verdict: Verdict,
    /// The experiment's primary goal metric.
    pub metric: String,
    pub confidence_target: u8,
    /// Confidence of the winner, or the best any candidate reached.
    pub confidence_achieved: Option<f64>,
    pub total_sample_size: u64,
    pub minimum_sample_size: u64,
    pub candidates: Vec<CandidateResult>,
}

impl WinnerDeclaration {
    pub fn winner(&self) -> Option<VariantId> {
        match &self.verdict {
            Verdict::VariantWins { variant_id, .. } => Some(*variant_id),
            _ => None,
        }
    }

    pub fn is_conclusive(&self) -> bool {
        matches!(self.verdict, Verdict::VariantWins { .. } | Verdict::ControlHolds)
    }

    /// Variant ahead of control by the largest margin, significant or not.
    pub fn leader(&self) -> Option<&CandidateResult> {
        self.candidates
            .iter()
            .filter(|c| c.better_than_control)
            .max_by(|a, b| {
                let ra = a.relative_improvement.map(f64::abs).unwrap_or(0.0);
                let rb = b.relative_improvement.map(f64::abs).unwrap_or(0.0);
                ra.total_cmp(&rb)
            })
    }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// Ordered so that sorting ascending puts `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    InsufficientSampleSize,
    Inconclusive,
    ClearWinner,
    KeepControl,
    ExtendTest,
    LeadingVariant,
    DurationElapsed,
    CollectData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub message: String,
    pub priority: Priority,
}

impl Recommendation {
    fn new(kind: RecommendationKind, priority: Priority, message: String) -> Self {
        Self { kind, message, priority }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSummary {
    pub experiment_id: ExperimentId,
    pub name: String,
    pub status: ExperimentStatus,
    pub primary_goal: String,
    pub confidence_level: u8,
    pub minimum_sample_size: u64,
    /// Percentage of eligible traffic enrolled in the experiment.
    pub traffic_allocation: f64,
    /// Sum of running sample sizes across all arms.
    pub total_sample_size: u64,
    /// `total_sample_size` as a percentage of the minimum.
    pub sample_progress: f64,
    /// Number of non-control arms.
    pub variant_count: usize,
    pub days_running: i64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub test_summary: TestSummary,
    pub current_results: CurrentResults,
    pub performance_trends: Vec<VariantTrend>,
    pub winner: WinnerDeclaration,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

fn rows_for<'a>(samples: &'a SamplesByVariant, variant: VariantId, metric: &str) -> Vec<&'a MetricSample> {
    samples
        .get(&variant)
        .map(|rows| rows.iter().filter(|r| r.metric_name == metric).collect())
        .unwrap_or_default()
}

fn relative_change(control: f64, variant: f64) -> Option<f64> {
    (control.abs() > f64::EPSILON).then(|| (variant - control) / control.abs() * 100.0)
}

/// Stateless analysis over a snapshot. Holds only configuration.
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: EngineConfig,
    registry: AggregatorRegistry,
}

impl Analyzer {
    pub fn new(config: EngineConfig) -> Self {
        let registry = AggregatorRegistry::from_config(&config);
        Self { config, registry }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ahead(&self, metric: &str, control: f64, variant: f64) -> bool {
        if self.config.is_lower_better(metric) {
            variant < control
        } else {
            variant > control
        }
    }

    /// `{count, total, average, observations}` per metric recorded for `variant`.
    pub fn performance_metrics(&self, samples: &SamplesByVariant, variant: VariantId) -> MetricSummary {
        let Some(rows) = samples.get(&variant) else { return MetricSummary::new() };
        let mut by_metric: BTreeMap<&str, Vec<&MetricSample>> = BTreeMap::new();
        for row in rows {
            by_metric.entry(row.metric_name.as_str()).or_default().push(row);
        }
        by_metric
            .into_iter()
            .map(|(name, rows)| (name.to_string(), self.registry.for_metric(name).summarize(&rows)))
            .collect()
    }

    /// Compare every metric the variant shares with control. Empty when the
    /// control is missing, has no samples, or `variant` is the control.
    pub fn compare_with_control(
        &self,
        aggregate: &ExperimentAggregate,
        samples: &SamplesByVariant,
        variant: VariantId,
    ) -> BTreeMap<String, MetricComparison> {
        let Some(control) = aggregate.control() else { return BTreeMap::new() };
        if control.id == variant {
            return BTreeMap::new();
        }
        let control_metrics = self.performance_metrics(samples, control.id);
        self.performance_metrics(samples, variant)
            .into_iter()
            .filter_map(|(name, v)| {
                let c = control_metrics.get(&name).filter(|c| c.count > 0)?;
                let comparison = MetricComparison {
                    control_average: c.average,
                    variant_average: v.average,
                    delta: v.average - c.average,
                    relative_improvement: relative_change(c.average, v.average),
                    improved: self.ahead(&name, c.average, v.average),
                };
                Some((name, comparison))
            })
            .collect()
    }

    fn arm_result(&self, aggregate: &ExperimentAggregate, samples: &SamplesByVariant, variant: &Variant) -> ArmResult {
        ArmResult {
            variant_id: variant.id,
            variant_name: variant.name.clone(),
            content_ref: variant.content_ref.clone(),
            traffic_split: if variant.is_control { aggregate.control_share() } else { variant.traffic_split },
            is_control: variant.is_control,
            status: variant.status,
            sample_size: variant.sample_size,
            metrics: self.performance_metrics(samples, variant.id),
        }
    }

    pub fn current_results(&self, aggregate: &ExperimentAggregate, samples: &SamplesByVariant) -> CurrentResults {
        CurrentResults {
            control: aggregate.control().map(|c| self.arm_result(aggregate, samples, c)),
            variants: aggregate
                .treatments()
                .map(|v| self.arm_result(aggregate, samples, v))
                .collect(),
        }
    }

    fn metric_trend(&self, metric: &str, rows: &[&MetricSample]) -> MetricTrend {
        let mut by_day: BTreeMap<NaiveDate, Vec<&MetricSample>> = BTreeMap::new();
        for row in rows {
            by_day.entry(row.recorded_date).or_default().push(row);
        }
        let points: Vec<TrendPoint> = by_day
            .into_iter()
            .map(|(date, day_rows)| {
                let agg = MetricAggregate::from_rows(day_rows.iter().copied());
                TrendPoint { date, average: agg.average, rows: agg.count, observations: agg.observations }
            })
            .collect();

        let window = &points[points.len().saturating_sub(self.config.trend_window_days)..];
        if window.len() < 2 {
            return MetricTrend { points, direction: TrendDirection::Insufficient, relative_slope: None, improving: false };
        }

        let origin = window[0].date;
        let xy: Vec<(f64, f64)> = window
            .iter()
            .map(|p| ((p.date - origin).num_days() as f64, p.average))
            .collect();
        let mean = xy.iter().map(|p| p.1).sum::<f64>() / xy.len() as f64;
        let relative_slope = linear_slope(&xy).and_then(|slope| (mean.abs() > f64::EPSILON).then(|| slope / mean.abs()));

        let threshold = self.config.trend_threshold;
        let direction = match relative_slope {
            Some(r) if r >= threshold => TrendDirection::Rising,
            Some(r) if r <= -threshold => TrendDirection::Falling,
            _ => TrendDirection::Flat,
        };
        let lower = self.config.is_lower_better(metric);
        let improving = match direction {
            TrendDirection::Rising => !lower,
            TrendDirection::Falling => lower,
            _ => false,
        };
        MetricTrend { points, direction, relative_slope, improving }
    }

    /// Daily series per arm and metric, control first.
    pub fn performance_trends(&self, aggregate: &ExperimentAggregate, samples: &SamplesByVariant) -> Vec<VariantTrend> {
        aggregate
            .variants
            .iter()
            .map(|variant| {
                let mut by_metric: BTreeMap<&str, Vec<&MetricSample>> = BTreeMap::new();
                for row in samples.get(&variant.id).into_iter().flatten() {
                    by_metric.entry(row.metric_name.as_str()).or_default().push(row);
                }
                let metrics = by_metric
                    .into_iter()
                    .map(|(name, rows)| (name.to_string(), self.metric_trend(name, &rows)))
                    .collect();
                VariantTrend { variant_id: variant.id, variant_name: variant.name.clone(), is_control: variant.is_control, metrics }
            })
            .collect()
    }

    /// Judge every treatment against control on the primary goal metric.
    pub fn declare_winner(&self, aggregate: &ExperimentAggregate, samples: &SamplesByVariant) -> WinnerDeclaration {
        let experiment = &aggregate.experiment;
        let metric = experiment.primary_goal.as_str();
        let level = experiment.confidence_level;
        let lower = self.config.is_lower_better(metric);
        let aggregator = self.registry.for_metric(metric);

        let control_rows = aggregate
            .control()
            .map(|c| rows_for(samples, c.id, metric))
            .unwrap_or_default();
        let control_average = (!control_rows.is_empty()).then(|| aggregator.summarize(&control_rows).average);

        // (candidate, whether the test statistic points in the favourable direction)
        let mut judged: Vec<(CandidateResult, Option<bool>)> = Vec::new();
        for variant in aggregate.treatments() {
            let rows = rows_for(samples, variant.id, metric);
            let variant_average = (!rows.is_empty()).then(|| aggregator.summarize(&rows).average);
            let test = if control_rows.is_empty() || rows.is_empty() {
                None
            } else {
                aggregator.significance(&control_rows, &rows)
            };
            let favourable = test.map(|t| if lower { t.statistic < 0.0 } else { t.statistic > 0.0 });
            let (better_than_control, relative_improvement) = match (control_average, variant_average) {
                (Some(c), Some(v)) => (self.ahead(metric, c, v), relative_change(c, v)),
                _ => (false, None),
            };
            judged.push((
                CandidateResult {
                    variant_id: variant.id,
                    variant_name: variant.name.clone(),
                    control_average,
                    variant_average,
                    relative_improvement,
                    better_than_control,
                    significant: test.is_some_and(|t| t.is_significant_at(level)),
                    confidence_achieved: test.map(|t| t.confidence_achieved()),
                    test,
                },
                favourable,
            ));
        }

        let total_sample_size = aggregate.total_sample_size();
        let minimum_sample_size = experiment.minimum_sample_size;
        let best_confidence = judged
            .iter()
            .filter_map(|(c, _)| c.confidence_achieved)
            .max_by(f64::total_cmp);

        let (verdict, confidence_achieved) = if total_sample_size < minimum_sample_size {
            (Verdict::InsufficientData, best_confidence)
        } else {
            let winner = judged
                .iter()
                .filter(|(c, favourable)| c.significant && c.better_than_control && *favourable == Some(true))
                .map(|(c, _)| c)
                .max_by(|a, b| {
                    let ca = a.confidence_achieved.unwrap_or(0.0);
                    let cb = b.confidence_achieved.unwrap_or(0.0);
                    ca.total_cmp(&cb).then_with(|| {
                        let ra = a.relative_improvement.map(f64::abs).unwrap_or(0.0);
                        let rb = b.relative_improvement.map(f64::abs).unwrap_or(0.0);
                        ra.total_cmp(&rb)
                    })
                });
            let tested: Vec<_> = judged.iter().filter(|(c, _)| c.test.is_some()).collect();
            match winner {
                Some(w) => (
                    Verdict::VariantWins { variant_id: w.variant_id, variant_name: w.variant_name.clone() },
                    w.confidence_achieved,
                ),
                None if !tested.is_empty()
                    && tested
                        .iter()
                        .all(|(c, favourable)| c.significant && !c.better_than_control && *favourable == Some(false)) =>
                {
                    (Verdict::ControlHolds, best_confidence)
                }
                None => (Verdict::Inconclusive, best_confidence),
            }
        };

        tracing::debug!(
            target: "experiments::analysis",
            experiment_id = %experiment.id,
            metric,
            ?verdict,
            total_sample_size,
            minimum_sample_size,
            confidence_achieved = confidence_achieved.unwrap_or(0.0),
            "winner declaration"
        );

        WinnerDeclaration {
            verdict,
            metric: metric.to_string(),
            confidence_target: level,
            confidence_achieved,
            total_sample_size,
            minimum_sample_size,
            candidates: judged.into_iter().map(|(c, _)| c).collect(),
        }
    }

    /// Prioritised next steps, highest priority first.
    pub fn recommendations(
        &self,
        aggregate: &ExperimentAggregate,
        samples: &SamplesByVariant,
        winner: &WinnerDeclaration,
        trends: &[VariantTrend],
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let experiment = &aggregate.experiment;
        if experiment.status == ExperimentStatus::Draft {
            return Vec::new();
        }
        let mut out = Vec::new();
        if samples.values().all(Vec::is_empty) {
            out.push(Recommendation::new(
                RecommendationKind::CollectData,
                Priority::Medium,
                "No results have been recorded yet; connect a reporting pipeline to start collecting data".into(),
            ));
            return out;
        }

        let metric = &winner.metric;
        let achieved = winner.confidence_achieved.unwrap_or(0.0);
        match &winner.verdict {
            Verdict::InsufficientData => {
                let progress = winner.total_sample_size as f64 / winner.minimum_sample_size.max(1) as f64 * 100.0;
                out.push(Recommendation::new(
                    RecommendationKind::InsufficientSampleSize,
                    Priority::High,
                    format!(
                        "Collected {} of {} required samples ({progress:.0}%); keep the test running before drawing conclusions",
                        winner.total_sample_size, winner.minimum_sample_size
                    ),
                ));
            }
            Verdict::Inconclusive => {
                out.push(Recommendation::new(
                    RecommendationKind::Inconclusive,
                    Priority::Medium,
                    format!(
                        "No variant differs from control on {metric} at {}% confidence (best achieved {achieved:.1}%)",
                        winner.confidence_target
                    ),
                ));
            }
            Verdict::VariantWins { variant_name, .. } => {
                out.push(Recommendation::new(
                    RecommendationKind::ClearWinner,
                    Priority::High,
                    format!("{variant_name} beats control on {metric} with {achieved:.1}% confidence; roll it out"),
                ));
            }
            Verdict::ControlHolds => {
                out.push(Recommendation::new(
                    RecommendationKind::KeepControl,
                    Priority::High,
                    format!("Every variant performs worse than control on {metric} ({achieved:.1}% confidence); keep the control"),
                ));
            }
        }

        if !winner.is_conclusive() {
            if let Some(leader) = winner.leader() {
                let margin = leader
                    .relative_improvement
                    .map(|r| format!(" by {:.1}%", r.abs()))
                    .unwrap_or_default();
                out.push(Recommendation::new(
                    RecommendationKind::LeadingVariant,
                    Priority::Medium,
                    format!(
                        "{} is the stronger performer on {metric}{margin}, but the difference is not yet statistically significant",
                        leader.variant_name
                    ),
                ));
            }
            if experiment.window_elapsed(now) {
                out.push(Recommendation::new(
                    RecommendationKind::DurationElapsed,
                    Priority::High,
                    format!(
                        "The planned {}-day window has elapsed without a conclusive result; stop the test or extend it",
                        experiment.duration_days
                    ),
                ));
            }
        }

        let moving: Vec<&str> = trends
            .iter()
            .filter(|t| t.metrics.get(metric.as_str()).is_some_and(|m| m.direction.is_moving()))
            .map(|t| t.variant_name.as_str())
            .collect();
        if !moving.is_empty() {
            let priority = if winner.is_conclusive() { Priority::Low } else { Priority::Medium };
            out.push(Recommendation::new(
                RecommendationKind::ExtendTest,
                priority,
                format!(
                    "{metric} is still moving for {}; extend the test or retest before acting on the result",
                    moving.join(", ")
                ),
            ));
        }

        out.sort_by_key(|r| r.priority);
        out
    }

    pub fn summary(&self, aggregate: &ExperimentAggregate, now: DateTime<Utc>) -> TestSummary {
        let experiment = &aggregate.experiment;
        let total = aggregate.total_sample_size();
        TestSummary {
            experiment_id: experiment.id,
            name: experiment.name.clone(),
            status: experiment.status,
            primary_goal: experiment.primary_goal.clone(),
            confidence_level: experiment.confidence_level,
            minimum_sample_size: experiment.minimum_sample_size,
            traffic_allocation: experiment.traffic_allocation,
            total_sample_size: total,
            sample_progress: total as f64 / experiment.minimum_sample_size.max(1) as f64 * 100.0,
            variant_count: aggregate.treatments().count(),
            days_running: experiment.days_running(now),
            start_date: experiment.start_date,
            end_date: experiment.end_date,
        }
    }

    /// Full report over one snapshot.
    pub fn report(&self, aggregate: &ExperimentAggregate, samples: &SamplesByVariant, now: DateTime<Utc>) -> PerformanceReport {
        let performance_trends = self.performance_trends(aggregate, samples);
        let winner = self.declare_winner(aggregate, samples);
        let recommendations = self.recommendations(aggregate, samples, &winner, &performance_trends, now);
        PerformanceReport {
            test_summary: self.summary(aggregate, now),
            current_results: self.current_results(aggregate, samples),
            performance_trends,
            winner,
            recommendations,
            generated_at: now,
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
