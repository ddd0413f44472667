//! # Stage: Experiment Orchestration Service
//!
//! ## Responsibility
//! Operational facade over an [`ExperimentStore`]: experiment creation,
//! variant management, lifecycle transitions with cascades, result ingestion
//! and report generation.
//!
//! ## Guarantees
//! - Business-rule violations are collected into [`Outcome::errors`]; the
//!   experiment is left unchanged. Only faults travel as `Err`
//! - Every mutating call is one [`ExperimentStore::apply`] unit of work:
//!   preconditions are checked against the locked snapshot and the experiment
//!   and all of its variants are written together
//! - Variant status always equals experiment status after a transition
//! - `record_results` never fails on a bad entry; it skips it and says why
//!
//! ## NOT Responsible For
//! - Deciding which variant a live visitor receives
//! - Retrying faults: the caller owns recovery

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::analysis::{
    Analyzer, CurrentResults, MetricComparison, MetricSummary, PerformanceReport, WinnerDeclaration,
};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{ExperimentError, Result, ValidationError};
use crate::model::{
    group_by_variant, ContentRef, Experiment, ExperimentAggregate, ExperimentConfig, ExperimentId,
    ExperimentStatus, Metadata, NewSample, NewVariant, ResultEntry, SamplesByVariant, TrafficSplit,
    UserRef, Variant, VariantId, MAX_SAMPLE_SIZE,
};
use crate::store::{Changeset, ExperimentStore, NewExperiment};

const STATUS_HISTORY: &str = "status_history";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

fn errors_as_strings<S: Serializer>(errors: &[ValidationError], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(ToString::to_string))
}

/// Result of an operator action: a success flag plus every validation error
/// found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    pub value: Option<T>,
    #[serde(serialize_with = "errors_as_strings")]
    pub errors: Vec<ValidationError>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self { success: true, value: Some(value), errors: Vec::new() }
    }

    pub fn rejected(errors: Vec<ValidationError>) -> Self {
        Self { success: false, value: None, errors }
    }

    pub fn into_result(self) -> std::result::Result<T, Vec<ValidationError>> {
        match self.value {
            Some(value) if self.success => Ok(value),
            _ => Err(self.errors),
        }
    }
}

// ---------------------------------------------------------------------------
// Result ingestion types
// ---------------------------------------------------------------------------

/// Why a batch entry was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The variant does not exist or belongs to another experiment.
    UnknownVariant,
    EmptyMetricName,
    NonFiniteValue,
    /// Recording the entry would push the variant past [`MAX_SAMPLE_SIZE`].
    SampleSizeOutOfRange,
    /// Draft and completed experiments do not accept results.
    NotAcceptingResults(ExperimentStatus),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnknownVariant => write!(f, "variant does not belong to this experiment"),
            SkipReason::EmptyMetricName => write!(f, "metric name is empty"),
            SkipReason::NonFiniteValue => write!(f, "value is not a finite number"),
            SkipReason::SampleSizeOutOfRange => write!(f, "sample size would overflow the variant's running total"),
            SkipReason::NotAcceptingResults(status) => write!(f, "{status} experiments do not accept results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntry {
    /// Position of the entry in the submitted batch.
    pub index: usize,
    pub variant_id: VariantId,
    pub metric_name: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub recorded: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// One content artifact offered to [`ExperimentService::bulk_create_from_content_list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCandidate {
    pub content_ref: ContentRef,
    pub name: Option<String>,
}

impl ContentCandidate {
    pub fn new(content_ref: impl Into<String>) -> Self {
        Self { content_ref: ContentRef::new(content_ref), name: None }
    }

    pub fn named(content_ref: impl Into<String>, name: impl Into<String>) -> Self {
        Self { content_ref: ContentRef::new(content_ref), name: Some(name.into()) }
    }
}

impl From<ContentRef> for ContentCandidate {
    fn from(content_ref: ContentRef) -> Self {
        Self { content_ref, name: None }
    }
}

/// A variant whose running `sample_size` disagrees with its sample ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleSizeDrift {
    pub variant_id: VariantId,
    pub recorded: u64,
    pub ledger: u64,
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// What a lifecycle operation changes once its preconditions hold.
struct Transition {
    to: ExperimentStatus,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    reason: Option<String>,
    /// Key stamped with the transition time on the experiment and every variant.
    stamp: Option<&'static str>,
}

impl Transition {
    fn to(status: ExperimentStatus) -> Self {
        Self { to: status, start_date: None, end_date: None, reason: None, stamp: None }
    }

    fn reason(mut self, reason: &str) -> Self {
        let reason = reason.trim();
        if !reason.is_empty() {
            self.reason = Some(reason.to_string());
        }
        self
    }
}

fn record_transition(
    metadata: &mut Metadata,
    operation: &str,
    from: ExperimentStatus,
    to: ExperimentStatus,
    at: DateTime<Utc>,
    actor: &UserRef,
    reason: Option<&str>,
) {
    let entry = json!({
        "operation": operation,
        "from": from.as_str(),
        "to": to.as_str(),
        "at": at.to_rfc3339(),
        "actor": actor.as_str(),
        "reason": reason,
    });
    match metadata.get_mut(STATUS_HISTORY) {
        Some(Value::Array(items)) => items.push(entry),
        _ => {
            metadata.insert(STATUS_HISTORY.to_string(), Value::Array(vec![entry]));
        }
    }
    if let Some(reason) = reason {
        metadata.insert(format!("{operation}_reason"), Value::String(reason.to_string()));
    }
}

fn require_status(operation: &str, expected: ExperimentStatus, actual: ExperimentStatus) -> Option<ValidationError> {
    (actual != expected).then(|| ValidationError::UnexpectedStatus { operation: operation.to_string(), expected, actual })
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

// ---------------------------------------------------------------------------
// ExperimentService
// ---------------------------------------------------------------------------

pub struct ExperimentService<S> {
    store: S,
    analyzer: Analyzer,
    clock: Arc<dyn Clock>,
}

impl<S: ExperimentStore> ExperimentService<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, analyzer: Analyzer::new(config), clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        self.analyzer.config()
    }

    fn rejected<T>(&self, operation: &str, id: Option<ExperimentId>, errors: Vec<ValidationError>) -> Outcome<T> {
        tracing::debug!(
            target: "experiments::service",
            operation,
            experiment_id = ?id.map(|i| i.0),
            errors = %join_errors(&errors),
            "operation rejected"
        );
        Outcome::rejected(errors)
    }

    // -- creation -----------------------------------------------------------

    /// Create a draft experiment together with its control arm.
    pub fn create_experiment(&self, config: ExperimentConfig, actor: &UserRef) -> Result<Outcome<ExperimentAggregate>> {
        let errors = config.validate(&self.config().allowed_confidence_levels);
        if !errors.is_empty() {
            return Ok(self.rejected("create", None, errors));
        }
        let now = self.clock.now();
        let control = NewVariant {
            name: "Control".to_string(),
            content_ref: config.control_content.clone(),
            traffic_split: TrafficSplit::ZERO,
            is_control: true,
            status: ExperimentStatus::Draft,
            created_at: now,
        };
        let new = NewExperiment { config, created_by: actor.clone(), created_at: now };
        let aggregate = self.store.insert_experiment(new, vec![control])?;
        tracing::info!(
            target: "experiments::service",
            experiment_id = %aggregate.id(),
            name = %aggregate.experiment.name,
            actor = %actor,
            "experiment created"
        );
        Ok(Outcome::ok(aggregate))
    }

    /// Add a treatment arm to a draft experiment.
    pub fn add_variant(
        &self,
        id: ExperimentId,
        content_ref: ContentRef,
        name: &str,
        traffic_split: f64,
        actor: &UserRef,
    ) -> Result<Outcome<Variant>> {
        let now = self.clock.now();
        let applied = self.store.apply(id, |aggregate| {
            let mut errors = Vec::new();
            let status = aggregate.experiment.status;
            if status != ExperimentStatus::Draft {
                errors.push(ValidationError::NotDraft(status));
            }
            if name.trim().is_empty() {
                errors.push(ValidationError::EmptyVariantName);
            }
            let split = TrafficSplit::from_percent(traffic_split);
            match split {
                None => errors.push(ValidationError::InvalidTrafficSplit(traffic_split)),
                Some(split) => {
                    let allocated = aggregate.allocated_tenths();
                    if allocated + u32::from(split.tenths()) > u32::from(TrafficSplit::FULL.tenths()) {
                        errors.push(ValidationError::TrafficSplitExceeded {
                            allocated: f64::from(allocated) / 10.0,
                            requested: split.as_percent(),
                        });
                    }
                }
            }
            if content_ref == aggregate.experiment.control_content {
                errors.push(ValidationError::ContentIsControl(content_ref.clone()));
            } else if aggregate.uses_content(&content_ref) {
                errors.push(ValidationError::DuplicateContent(content_ref.clone()));
            }

            match (split, errors.is_empty()) {
                (Some(split), true) => {
                    let variant = NewVariant {
                        name: name.trim().to_string(),
                        content_ref: content_ref.clone(),
                        traffic_split: split,
                        is_control: false,
                        status,
                        created_at: now,
                    };
                    (Changeset { new_variants: vec![variant], ..Default::default() }, Ok(()))
                }
                _ => (Changeset::default(), Err(errors)),
            }
        })?;

        if let Err(errors) = applied.value {
            return Ok(self.rejected("add_variant", Some(id), errors));
        }
        let variant = applied
            .inserted_variants
            .into_iter()
            .next()
            .ok_or_else(|| ExperimentError::Corrupt(format!("variant insert for experiment {id} returned no row")))?;
        tracing::info!(
            target: "experiments::service",
            experiment_id = %id,
            variant_id = %variant.id,
            content_ref = %variant.content_ref,
            traffic_split = variant.traffic_split.as_percent(),
            actor = %actor,
            "variant added"
        );
        Ok(Outcome::ok(variant))
    }

    /// Build a draft experiment straight from pre-generated content: the
    /// first candidate is the control, the rest share traffic evenly.
    pub fn bulk_create_from_content_list(
        &self,
        candidates: Vec<ContentCandidate>,
        mut config: ExperimentConfig,
        actor: &UserRef,
    ) -> Result<Outcome<ExperimentAggregate>> {
        let mut errors = Vec::new();
        if candidates.len() < 2 {
            errors.push(ValidationError::NotEnoughCandidates { required: 2, given: candidates.len() });
        }
        if let Some(first) = candidates.first() {
            config.control_content = first.content_ref.clone();
        }
        errors.extend(config.validate(&self.config().allowed_confidence_levels));

        let mut seen = BTreeSet::new();
        for candidate in &candidates {
            if !seen.insert(candidate.content_ref.clone()) {
                errors.push(ValidationError::DuplicateContent(candidate.content_ref.clone()));
            }
        }
        if !errors.is_empty() {
            return Ok(self.rejected("bulk_create", None, errors));
        }
        let share = TrafficSplit::even_share(candidates.len() - 1).unwrap_or(TrafficSplit::ZERO);
        let now = self.clock.now();

        let variants = candidates
            .into_iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let is_control = idx == 0;
                let name = candidate.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| {
                    if is_control { "Control".to_string() } else { format!("Variant {idx}") }
                });
                NewVariant {
                    name,
                    content_ref: candidate.content_ref,
                    traffic_split: if is_control { TrafficSplit::ZERO } else { share },
                    is_control,
                    status: ExperimentStatus::Draft,
                    created_at: now,
                }
            })
            .collect::<Vec<_>>();
        let arms = variants.len();
        let new = NewExperiment { config, created_by: actor.clone(), created_at: now };
        let aggregate = self.store.insert_experiment(new, variants)?;
        tracing::info!(
            target: "experiments::service",
            experiment_id = %aggregate.id(),
            arms,
            split = share.as_percent(),
            actor = %actor,
            "experiment created from content list"
        );
        Ok(Outcome::ok(aggregate))
    }

    // -- lifecycle ----------------------------------------------------------

    /// Run a status change as one unit of work that cascades to every variant.
    fn transition<F>(
        &self,
        id: ExperimentId,
        operation: &'static str,
        actor: &UserRef,
        plan: F,
    ) -> Result<Outcome<ExperimentAggregate>>
    where
        F: FnOnce(&ExperimentAggregate, DateTime<Utc>) -> std::result::Result<Transition, Vec<ValidationError>>,
    {
        let now = self.clock.now();
        let applied = self.store.apply(id, |aggregate| {
            let transition = match plan(aggregate, now) {
                Ok(t) => t,
                Err(errors) => return (Changeset::default(), Err(errors)),
            };
            let from = aggregate.experiment.status;
            let mut experiment: Experiment = aggregate.experiment.clone();
            experiment.status = transition.to;
            if let Some(start) = transition.start_date {
                experiment.start_date = Some(start);
            }
            if let Some(end) = transition.end_date {
                experiment.end_date = Some(end);
            }
            record_transition(
                &mut experiment.metadata,
                operation,
                from,
                transition.to,
                now,
                actor,
                transition.reason.as_deref(),
            );
            let stamp = transition.stamp.map(|key| (key, Value::String(now.to_rfc3339())));
            if let Some((key, value)) = &stamp {
                experiment.metadata.insert((*key).to_string(), value.clone());
            }
            let variants = aggregate
                .variants
                .iter()
                .cloned()
                .map(|mut variant| {
                    variant.status = transition.to;
                    if let Some((key, value)) = &stamp {
                        variant.metadata.insert((*key).to_string(), value.clone());
                    }
                    variant
                })
                .collect();
            (Changeset { experiment: Some(experiment), variants, ..Default::default() }, Ok((from, transition.to)))
        })?;

        match applied.value {
            Err(errors) => Ok(self.rejected(operation, Some(id), errors)),
            Ok((from, to)) => {
                tracing::info!(
                    target: "experiments::service",
                    experiment_id = %id,
                    operation,
                    from = %from,
                    to = %to,
                    variants = applied.aggregate.variants.len(),
                    actor = %actor,
                    "experiment status changed"
                );
                Ok(Outcome::ok(applied.aggregate))
            }
        }
    }

    /// Activate a draft experiment. `end_date` becomes `start_date + duration_days`.
    pub fn start(&self, id: ExperimentId, start_date: Option<DateTime<Utc>>, actor: &UserRef) -> Result<Outcome<ExperimentAggregate>> {
        self.transition(id, "start", actor, |aggregate, now| {
            let experiment = &aggregate.experiment;
            let mut errors: Vec<_> = require_status("start", ExperimentStatus::Draft, experiment.status)
                .into_iter()
                .collect();
            if aggregate.treatments().next().is_none() {
                errors.push(ValidationError::NoVariants);
            }
            if !errors.is_empty() {
                return Err(errors);
            }
            let start = start_date.unwrap_or(now);
            let mut transition = Transition::to(ExperimentStatus::Active);
            transition.start_date = Some(start);
            transition.end_date = Some(start + Duration::days(i64::from(experiment.duration_days)));
            Ok(transition)
        })
    }

    pub fn pause(&self, id: ExperimentId, reason: &str, actor: &UserRef) -> Result<Outcome<ExperimentAggregate>> {
        self.transition(id, "pause", actor, |aggregate, _| {
            aggregate
                .experiment
                .status
                .transition(ExperimentStatus::Paused)
                .map(|to| Transition::to(to).reason(reason))
                .map_err(|e| vec![e])
        })
    }

    pub fn resume(&self, id: ExperimentId, reason: &str, actor: &UserRef) -> Result<Outcome<ExperimentAggregate>> {
        self.transition(id, "resume", actor, |aggregate, _| {
            match require_status("resume", ExperimentStatus::Paused, aggregate.experiment.status) {
                Some(error) => Err(vec![error]),
                None => Ok(Transition::to(ExperimentStatus::Active).reason(reason)),
            }
        })
    }

    /// Stop early. `end_date` is moved to now (never before the start date).
    pub fn stop(&self, id: ExperimentId, reason: &str, actor: &UserRef) -> Result<Outcome<ExperimentAggregate>> {
        self.transition(id, "stop", actor, |aggregate, now| {
            let experiment = &aggregate.experiment;
            let to = experiment.status.transition(ExperimentStatus::Stopped).map_err(|e| vec![e])?;
            let mut transition = Transition::to(to).reason(reason);
            transition.end_date = Some(experiment.start_date.map_or(now, |start| now.max(start)));
            Ok(transition)
        })
    }

    /// Finish the experiment once the experiment-wide sample size has reached
    /// the minimum.
    pub fn complete(&self, id: ExperimentId, actor: &UserRef) -> Result<Outcome<ExperimentAggregate>> {
        self.transition(id, "complete", actor, |aggregate, _| {
            let experiment = &aggregate.experiment;
            let mut errors = Vec::new();
            if let Err(e) = experiment.status.transition(ExperimentStatus::Completed) {
                errors.push(e);
            }
            let total = aggregate.total_sample_size();
            if total < experiment.minimum_sample_size {
                errors.push(ValidationError::InsufficientSampleSize {
                    current: total,
                    required: experiment.minimum_sample_size,
                });
            }
            if !errors.is_empty() {
                return Err(errors);
            }
            let mut transition = Transition::to(ExperimentStatus::Completed);
            transition.stamp = Some("completed_at");
            Ok(transition)
        })
    }

    // -- ingestion ----------------------------------------------------------

    /// Append a batch of daily results. Bad entries are skipped, never fatal.
    pub fn record_results(&self, id: ExperimentId, batch: Vec<ResultEntry>) -> Result<RecordOutcome> {
        let now = self.clock.now();
        let today = self.clock.today();
        let applied = self.store.apply(id, |aggregate| {
            let status = aggregate.experiment.status;
            let accepting = matches!(
                status,
                ExperimentStatus::Active | ExperimentStatus::Paused | ExperimentStatus::Stopped
            );
            let mut samples = Vec::with_capacity(batch.len());
            let mut skipped = Vec::new();
            // Running totals as they will stand once earlier entries land.
            let mut totals: BTreeMap<VariantId, u64> = BTreeMap::new();
            for (index, entry) in batch.into_iter().enumerate() {
                let reason = if !accepting {
                    Some(SkipReason::NotAcceptingResults(status))
                } else if let Some(variant) = aggregate.variant(entry.variant_id) {
                    let total = totals.entry(variant.id).or_insert(variant.sample_size);
                    if entry.metric_name.trim().is_empty() {
                        Some(SkipReason::EmptyMetricName)
                    } else if !entry.value.is_finite() {
                        Some(SkipReason::NonFiniteValue)
                    } else {
                        match total.checked_add(entry.sample_size) {
                            Some(next) if next <= MAX_SAMPLE_SIZE => {
                                *total = next;
                                None
                            }
                            _ => Some(SkipReason::SampleSizeOutOfRange),
                        }
                    }
                } else {
                    Some(SkipReason::UnknownVariant)
                };
                match reason {
                    Some(reason) => skipped.push(SkippedEntry {
                        index,
                        variant_id: entry.variant_id,
                        metric_name: entry.metric_name,
                        reason,
                    }),
                    None => samples.push(NewSample {
                        variant_id: entry.variant_id,
                        metric_name: entry.metric_name.trim().to_string(),
                        value: entry.value,
                        sample_size: entry.sample_size,
                        recorded_date: entry.date.unwrap_or(today),
                        recorded_at: now,
                    }),
                }
            }
            (Changeset { new_samples: samples, ..Default::default() }, skipped)
        })?;

        for entry in &applied.value {
            tracing::warn!(
                target: "experiments::service",
                experiment_id = %id,
                index = entry.index,
                variant_id = %entry.variant_id,
                metric = %entry.metric_name,
                reason = %entry.reason,
                "result entry skipped"
            );
        }
        tracing::debug!(
            target: "experiments::service",
            experiment_id = %id,
            recorded = applied.recorded,
            skipped = applied.value.len(),
            "results recorded"
        );
        Ok(RecordOutcome { recorded: applied.recorded, skipped: applied.value })
    }

    // -- reads --------------------------------------------------------------

    pub fn get_experiment(&self, id: ExperimentId) -> Result<Option<ExperimentAggregate>> {
        self.store.load_aggregate(id)
    }

    fn snapshot(&self, id: ExperimentId) -> Result<(ExperimentAggregate, SamplesByVariant)> {
        let aggregate = self.store.load_aggregate(id)?.ok_or(ExperimentError::ExperimentNotFound(id))?;
        let samples = group_by_variant(self.store.load_samples(id)?);
        Ok((aggregate, samples))
    }

    fn owned_variant(aggregate: &ExperimentAggregate, variant: VariantId) -> Result<()> {
        aggregate.variant(variant).map(|_| ()).ok_or(ExperimentError::VariantNotFound(variant))
    }

    pub fn performance_metrics(&self, id: ExperimentId, variant: VariantId) -> Result<MetricSummary> {
        let (aggregate, samples) = self.snapshot(id)?;
        Self::owned_variant(&aggregate, variant)?;
        Ok(self.analyzer.performance_metrics(&samples, variant))
    }

    pub fn compare_with_control(&self, id: ExperimentId, variant: VariantId) -> Result<BTreeMap<String, MetricComparison>> {
        let (aggregate, samples) = self.snapshot(id)?;
        Self::owned_variant(&aggregate, variant)?;
        Ok(self.analyzer.compare_with_control(&aggregate, &samples, variant))
    }

    pub fn current_results(&self, id: ExperimentId) -> Result<CurrentResults> {
        let (aggregate, samples) = self.snapshot(id)?;
        Ok(self.analyzer.current_results(&aggregate, &samples))
    }

    pub fn declare_winner(&self, id: ExperimentId) -> Result<WinnerDeclaration> {
        let (aggregate, samples) = self.snapshot(id)?;
        Ok(self.analyzer.declare_winner(&aggregate, &samples))
    }

    pub fn generate_performance_report(&self, id: ExperimentId) -> Result<PerformanceReport> {
        let (aggregate, samples) = self.snapshot(id)?;
        Ok(self.analyzer.report(&aggregate, &samples, self.clock.now()))
    }

    /// Variants whose running `sample_size` differs from the sum of their
    /// sample rows. Empty once writes have settled.
    pub fn audit_sample_sizes(&self, id: ExperimentId) -> Result<Vec<SampleSizeDrift>> {
        let (aggregate, samples) = self.snapshot(id)?;
        Ok(aggregate
            .variants
            .iter()
            .filter_map(|variant| {
                let ledger = samples
                    .get(&variant.id)
                    .map(|rows| rows.iter().fold(0u64, |acc, r| acc.saturating_add(r.sample_size)))
                    .unwrap_or(0);
                (ledger != variant.sample_size).then_some(SampleSizeDrift {
                    variant_id: variant.id,
                    recorded: variant.sample_size,
                    ledger,
                })
            })
            .collect())
    }

    pub fn list_experiments(&self) -> Result<Vec<Experiment>> {
        self.store.list_experiments()
    }

    /// Remove an experiment with its variants and samples.
    pub fn delete_experiment(&self, id: ExperimentId, actor: &UserRef) -> Result<bool> {
        let deleted = self.store.delete_experiment(id)?;
        if deleted {
            tracing::info!(target: "experiments::service", experiment_id = %id, actor = %actor, "experiment deleted");
        }
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
