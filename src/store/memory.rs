//! # Stage: In-Memory Experiment Store
//!
//! ## Responsibility
//! Process-local implementation of [`ExperimentStore`] for embedding callers
//! and tests.
//!
//! ## Guarantees
//! - Per-experiment locking: each experiment lives behind its own `RwLock`;
//!   the registry lock is only held long enough to clone an `Arc`
//! - All-or-nothing: a changeset is fully validated before the first mutation
//! - Thread-safe: `Send + Sync`, safe to share through `Arc`
//!
//! ## NOT Responsible For
//! - Durability across restarts (see [`super::sqlite`])

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use super::{Applied, Changeset, ExperimentStore, NewExperiment};
use crate::error::{ExperimentError, Result};
use crate::model::{
    Experiment, ExperimentAggregate, ExperimentId, ExperimentStatus, MetricSample, NewVariant,
    SampleId, Variant, VariantId,
};

#[derive(Debug)]
struct Cell {
    aggregate: ExperimentAggregate,
    samples: Vec<MetricSample>,
}

type SharedCell = Arc<RwLock<Cell>>;

/// In-process store keyed by experiment id.
#[derive(Debug)]
pub struct MemoryStore {
    cells: RwLock<BTreeMap<ExperimentId, SharedCell>>,
    next_experiment: AtomicI64,
    next_variant: AtomicI64,
    next_sample: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(BTreeMap::new()),
            next_experiment: AtomicI64::new(1),
            next_variant: AtomicI64::new(1),
            next_sample: AtomicI64::new(1),
        }
    }

    fn cell(&self, id: ExperimentId) -> Result<Option<SharedCell>> {
        let cells = self.cells.read().map_err(|e| ExperimentError::Poisoned(e.to_string()))?;
        Ok(cells.get(&id).map(Arc::clone))
    }

    fn materialize(&self, experiment_id: ExperimentId, new: NewVariant) -> Variant {
        Variant {
            id: VariantId(self.next_variant.fetch_add(1, Ordering::SeqCst)),
            experiment_id,
            name: new.name,
            content_ref: new.content_ref,
            traffic_split: new.traffic_split,
            is_control: new.is_control,
            status: new.status,
            sample_size: 0,
            metadata: Default::default(),
            created_at: new.created_at,
        }
    }
}

impl ExperimentStore for MemoryStore {
    fn insert_experiment(&self, new: NewExperiment, variants: Vec<NewVariant>) -> Result<ExperimentAggregate> {
        let id = ExperimentId(self.next_experiment.fetch_add(1, Ordering::SeqCst));
        let created_at = new.created_at;
        let config = new.config;
        let experiment = Experiment {
            id,
            name: config.name,
            campaign: config.campaign,
            created_by: new.created_by,
            description: config.description,
            primary_goal: config.primary_goal,
            confidence_level: config.confidence_level,
            minimum_sample_size: config.minimum_sample_size,
            duration_days: config.duration_days,
            traffic_allocation: config.traffic_allocation,
            control_content: config.control_content,
            status: ExperimentStatus::Draft,
            start_date: None,
            end_date: None,
            metadata: config.metadata,
            created_at,
        };
        let variants = variants
            .into_iter()
            .map(|v| self.materialize(id, v))
            .collect();
        let aggregate = ExperimentAggregate { experiment, variants };

        let mut cells = self.cells.write().map_err(|e| ExperimentError::Poisoned(e.to_string()))?;
        cells.insert(
            id,
            Arc::new(RwLock::new(Cell { aggregate: aggregate.clone(), samples: Vec::new() })),
        );
        Ok(aggregate)
    }

    fn load_aggregate(&self, id: ExperimentId) -> Result<Option<ExperimentAggregate>> {
        let Some(cell) = self.cell(id)? else { return Ok(None) };
        let guard = cell.read().map_err(|e| ExperimentError::Poisoned(e.to_string()))?;
        Ok(Some(guard.aggregate.clone()))
    }

    fn load_samples(&self, id: ExperimentId) -> Result<Vec<MetricSample>> {
        let Some(cell) = self.cell(id)? else { return Ok(Vec::new()) };
        let guard = cell.read().map_err(|e| ExperimentError::Poisoned(e.to_string()))?;
        let mut samples = guard.samples.clone();
        // Stable sort keeps insertion order within a day.
        samples.sort_by_key(|s| s.recorded_date);
        Ok(samples)
    }

    fn apply<R, F>(&self, id: ExperimentId, plan: F) -> Result<Applied<R>>
    where
        F: FnOnce(&ExperimentAggregate) -> (Changeset, R),
    {
        let cell = self.cell(id)?.ok_or(ExperimentError::ExperimentNotFound(id))?;
        let mut guard = cell.write().map_err(|e| ExperimentError::Poisoned(e.to_string()))?;

        let (changes, value) = plan(&guard.aggregate);

        // Validate every reference before touching state.
        for patch in &changes.variants {
            if guard.aggregate.variant(patch.id).is_none() {
                return Err(ExperimentError::VariantNotFound(patch.id));
            }
        }
        for sample in &changes.new_samples {
            if guard.aggregate.variant(sample.variant_id).is_none() {
                return Err(ExperimentError::VariantNotFound(sample.variant_id));
            }
        }

        let Cell { aggregate, samples } = &mut *guard;

        if let Some(updated) = changes.experiment {
            aggregate.experiment.status = updated.status;
            aggregate.experiment.start_date = updated.start_date;
            aggregate.experiment.end_date = updated.end_date;
            aggregate.experiment.metadata = updated.metadata;
        }
        for patch in changes.variants {
            if let Some(variant) = aggregate.variants.iter_mut().find(|v| v.id == patch.id) {
                variant.status = patch.status;
                variant.metadata = patch.metadata;
            }
        }

        let mut inserted_variants = Vec::with_capacity(changes.new_variants.len());
        for new in changes.new_variants {
            let variant = self.materialize(id, new);
            inserted_variants.push(variant.clone());
            aggregate.variants.push(variant);
        }

        let recorded = changes.new_samples.len();
        for new in changes.new_samples {
            if let Some(variant) = aggregate.variants.iter_mut().find(|v| v.id == new.variant_id) {
                variant.sample_size = variant.sample_size.saturating_add(new.sample_size);
            }
            samples.push(MetricSample {
                id: SampleId(self.next_sample.fetch_add(1, Ordering::SeqCst)),
                experiment_id: id,
                variant_id: new.variant_id,
                metric_name: new.metric_name,
                value: new.value,
                sample_size: new.sample_size,
                recorded_date: new.recorded_date,
                recorded_at: new.recorded_at,
            });
        }

        Ok(Applied { value, aggregate: aggregate.clone(), inserted_variants, recorded })
    }

    fn list_experiments(&self) -> Result<Vec<Experiment>> {
        let cells: Vec<SharedCell> = {
            let map = self.cells.read().map_err(|e| ExperimentError::Poisoned(e.to_string()))?;
            map.values().map(Arc::clone).collect()
        };
        cells
            .iter()
            .map(|cell| {
                cell.read()
                    .map(|g| g.aggregate.experiment.clone())
                    .map_err(|e| ExperimentError::Poisoned(e.to_string()))
            })
            .collect()
    }

    fn delete_experiment(&self, id: ExperimentId) -> Result<bool> {
        let mut cells = self.cells.write().map_err(|e| ExperimentError::Poisoned(e.to_string()))?;
        Ok(cells.remove(&id).is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
