//! # Module: store
//!
//! Persistence boundary for the three-entity data model.
//!
//! Every mutation goes through [`ExperimentStore::apply`], a unit of work that
//! 1. locks the experiment (keyed by id, never globally in the memory store),
//! 2. loads the experiment with all of its variants,
//! 3. hands that snapshot to a planning closure that validates and returns a
//!    [`Changeset`],
//! 4. commits the whole changeset or nothing.
//!
//! Cascades therefore cannot be observed half-applied, and the running
//! `sample_size` of a variant is incremented in the same commit as the sample
//! rows that justify it.
//!
//! ## Sub-modules
//! - [`memory`] — in-process store with per-experiment `RwLock`s
//! - [`sqlite`] — `rusqlite` store with `BEGIN IMMEDIATE` transactions

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    Experiment, ExperimentAggregate, ExperimentConfig, ExperimentId, MetricSample, NewSample,
    NewVariant, UserRef, Variant,
};

/// Input for creating an experiment row.
#[derive(Debug, Clone)]
pub struct NewExperiment {
    pub config: ExperimentConfig,
    pub created_by: UserRef,
    pub created_at: DateTime<Utc>,
}

/// Everything one unit of work writes.
///
/// - `experiment`: persisted fields are `status`, `start_date`, `end_date`, `metadata`
/// - `variants`: persisted fields are `status` and `metadata`; `sample_size` is
///   owned by the store and only moves through `new_samples`
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub experiment: Option<Experiment>,
    pub variants: Vec<Variant>,
    pub new_variants: Vec<NewVariant>,
    pub new_samples: Vec<NewSample>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.experiment.is_none()
            && self.variants.is_empty()
            && self.new_variants.is_empty()
            && self.new_samples.is_empty()
    }
}

/// Result of a committed unit of work.
#[derive(Debug, Clone)]
pub struct Applied<R> {
    /// Whatever the planning closure returned alongside its changeset.
    pub value: R,
    /// The aggregate as committed.
    pub aggregate: ExperimentAggregate,
    /// Variants created by this unit of work, with their assigned ids.
    pub inserted_variants: Vec<Variant>,
    /// Number of sample rows appended.
    pub recorded: usize,
}

pub trait ExperimentStore: Send + Sync {
    /// Insert a draft experiment together with its initial variants.
    fn insert_experiment(&self, experiment: NewExperiment, variants: Vec<NewVariant>) -> Result<ExperimentAggregate>;

    /// Read the experiment and its variants. Does not take the write lock.
    fn load_aggregate(&self, id: ExperimentId) -> Result<Option<ExperimentAggregate>>;

    /// All sample rows of an experiment, ordered by day then insertion.
    fn load_samples(&self, id: ExperimentId) -> Result<Vec<MetricSample>>;

    /// Load-validate-commit. The closure sees the locked snapshot and returns
    /// the changes to persist; an empty changeset writes nothing.
    ///
    /// Fails with [`ExperimentNotFound`](crate::error::ExperimentError::ExperimentNotFound)
    /// when the experiment does not exist.
    fn apply<R, F>(&self, id: ExperimentId, plan: F) -> Result<Applied<R>>
    where
        F: FnOnce(&ExperimentAggregate) -> (Changeset, R);

    fn list_experiments(&self) -> Result<Vec<Experiment>>;

    /// Delete an experiment with its variants and samples. Returns `false`
    /// when nothing was deleted.
    fn delete_experiment(&self, id: ExperimentId) -> Result<bool>;
}
