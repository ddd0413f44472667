//! Crate-level error types.
//!
//! Two families live here and never mix:
//! - [`ExperimentError`] is a genuine fault (storage unavailable, corrupt row,
//!   unknown experiment). It travels as `Err` and is never retried by the engine.
//! - [`ValidationError`] is an expected business-rule violation. It is
//!   collected into [`crate::service::Outcome::errors`] and surfaced verbatim to
//!   operators; the entity it concerns is left unchanged.

use thiserror::Error;

use crate::model::{ContentRef, ExperimentId, ExperimentStatus, VariantId};

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(ExperimentId),

    #[error("Variant not found: {0}")]
    VariantNotFound(VariantId),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Business-rule violation reported back to the caller of an operator action.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("experiment name must not be empty")]
    EmptyName,

    #[error("a control content reference is required")]
    MissingControl,

    #[error("a primary goal metric is required")]
    MissingPrimaryGoal,

    #[error("confidence level {level}% is not supported (allowed: {allowed:?})")]
    UnsupportedConfidenceLevel { level: u8, allowed: Vec<u8> },

    #[error("minimum sample size must be greater than 0")]
    NonPositiveMinimumSampleSize,

    #[error("duration must be at least 1 day")]
    NonPositiveDuration,

    #[error("traffic allocation must be in (0, 100], got {0}")]
    InvalidTrafficAllocation(f64),

    #[error("at least {required} content candidates are required, got {given}")]
    NotEnoughCandidates { required: usize, given: usize },

    #[error("variants can only be added while the experiment is draft (currently {0})")]
    NotDraft(ExperimentStatus),

    #[error("variant name must not be empty")]
    EmptyVariantName,

    #[error("traffic split must be in [0, 100], got {0}")]
    InvalidTrafficSplit(f64),

    #[error("traffic split exceeded: {allocated:.1}% already allocated, {requested:.1}% requested, limit 100%")]
    TrafficSplitExceeded { allocated: f64, requested: f64 },

    #[error("content {0} is already the control of this experiment")]
    ContentIsControl(ContentRef),

    #[error("content {0} is already used by another variant")]
    DuplicateContent(ContentRef),

    #[error("cannot start an experiment with no variants")]
    NoVariants,

    #[error("{operation} requires a {expected} experiment, this one is {actual}")]
    UnexpectedStatus { operation: String, expected: ExperimentStatus, actual: ExperimentStatus },

    #[error("cannot move experiment from {from} to {to}")]
    IllegalTransition { from: ExperimentStatus, to: ExperimentStatus },

    #[error("minimum sample size not reached: {current} of {required}")]
    InsufficientSampleSize { current: u64, required: u64 },
}
