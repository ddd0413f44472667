//! # content-experiments
//!
//! A/B test lifecycle engine for marketing content. Experiments own a control
//! artifact and one or more variants, split traffic under a 100% cap, ingest
//! daily metric samples into an append-only ledger, and produce comparison,
//! trend and winner reports.
//!
//! ## Layout
//! - [`model`]: experiments, variants, samples and their value types
//! - [`store`]: the load-validate-commit persistence boundary (memory, SQLite)
//! - [`service`]: lifecycle operations and result ingestion
//! - [`aggregate`] and [`stats`]: per-family metric summaries and significance tests
//! - [`analysis`]: comparisons, trends, winner declaration and recommendations
//! - [`config`], [`clock`], [`error`]: ambient plumbing
//! - [`cli`]: argument parsing and rendering for the `content-experiments` binary

pub mod aggregate;
pub mod analysis;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod service;
pub mod stats;
pub mod store;

pub use analysis::{Analyzer, PerformanceReport, Recommendation, Verdict, WinnerDeclaration};
pub use config::EngineConfig;
pub use error::{ExperimentError, Result, ValidationError};
pub use model::{
    ContentRef, Experiment, ExperimentAggregate, ExperimentConfig, ExperimentId, ExperimentStatus,
    MetricSample, ResultEntry, TrafficSplit, UserRef, Variant, VariantId,
};
pub use service::{ContentCandidate, ExperimentService, Outcome, RecordOutcome, SkipReason};
pub use store::memory::MemoryStore;
pub use store::sqlite::SqliteStore;
pub use store::ExperimentStore;
