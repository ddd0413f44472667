//! # Stage: SQLite Experiment Store
//!
//! ## Responsibility
//! Durable implementation of [`ExperimentStore`] on top of `rusqlite`.
//!
//! ## Guarantees
//! - Every unit of work runs in a `BEGIN IMMEDIATE` transaction: the aggregate
//!   is loaded, validated and written while holding the write lock, so two
//!   writers can never both pass the same precondition
//! - `sample_size` moves only through `sample_size = sample_size + ?`, in the
//!   same transaction as the sample insert
//! - WAL journal: readers see the last committed snapshot and never block writers
//! - `metric_samples` rejects `UPDATE` through a trigger (append-only ledger)
//! - Deleting an experiment cascades to its variants and samples
//!
//! ## NOT Responsible For
//! - Connection pooling: each call opens a short-lived connection
//! - Retrying on `SQLITE_BUSY` beyond the configured busy timeout

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{Applied, Changeset, ExperimentStore, NewExperiment};
use crate::config::StorageConfig;
use crate::error::{ExperimentError, Result};
use crate::model::{
    CampaignRef, ContentRef, Experiment, ExperimentAggregate, ExperimentId, ExperimentStatus, Metadata,
    MetricSample, NewVariant, SampleId, TrafficSplit, UserRef, Variant, VariantId,
};

const MIGRATIONS: [&str; 1] = [include_str!("../../migrations/001_initial_schema.sql")];

pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

const EXPERIMENT_COLUMNS: &str = "id, name, campaign, created_by, description, primary_goal, \
     confidence_level, minimum_sample_size, duration_days, traffic_allocation, control_content, \
     status, start_date, end_date, metadata, created_at";

const VARIANT_COLUMNS: &str = "id, experiment_id, name, content_ref, traffic_split_tenths, \
     is_control, status, sample_size, metadata, created_at";

const SAMPLE_COLUMNS: &str = "id, experiment_id, variant_id, metric_name, value, sample_size, \
     recorded_date, recorded_at";

/// SQLite-backed store. Cheap to share: it only holds the database path.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { path, busy_timeout };
        let conn = store.connect()?;
        let version = run_migrations(&conn)?;
        tracing::debug!(
            target: "experiments::store::sqlite",
            path = %store.path.display(),
            schema_version = version,
            "opened experiment database"
        );
        Ok(store)
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open(&config.path, Duration::from_millis(config.busy_timeout_ms))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(conn)
    }
}

/// Apply pending migrations, tracked through `PRAGMA user_version`.
fn run_migrations(conn: &Connection) -> Result<u32> {
    let current_version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|err| ExperimentError::Migration(err.to_string()))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let target_version = (idx + 1) as u32;
        if current_version >= target_version {
            continue;
        }
        conn.execute_batch(sql).map_err(|err| {
            ExperimentError::Migration(format!("migration {target_version} failed: {err}"))
        })?;
        conn.pragma_update(None, "user_version", target_version).map_err(|err| {
            ExperimentError::Migration(format!("failed to set user_version {target_version}: {err}"))
        })?;
    }

    Ok(SCHEMA_VERSION)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        ty,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn get_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<ExperimentStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|msg| conversion_error(idx, Type::Text, msg))
}

fn get_metadata(row: &Row<'_>, idx: usize) -> rusqlite::Result<Metadata> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn experiment_from_row(row: &Row<'_>) -> rusqlite::Result<Experiment> {
    let confidence: i64 = row.get(6)?;
    let duration: i64 = row.get(8)?;
    Ok(Experiment {
        id: ExperimentId(row.get(0)?),
        name: row.get(1)?,
        campaign: CampaignRef(row.get(2)?),
        created_by: UserRef(row.get(3)?),
        description: row.get(4)?,
        primary_goal: row.get(5)?,
        confidence_level: u8::try_from(confidence)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Integer, Box::new(e)))?,
        minimum_sample_size: get_u64(row, 7)?,
        duration_days: u32::try_from(duration)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Integer, Box::new(e)))?,
        traffic_allocation: row.get(9)?,
        control_content: ContentRef(row.get(10)?),
        status: get_status(row, 11)?,
        start_date: row.get(12)?,
        end_date: row.get(13)?,
        metadata: get_metadata(row, 14)?,
        created_at: row.get(15)?,
    })
}

fn variant_from_row(row: &Row<'_>) -> rusqlite::Result<Variant> {
    let tenths: i64 = row.get(4)?;
    let traffic_split = u16::try_from(tenths)
        .ok()
        .and_then(TrafficSplit::from_tenths)
        .ok_or_else(|| conversion_error(4, Type::Integer, format!("traffic split out of range: {tenths}")))?;
    Ok(Variant {
        id: VariantId(row.get(0)?),
        experiment_id: ExperimentId(row.get(1)?),
        name: row.get(2)?,
        content_ref: ContentRef(row.get(3)?),
        traffic_split,
        is_control: row.get(5)?,
        status: get_status(row, 6)?,
        sample_size: get_u64(row, 7)?,
        metadata: get_metadata(row, 8)?,
        created_at: row.get(9)?,
    })
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<MetricSample> {
    Ok(MetricSample {
        id: SampleId(row.get(0)?),
        experiment_id: ExperimentId(row.get(1)?),
        variant_id: VariantId(row.get(2)?),
        metric_name: row.get(3)?,
        value: row.get(4)?,
        sample_size: get_u64(row, 5)?,
        recorded_date: row.get(6)?,
        recorded_at: row.get(7)?,
    })
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| ExperimentError::Corrupt(format!("{what} {value} exceeds storage range")))
}

// ---------------------------------------------------------------------------
// Queries shared by reads and units of work
// ---------------------------------------------------------------------------

fn load_aggregate_conn(conn: &Connection, id: ExperimentId) -> Result<Option<ExperimentAggregate>> {
    let experiment = conn
        .query_row(
            &format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = ?1"),
            [id.0],
            experiment_from_row,
        )
        .optional()?;
    let Some(experiment) = experiment else { return Ok(None) };

    let mut stmt = conn.prepare(&format!(
        "SELECT {VARIANT_COLUMNS} FROM variants WHERE experiment_id = ?1 ORDER BY is_control DESC, id"
    ))?;
    let variants = stmt
        .query_map([id.0], variant_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(ExperimentAggregate { experiment, variants }))
}

fn insert_variant(conn: &Connection, experiment_id: ExperimentId, variant: &NewVariant) -> Result<VariantId> {
    conn.execute(
        "INSERT INTO variants
         (experiment_id, name, content_ref, traffic_split_tenths, is_control, status, sample_size, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, '{}', ?7)",
        params![
            experiment_id.0,
            variant.name,
            variant.content_ref.as_str(),
            i64::from(variant.traffic_split.tenths()),
            variant.is_control,
            variant.status.as_str(),
            variant.created_at,
        ],
    )?;
    Ok(VariantId(conn.last_insert_rowid()))
}

impl ExperimentStore for SqliteStore {
    fn insert_experiment(&self, new: NewExperiment, variants: Vec<NewVariant>) -> Result<ExperimentAggregate> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let config = &new.config;
        tx.execute(
            "INSERT INTO experiments
             (name, campaign, created_by, description, primary_goal, confidence_level,
              minimum_sample_size, duration_days, traffic_allocation, control_content,
              status, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'draft', ?11, ?12)",
            params![
                config.name,
                config.campaign.as_str(),
                new.created_by.as_str(),
                config.description,
                config.primary_goal,
                i64::from(config.confidence_level),
                to_i64(config.minimum_sample_size, "minimum sample size")?,
                i64::from(config.duration_days),
                config.traffic_allocation,
                config.control_content.as_str(),
                serde_json::to_string(&config.metadata)?,
                new.created_at,
            ],
        )?;
        let id = ExperimentId(tx.last_insert_rowid());
        for variant in &variants {
            insert_variant(&tx, id, variant)?;
        }
        let aggregate = load_aggregate_conn(&tx, id)?.ok_or(ExperimentError::ExperimentNotFound(id))?;
        tx.commit()?;
        Ok(aggregate)
    }

    fn load_aggregate(&self, id: ExperimentId) -> Result<Option<ExperimentAggregate>> {
        let conn = self.connect()?;
        load_aggregate_conn(&conn, id)
    }

    fn load_samples(&self, id: ExperimentId) -> Result<Vec<MetricSample>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SAMPLE_COLUMNS} FROM metric_samples WHERE experiment_id = ?1 ORDER BY recorded_date, id"
        ))?;
        let samples = stmt
            .query_map([id.0], sample_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    fn apply<R, F>(&self, id: ExperimentId, plan: F) -> Result<Applied<R>>
    where
        F: FnOnce(&ExperimentAggregate) -> (Changeset, R),
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let aggregate = load_aggregate_conn(&tx, id)?.ok_or(ExperimentError::ExperimentNotFound(id))?;

        let (changes, value) = plan(&aggregate);
        if changes.is_empty() {
            // Nothing to write; dropping the transaction releases the lock.
            return Ok(Applied { value, aggregate, inserted_variants: Vec::new(), recorded: 0 });
        }

        if let Some(experiment) = &changes.experiment {
            tx.execute(
                "UPDATE experiments SET status = ?1, start_date = ?2, end_date = ?3, metadata = ?4 WHERE id = ?5",
                params![
                    experiment.status.as_str(),
                    experiment.start_date,
                    experiment.end_date,
                    serde_json::to_string(&experiment.metadata)?,
                    id.0,
                ],
            )?;
        }

        for variant in &changes.variants {
            let updated = tx.execute(
                "UPDATE variants SET status = ?1, metadata = ?2 WHERE id = ?3 AND experiment_id = ?4",
                params![
                    variant.status.as_str(),
                    serde_json::to_string(&variant.metadata)?,
                    variant.id.0,
                    id.0,
                ],
            )?;
            if updated == 0 {
                return Err(ExperimentError::VariantNotFound(variant.id));
            }
        }

        let mut inserted_ids = Vec::with_capacity(changes.new_variants.len());
        for variant in &changes.new_variants {
            inserted_ids.push(insert_variant(&tx, id, variant)?);
        }

        for sample in &changes.new_samples {
            let size = to_i64(sample.sample_size, "sample size")?;
            let updated = tx.execute(
                "UPDATE variants SET sample_size = sample_size + ?1 WHERE id = ?2 AND experiment_id = ?3",
                params![size, sample.variant_id.0, id.0],
            )?;
            if updated == 0 {
                return Err(ExperimentError::VariantNotFound(sample.variant_id));
            }
            tx.execute(
                "INSERT INTO metric_samples
                 (experiment_id, variant_id, metric_name, value, sample_size, recorded_date, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.0,
                    sample.variant_id.0,
                    sample.metric_name,
                    sample.value,
                    size,
                    sample.recorded_date,
                    sample.recorded_at,
                ],
            )?;
        }

        let committed = load_aggregate_conn(&tx, id)?.ok_or(ExperimentError::ExperimentNotFound(id))?;
        tx.commit()?;

        tracing::debug!(
            target: "experiments::store::sqlite",
            experiment_id = %id,
            variants_written = changes.variants.len(),
            variants_inserted = inserted_ids.len(),
            samples_appended = changes.new_samples.len(),
            "committed unit of work"
        );

        let inserted_variants = committed
            .variants
            .iter()
            .filter(|v| inserted_ids.contains(&v.id))
            .cloned()
            .collect();
        Ok(Applied { value, aggregate: committed, inserted_variants, recorded: changes.new_samples.len() })
    }

    fn list_experiments(&self) -> Result<Vec<Experiment>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments ORDER BY id"))?;
        let experiments = stmt
            .query_map([], experiment_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(experiments)
    }

    fn delete_experiment(&self, id: ExperimentId) -> Result<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM experiments WHERE id = ?1", [id.0])?;
        Ok(deleted > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
