//! The orchestration service running over the durable SQLite store.
//!
//! Each test gets its own database inside a `tempfile::TempDir`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use content_experiments::clock::FixedClock;
use content_experiments::model::{CampaignRef, Metadata, MAX_SAMPLE_SIZE};
use content_experiments::{
    ContentCandidate, ContentRef, EngineConfig, ExperimentConfig, ExperimentError, ExperimentId,
    ExperimentService, ExperimentStatus, ExperimentStore, ResultEntry, SkipReason, SqliteStore, UserRef,
    ValidationError, Verdict, VariantId,
};

fn actor() -> UserRef {
    UserRef::new("analyst")
}

fn config(min_sample_size: u64) -> ExperimentConfig {
    ExperimentConfig {
        name: "Landing hero copy".into(),
        campaign: CampaignRef::new("launch-q2"),
        description: String::new(),
        primary_goal: "conversion_rate".into(),
        confidence_level: 95,
        minimum_sample_size: min_sample_size,
        duration_days: 10,
        traffic_allocation: 80.0,
        control_content: ContentRef::new("hero-v1"),
        metadata: Metadata::new(),
    }
}

fn service_at(dir: &TempDir, clock: Arc<FixedClock>) -> ExperimentService<SqliteStore> {
    let store = SqliteStore::open(dir.path().join("experiments.db"), StdDuration::from_secs(5)).unwrap();
    ExperimentService::with_clock(store, EngineConfig::default(), clock)
}

fn setup() -> (TempDir, Arc<FixedClock>, ExperimentService<SqliteStore>) {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()));
    let service = service_at(&dir, clock.clone());
    (dir, clock, service)
}

fn create_with_variant(service: &ExperimentService<SqliteStore>, min: u64) -> (ExperimentId, VariantId) {
    let id = service.create_experiment(config(min), &actor()).unwrap().value.unwrap().id();
    let variant = service
        .add_variant(id, ContentRef::new("hero-v2"), "Benefit led", 50.0, &actor())
        .unwrap()
        .value
        .unwrap();
    (id, variant.id)
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[test]
fn test_sqlite_scenario_start_record_complete() {
    let (_dir, _clock, service) = setup();
    let (id, variant) = create_with_variant(&service, 100);

    let started = service.start(id, None, &actor()).unwrap().value.unwrap();
    assert_eq!(started.experiment.status, ExperimentStatus::Active);
    assert!(started.variants.iter().all(|v| v.status == ExperimentStatus::Active));

    for d in 1..=5 {
        let entry = ResultEntry::new(variant, "conversion_rate", 4.0, 50).on(NaiveDate::from_ymd_opt(2026, 6, d).unwrap());
        assert_eq!(service.record_results(id, vec![entry]).unwrap().recorded, 1);
    }

    let done = service.complete(id, &actor()).unwrap().value.unwrap();
    assert_eq!(done.experiment.status, ExperimentStatus::Completed);
    assert_eq!(done.variant(variant).unwrap().status, ExperimentStatus::Completed);
    assert_eq!(done.variant(variant).unwrap().sample_size, 250);
    assert!(service.audit_sample_sizes(id).unwrap().is_empty());
}

#[test]
fn test_sqlite_split_cap_is_enforced() {
    let (_dir, _clock, service) = setup();
    let id = service.create_experiment(config(100), &actor()).unwrap().value.unwrap().id();
    assert!(service.add_variant(id, ContentRef::new("hero-v2"), "A", 60.0, &actor()).unwrap().success);
    let second = service.add_variant(id, ContentRef::new("hero-v3"), "B", 50.0, &actor()).unwrap();
    assert!(matches!(second.errors[0], ValidationError::TrafficSplitExceeded { .. }));
    assert_eq!(service.get_experiment(id).unwrap().unwrap().treatments().count(), 1);
}

#[test]
fn test_sqlite_rejected_start_writes_nothing() {
    let (_dir, _clock, service) = setup();
    let id = service.create_experiment(config(100), &actor()).unwrap().value.unwrap().id();
    let before = service.get_experiment(id).unwrap().unwrap();
    let outcome = service.start(id, None, &actor()).unwrap();
    assert_eq!(outcome.errors, vec![ValidationError::NoVariants]);
    assert_eq!(service.get_experiment(id).unwrap().unwrap(), before);
}

#[test]
fn test_sqlite_transition_history_survives_reload() {
    let (_dir, clock, service) = setup();
    let (id, _) = create_with_variant(&service, 100);
    service.start(id, None, &actor()).unwrap();
    clock.advance(Duration::days(1));
    service.pause(id, "creative review", &actor()).unwrap();
    clock.advance(Duration::days(1));
    service.stop(id, "copy rejected by legal", &actor()).unwrap();

    let agg = service.get_experiment(id).unwrap().unwrap();
    let history = agg.experiment.metadata["status_history"].as_array().unwrap();
    let ops: Vec<&str> = history.iter().map(|h| h["operation"].as_str().unwrap()).collect();
    assert_eq!(ops, vec!["start", "pause", "stop"]);
    assert_eq!(agg.experiment.metadata["stop_reason"], "copy rejected by legal");
    assert_eq!(agg.experiment.end_date, Some(Utc.with_ymd_and_hms(2026, 6, 3, 12, 0, 0).unwrap()));
}

// ----------------------------------------------------------------------------
// Ingestion
// ----------------------------------------------------------------------------

#[test]
fn test_sqlite_unknown_variant_records_nothing() {
    let (_dir, _clock, service) = setup();
    let (id, _) = create_with_variant(&service, 100);
    service.start(id, None, &actor()).unwrap();
    let outcome = service
        .record_results(id, vec![ResultEntry::new(VariantId(999_999), "conversion_rate", 2.5, 100)])
        .unwrap();
    assert_eq!(outcome.recorded, 0);
    assert!(service.store().load_samples(id).unwrap().is_empty());
}

#[test]
fn test_sqlite_mixed_batch_keeps_good_entries() {
    let (_dir, _clock, service) = setup();
    let (id, variant) = create_with_variant(&service, 100);
    service.start(id, None, &actor()).unwrap();
    let outcome = service
        .record_results(
            id,
            vec![
                ResultEntry::new(variant, "conversion_rate", 3.0, 20),
                ResultEntry::new(VariantId(424_242), "conversion_rate", 3.0, 20),
                ResultEntry::new(variant, "revenue", 120.5, 20),
            ],
        )
        .unwrap();
    assert_eq!(outcome.recorded, 2);
    assert_eq!(outcome.skipped.len(), 1);
    let agg = service.get_experiment(id).unwrap().unwrap();
    assert_eq!(agg.variant(variant).unwrap().sample_size, 40);
    assert!(service.audit_sample_sizes(id).unwrap().is_empty());
}

#[test]
fn test_sqlite_oversized_entry_does_not_roll_back_batch() {
    let (_dir, _clock, service) = setup();
    let (id, variant) = create_with_variant(&service, 100);
    service.start(id, None, &actor()).unwrap();
    let outcome = service
        .record_results(
            id,
            vec![
                ResultEntry::new(variant, "conversion_rate", 3.0, 50),
                ResultEntry::new(variant, "conversion_rate", 3.0, u64::MAX),
            ],
        )
        .unwrap();
    assert_eq!(outcome.recorded, 1);
    assert_eq!(outcome.skipped[0].reason, SkipReason::SampleSizeOutOfRange);
    assert_eq!(service.store().load_samples(id).unwrap().len(), 1);
    let agg = service.get_experiment(id).unwrap().unwrap();
    assert_eq!(agg.variant(variant).unwrap().sample_size, 50);
    assert!(service.audit_sample_sizes(id).unwrap().is_empty());
}

#[test]
fn test_sqlite_running_total_stays_in_column_range() {
    let (_dir, _clock, service) = setup();
    let (id, variant) = create_with_variant(&service, 100);
    service.start(id, None, &actor()).unwrap();
    let half = MAX_SAMPLE_SIZE / 2 + 1;
    let entry = || vec![ResultEntry::new(variant, "conversion_rate", 3.0, half)];

    assert_eq!(service.record_results(id, entry()).unwrap().recorded, 1);
    let second = service.record_results(id, entry()).unwrap();
    assert_eq!(second.recorded, 0);
    assert_eq!(second.skipped[0].reason, SkipReason::SampleSizeOutOfRange);

    let agg = service.get_experiment(id).unwrap().unwrap();
    assert_eq!(agg.variant(variant).unwrap().sample_size, half);
    assert!(service.generate_performance_report(id).is_ok());
}

// ----------------------------------------------------------------------------
// Durability
// ----------------------------------------------------------------------------

#[test]
fn test_sqlite_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()));
    let (id, variant) = {
        let service = service_at(&dir, clock.clone());
        let (id, variant) = create_with_variant(&service, 10);
        service.start(id, None, &actor()).unwrap();
        service
            .record_results(id, vec![ResultEntry::new(variant, "conversion_rate", 5.0, 30)])
            .unwrap();
        (id, variant)
    };

    let reopened = service_at(&dir, clock);
    let agg = reopened.get_experiment(id).unwrap().unwrap();
    assert_eq!(agg.experiment.status, ExperimentStatus::Active);
    assert_eq!(agg.experiment.traffic_allocation, 80.0);
    assert_eq!(agg.variant(variant).unwrap().traffic_split.as_percent(), 50.0);
    assert_eq!(agg.variant(variant).unwrap().sample_size, 30);
    let metrics = reopened.performance_metrics(id, variant).unwrap();
    assert_eq!(metrics["conversion_rate"].observations, 30);
}

#[test]
fn test_sqlite_variant_created_at_follows_service_clock() {
    let (dir, clock, service) = setup();
    let id = service.create_experiment(config(100), &actor()).unwrap().value.unwrap().id();
    clock.advance(Duration::minutes(45));
    let variant = service
        .add_variant(id, ContentRef::new("hero-v2"), "Benefit led", 50.0, &actor())
        .unwrap()
        .value
        .unwrap();
    let added_at = Utc.with_ymd_and_hms(2026, 6, 1, 12, 45, 0).unwrap();
    assert_eq!(variant.created_at, added_at);

    let reopened = service_at(&dir, clock);
    let agg = reopened.get_experiment(id).unwrap().unwrap();
    assert_eq!(agg.control().unwrap().created_at, Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap());
    assert_eq!(agg.variant(variant.id).unwrap().created_at, added_at);
    assert_eq!(reopened.generate_performance_report(id).unwrap().test_summary.traffic_allocation, 80.0);
}

#[test]
fn test_sqlite_bulk_create_and_report() {
    let (_dir, clock, service) = setup();
    let agg = service
        .bulk_create_from_content_list(
            vec![ContentCandidate::new("hero-v1"), ContentCandidate::new("hero-v2"), ContentCandidate::new("hero-v3")],
            config(1_000),
            &actor(),
        )
        .unwrap()
        .value
        .unwrap();
    let id = agg.id();
    let control = agg.control().unwrap().id;
    let arms: Vec<VariantId> = agg.treatments().map(|v| v.id).collect();
    service.start(id, None, &actor()).unwrap();

    let mut batch = Vec::new();
    for d in 1..=4 {
        let date = NaiveDate::from_ymd_opt(2026, 6, d).unwrap();
        batch.push(ResultEntry::new(control, "conversion_rate", 3.0, 2_000).on(date));
        batch.push(ResultEntry::new(arms[0], "conversion_rate", 3.1, 2_000).on(date));
        batch.push(ResultEntry::new(arms[1], "conversion_rate", 4.5, 2_000).on(date));
    }
    service.record_results(id, batch).unwrap();
    clock.advance(Duration::days(4));

    let report = service.generate_performance_report(id).unwrap();
    assert_eq!(report.winner.winner(), Some(arms[1]));
    assert_eq!(report.winner.verdict, Verdict::VariantWins { variant_id: arms[1], variant_name: "Variant 2".into() });
    assert_eq!(report.test_summary.variant_count, 2);
    assert_eq!(report.current_results.control.unwrap().traffic_split.as_percent(), 0.0);
}

#[test]
fn test_sqlite_delete_cascades_and_unknown_is_fault() {
    let (_dir, _clock, service) = setup();
    let (id, variant) = create_with_variant(&service, 100);
    service.start(id, None, &actor()).unwrap();
    service
        .record_results(id, vec![ResultEntry::new(variant, "conversion_rate", 3.0, 20)])
        .unwrap();

    assert!(service.delete_experiment(id, &actor()).unwrap());
    assert!(service.get_experiment(id).unwrap().is_none());
    assert!(service.store().load_samples(id).unwrap().is_empty());
    assert!(matches!(
        service.current_results(id).unwrap_err(),
        ExperimentError::ExperimentNotFound(missing) if missing == id
    ));
}
