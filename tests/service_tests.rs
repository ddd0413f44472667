//! End-to-end lifecycle scenarios for the orchestration service: creation,
//! traffic splits, state machine cascades, result ingestion and reports.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rstest::{fixture, rstest};

use content_experiments::analysis::RecommendationKind;
use content_experiments::clock::FixedClock;
use content_experiments::model::{CampaignRef, Metadata, MAX_SAMPLE_SIZE};
use content_experiments::{
    ContentCandidate, ContentRef, EngineConfig, ExperimentAggregate, ExperimentConfig, ExperimentId,
    ExperimentService, ExperimentStatus, ExperimentStore, MemoryStore, ResultEntry, SkipReason, UserRef,
    ValidationError, Verdict, VariantId,
};

type Service = ExperimentService<MemoryStore>;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 6, 8, 30, 0).unwrap()
}

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 4, n).unwrap()
}

fn actor() -> UserRef {
    UserRef::new("marketer@example.com")
}

fn config(min_sample_size: u64) -> ExperimentConfig {
    ExperimentConfig {
        name: "Spring newsletter subject".into(),
        campaign: CampaignRef::new("spring-2026"),
        description: "Emoji vs plain subject line".into(),
        primary_goal: "click_rate".into(),
        confidence_level: 95,
        minimum_sample_size: min_sample_size,
        duration_days: 14,
        traffic_allocation: 100.0,
        control_content: ContentRef::new("subject-plain"),
        metadata: Metadata::new(),
    }
}

struct Harness {
    clock: Arc<FixedClock>,
    service: Service,
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(FixedClock::new(t0()));
    let service = ExperimentService::with_clock(MemoryStore::new(), EngineConfig::default(), clock.clone());
    Harness { clock, service }
}

impl Harness {
    fn create(&self, min_sample_size: u64) -> ExperimentId {
        self.service
            .create_experiment(config(min_sample_size), &actor())
            .unwrap()
            .into_result()
            .unwrap()
            .id()
    }

    fn add(&self, id: ExperimentId, content: &str, split: f64) -> VariantId {
        self.service
            .add_variant(id, ContentRef::new(content), content, split, &actor())
            .unwrap()
            .into_result()
            .unwrap()
            .id
    }

    fn load(&self, id: ExperimentId) -> ExperimentAggregate {
        self.service.get_experiment(id).unwrap().unwrap()
    }

    fn assert_cascaded(&self, id: ExperimentId) {
        let agg = self.load(id);
        for variant in &agg.variants {
            assert_eq!(variant.status, agg.experiment.status, "variant {} out of sync", variant.id);
        }
    }
}

// ===== creation =====

#[rstest]
#[case::empty_name(ExperimentConfig { name: "".into(), ..config(100) }, ValidationError::EmptyName)]
#[case::zero_samples(ExperimentConfig { minimum_sample_size: 0, ..config(100) }, ValidationError::NonPositiveMinimumSampleSize)]
#[case::zero_days(ExperimentConfig { duration_days: 0, ..config(100) }, ValidationError::NonPositiveDuration)]
#[case::confidence(
    ExperimentConfig { confidence_level: 97, ..config(100) },
    ValidationError::UnsupportedConfidenceLevel { level: 97, allowed: vec![90, 95, 99] }
)]
#[case::allocation(ExperimentConfig { traffic_allocation: 101.0, ..config(100) }, ValidationError::InvalidTrafficAllocation(101.0))]
fn test_create_rejects_invalid_config(harness: Harness, #[case] cfg: ExperimentConfig, #[case] expected: ValidationError) {
    let outcome = harness.service.create_experiment(cfg, &actor()).unwrap();
    assert!(!outcome.success);
    assert!(outcome.value.is_none());
    assert_eq!(outcome.errors, vec![expected]);
}

#[rstest]
#[case(90)]
#[case(95)]
#[case(99)]
fn test_create_accepts_allowed_confidence_levels(harness: Harness, #[case] level: u8) {
    let outcome = harness
        .service
        .create_experiment(ExperimentConfig { confidence_level: level, ..config(100) }, &actor())
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.value.unwrap().experiment.status, ExperimentStatus::Draft);
}

// ===== traffic split =====

#[rstest]
fn test_second_variant_exceeding_split_is_rejected(harness: Harness) {
    let id = harness.create(100);
    harness.add(id, "subject-emoji", 60.0);

    let outcome = harness
        .service
        .add_variant(id, ContentRef::new("subject-question"), "Question", 50.0, &actor())
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.errors, vec![ValidationError::TrafficSplitExceeded { allocated: 60.0, requested: 50.0 }]);
    assert!(outcome.errors[0].to_string().contains("traffic split exceeded"));
    assert_eq!(harness.load(id).treatments().count(), 1);
}

#[rstest]
#[case(&[50.0, 50.0], true)]
#[case(&[33.3, 33.3, 33.4], true)]
#[case(&[0.0, 100.0], true)]
#[case(&[99.9, 0.2], false)]
fn test_split_cap_is_exact_to_one_decimal(harness: Harness, #[case] splits: &[f64], #[case] last_accepted: bool) {
    let id = harness.create(100);
    let (last, head) = splits.split_last().unwrap();
    for (i, split) in head.iter().enumerate() {
        harness.add(id, &format!("content-{i}"), *split);
    }
    let outcome = harness
        .service
        .add_variant(id, ContentRef::new("content-last"), "Last", *last, &actor())
        .unwrap();
    assert_eq!(outcome.success, last_accepted, "errors={:?}", outcome.errors);
    assert!(harness.load(id).allocated_tenths() <= 1000);
}

#[rstest]
fn test_add_variant_after_start_is_rejected(harness: Harness) {
    let id = harness.create(100);
    harness.add(id, "subject-emoji", 30.0);
    harness.service.start(id, None, &actor()).unwrap();
    let outcome = harness
        .service
        .add_variant(id, ContentRef::new("subject-late"), "Late", 10.0, &actor())
        .unwrap();
    assert_eq!(outcome.errors, vec![ValidationError::NotDraft(ExperimentStatus::Active)]);
}

// ===== bulk create =====

#[rstest]
fn test_bulk_create_splits_evenly(harness: Harness) {
    let candidates = vec![
        ContentCandidate::named("gen-1", "Original"),
        ContentCandidate::new("gen-2"),
        ContentCandidate::new("gen-3"),
        ContentCandidate::new("gen-4"),
    ];
    let agg = harness
        .service
        .bulk_create_from_content_list(candidates, config(100), &actor())
        .unwrap()
        .into_result()
        .unwrap();
    let control = agg.control().unwrap();
    assert_eq!(control.content_ref, ContentRef::new("gen-1"));
    assert_eq!(control.name, "Original");
    assert_eq!(agg.experiment.control_content, ContentRef::new("gen-1"));
    let splits: Vec<f64> = agg.treatments().map(|v| v.traffic_split.as_percent()).collect();
    assert_eq!(splits, vec![33.3, 33.3, 33.3]);
    let names: Vec<&str> = agg.treatments().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["Variant 1", "Variant 2", "Variant 3"]);
}

#[rstest]
#[case(2, 100.0)]
#[case(3, 50.0)]
#[case(7, 16.6)]
#[case(8, 14.2)]
fn test_bulk_create_share_never_overflows(harness: Harness, #[case] count: usize, #[case] share: f64) {
    let candidates = (0..count).map(|i| ContentCandidate::new(format!("c{i}"))).collect();
    let agg = harness
        .service
        .bulk_create_from_content_list(candidates, config(100), &actor())
        .unwrap()
        .into_result()
        .unwrap();
    assert!(agg.treatments().all(|v| v.traffic_split.as_percent() == share));
    assert!(agg.allocated_tenths() <= 1000);
}

#[rstest]
fn test_bulk_create_needs_two_distinct_candidates(harness: Harness) {
    let one = harness
        .service
        .bulk_create_from_content_list(vec![ContentCandidate::new("only")], config(100), &actor())
        .unwrap();
    assert_eq!(one.errors, vec![ValidationError::NotEnoughCandidates { required: 2, given: 1 }]);

    let dup = harness
        .service
        .bulk_create_from_content_list(vec![ContentCandidate::new("a"), ContentCandidate::new("a")], config(100), &actor())
        .unwrap();
    assert_eq!(dup.errors, vec![ValidationError::DuplicateContent(ContentRef::new("a"))]);
    assert!(harness.service.list_experiments().unwrap().is_empty());
}

// ===== lifecycle =====

#[rstest]
fn test_start_without_variants_stays_draft(harness: Harness) {
    let id = harness.create(100);
    let outcome = harness.service.start(id, None, &actor()).unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.errors, vec![ValidationError::NoVariants]);
    let agg = harness.load(id);
    assert_eq!(agg.experiment.status, ExperimentStatus::Draft);
    assert!(agg.experiment.start_date.is_none());
    assert!(agg.experiment.end_date.is_none());
}

#[rstest]
#[case(1)]
#[case(14)]
#[case(90)]
fn test_end_date_is_start_plus_duration(harness: Harness, #[case] days: u32) {
    let id = harness
        .service
        .create_experiment(ExperimentConfig { duration_days: days, ..config(100) }, &actor())
        .unwrap()
        .value
        .unwrap()
        .id();
    harness.add(id, "subject-emoji", 50.0);
    let start = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
    let agg = harness.service.start(id, Some(start), &actor()).unwrap().value.unwrap();
    assert_eq!(agg.experiment.start_date, Some(start));
    assert_eq!(agg.experiment.end_date.unwrap() - start, Duration::days(i64::from(days)));
}

#[rstest]
fn test_every_transition_cascades(harness: Harness) {
    let id = harness.create(10);
    let variant = harness.add(id, "subject-emoji", 25.0);
    harness.add(id, "subject-question", 25.0);
    harness.assert_cascaded(id);

    assert!(harness.service.start(id, None, &actor()).unwrap().success);
    harness.assert_cascaded(id);
    assert!(harness.service.pause(id, "budget review", &actor()).unwrap().success);
    harness.assert_cascaded(id);
    assert!(harness.service.resume(id, "budget approved", &actor()).unwrap().success);
    harness.assert_cascaded(id);

    harness
        .service
        .record_results(id, vec![ResultEntry::new(variant, "click_rate", 2.0, 10)])
        .unwrap();
    assert!(harness.service.complete(id, &actor()).unwrap().success);
    harness.assert_cascaded(id);
    assert_eq!(harness.load(id).experiment.status, ExperimentStatus::Completed);
}

#[rstest]
fn test_rejected_transitions_leave_experiment_unchanged(harness: Harness) {
    let id = harness.create(100);
    harness.add(id, "subject-emoji", 50.0);
    let before = harness.load(id);

    assert!(!harness.service.pause(id, "x", &actor()).unwrap().success);
    assert!(!harness.service.resume(id, "x", &actor()).unwrap().success);
    assert!(!harness.service.stop(id, "x", &actor()).unwrap().success);
    assert!(!harness.service.complete(id, &actor()).unwrap().success);

    assert_eq!(harness.load(id), before);
}

#[rstest]
fn test_stopped_and_completed_are_terminal(harness: Harness) {
    let id = harness.create(1);
    let variant = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    harness.service.record_results(id, vec![ResultEntry::new(variant, "click_rate", 1.0, 1)]).unwrap();
    harness.service.complete(id, &actor()).unwrap();

    for outcome in [
        harness.service.pause(id, "", &actor()).unwrap(),
        harness.service.resume(id, "", &actor()).unwrap(),
        harness.service.stop(id, "", &actor()).unwrap(),
        harness.service.complete(id, &actor()).unwrap(),
        harness.service.start(id, None, &actor()).unwrap(),
    ] {
        assert!(!outcome.success);
    }
    assert_eq!(harness.load(id).experiment.status, ExperimentStatus::Completed);
}

#[rstest]
fn test_stop_fixes_end_date_and_stores_reason(harness: Harness) {
    let id = harness.create(100);
    harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    harness.clock.advance(Duration::days(2));
    harness.service.pause(id, "tracking outage", &actor()).unwrap();
    harness.clock.advance(Duration::hours(5));

    let agg = harness.service.stop(id, "variant copy had a typo", &actor()).unwrap().value.unwrap();
    assert_eq!(agg.experiment.status, ExperimentStatus::Stopped);
    assert_eq!(agg.experiment.end_date, Some(t0() + Duration::days(2) + Duration::hours(5)));
    assert_eq!(agg.experiment.metadata["stop_reason"], "variant copy had a typo");
    assert_eq!(agg.experiment.metadata["pause_reason"], "tracking outage");
    assert!(agg.experiment.end_date >= agg.experiment.start_date);
}

#[rstest]
fn test_complete_requires_minimum_sample_size(harness: Harness) {
    let id = harness.create(100);
    let variant = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    harness
        .service
        .record_results(id, vec![ResultEntry::new(variant, "click_rate", 2.0, 99)])
        .unwrap();

    let outcome = harness.service.complete(id, &actor()).unwrap();
    assert_eq!(outcome.errors, vec![ValidationError::InsufficientSampleSize { current: 99, required: 100 }]);
    assert_eq!(harness.load(id).experiment.status, ExperimentStatus::Active);

    let control = harness.load(id).control().unwrap().id;
    harness.service.record_results(id, vec![ResultEntry::new(control, "click_rate", 2.0, 1)]).unwrap();
    assert!(harness.service.complete(id, &actor()).unwrap().success);
}

// ===== the canonical scenario =====

#[rstest]
fn test_scenario_start_record_complete(harness: Harness) {
    let id = harness.create(100);
    let variant = harness.add(id, "subject-emoji", 50.0);

    let started = harness.service.start(id, None, &actor()).unwrap().value.unwrap();
    assert_eq!(started.experiment.status, ExperimentStatus::Active);
    assert!(started.experiment.end_date.is_some());

    for d in 6..=10 {
        let outcome = harness
            .service
            .record_results(id, vec![ResultEntry::new(variant, "click_rate", 2.0 + f64::from(d) / 10.0, 50).on(day(d))])
            .unwrap();
        assert_eq!(outcome.recorded, 1);
    }
    assert_eq!(harness.load(id).variant(variant).unwrap().sample_size, 250);

    let done = harness.service.complete(id, &actor()).unwrap().value.unwrap();
    assert_eq!(done.experiment.status, ExperimentStatus::Completed);
    assert_eq!(done.variant(variant).unwrap().status, ExperimentStatus::Completed);
    assert!(done.experiment.metadata.contains_key("completed_at"));
}

// ===== record_results =====

#[rstest]
fn test_unknown_variant_is_dropped_silently(harness: Harness) {
    let id = harness.create(100);
    harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();

    let outcome = harness
        .service
        .record_results(id, vec![ResultEntry::new(VariantId(999_999), "click_rate", 2.5, 100)])
        .unwrap();
    assert_eq!(outcome.recorded, 0);
    assert_eq!(outcome.skipped.len(), 1);
    assert!(harness.service.store().load_samples(id).is_ok_and(|s| s.is_empty()));
}

#[rstest]
fn test_variant_of_other_experiment_is_foreign(harness: Harness) {
    let a = harness.create(100);
    let b = harness.create(100);
    let b_variant = harness.add(b, "subject-emoji", 50.0);
    harness.add(a, "subject-emoji", 50.0);
    harness.service.start(a, None, &actor()).unwrap();

    let outcome = harness
        .service
        .record_results(a, vec![ResultEntry::new(b_variant, "click_rate", 2.5, 100)])
        .unwrap();
    assert_eq!(outcome.recorded, 0);
    assert_eq!(harness.load(b).variant(b_variant).unwrap().sample_size, 0);
}

#[rstest]
#[case::active(false, false)]
#[case::paused(true, false)]
#[case::stopped(false, true)]
fn test_recording_allowed_after_start(harness: Harness, #[case] pause: bool, #[case] stop: bool) {
    let id = harness.create(100);
    let variant = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    if pause {
        harness.service.pause(id, "", &actor()).unwrap();
    }
    if stop {
        harness.service.stop(id, "", &actor()).unwrap();
    }
    let outcome = harness
        .service
        .record_results(id, vec![ResultEntry::new(variant, "click_rate", 2.5, 10)])
        .unwrap();
    assert_eq!(outcome.recorded, 1);
}

#[rstest]
fn test_same_day_corrections_are_separate_rows(harness: Harness) {
    let id = harness.create(100);
    let variant = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    harness
        .service
        .record_results(
            id,
            vec![
                ResultEntry::new(variant, "click_rate", 2.0, 100).on(day(7)),
                ResultEntry::new(variant, "click_rate", 4.0, 10).on(day(7)),
            ],
        )
        .unwrap();
    let metrics = harness.service.performance_metrics(id, variant).unwrap();
    let click = metrics["click_rate"];
    assert_eq!(click.count, 2);
    assert!((click.average - 3.0).abs() < 1e-12);
    assert_eq!(click.observations, 110);
    assert!(harness.service.audit_sample_sizes(id).unwrap().is_empty());
}

#[rstest]
fn test_oversized_sample_size_is_skipped_not_fatal(harness: Harness) {
    let id = harness.create(100);
    let variant = harness.add(id, "subject-emoji", 50.0);
    let control = harness.load(id).control().unwrap().id;
    harness.service.start(id, None, &actor()).unwrap();

    let outcome = harness
        .service
        .record_results(
            id,
            vec![
                ResultEntry::new(control, "click_rate", 2.0, u64::MAX),
                ResultEntry::new(variant, "click_rate", 2.5, 1),
            ],
        )
        .unwrap();
    assert_eq!(outcome.recorded, 1);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].index, 0);
    assert_eq!(outcome.skipped[0].reason, SkipReason::SampleSizeOutOfRange);

    let agg = harness.load(id);
    assert_eq!(agg.variant(control).unwrap().sample_size, 0);
    assert_eq!(agg.total_sample_size(), 1);
    assert!(harness.service.audit_sample_sizes(id).unwrap().is_empty());
    let outcome = harness.service.complete(id, &actor()).unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.errors,
        vec![ValidationError::InsufficientSampleSize { current: 1, required: 100 }]
    );
    assert_eq!(harness.service.generate_performance_report(id).unwrap().test_summary.total_sample_size, 1);
}

#[rstest]
fn test_running_total_counts_earlier_entries_in_batch(harness: Harness) {
    let id = harness.create(100);
    let variant = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();

    let half = MAX_SAMPLE_SIZE / 2 + 1;
    let outcome = harness
        .service
        .record_results(
            id,
            vec![
                ResultEntry::new(variant, "click_rate", 2.0, half),
                ResultEntry::new(variant, "click_rate", 2.5, half),
            ],
        )
        .unwrap();
    assert_eq!(outcome.recorded, 1);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].index, 1);
    assert_eq!(outcome.skipped[0].reason, SkipReason::SampleSizeOutOfRange);
    assert_eq!(harness.load(id).variant(variant).unwrap().sample_size, half);
    assert!(harness.service.audit_sample_sizes(id).unwrap().is_empty());
}

#[rstest]
fn test_experiment_total_saturates_across_arms(harness: Harness) {
    let id = harness.create(100);
    let b = harness.add(id, "subject-emoji", 30.0);
    let c = harness.add(id, "subject-question", 30.0);
    let control = harness.load(id).control().unwrap().id;
    harness.service.start(id, None, &actor()).unwrap();

    let batch = [control, b, c]
        .into_iter()
        .map(|v| ResultEntry::new(v, "click_rate", 2.0, MAX_SAMPLE_SIZE))
        .collect();
    assert_eq!(harness.service.record_results(id, batch).unwrap().recorded, 3);
    assert_eq!(harness.load(id).total_sample_size(), u64::MAX);
    assert!(harness.service.audit_sample_sizes(id).unwrap().is_empty());
    assert!(harness.service.complete(id, &actor()).unwrap().success);
}

#[rstest]
fn test_variants_take_creation_time_from_service_clock(harness: Harness) {
    let id = harness.create(100);
    assert_eq!(harness.load(id).control().unwrap().created_at, t0());

    harness.clock.advance(Duration::hours(3));
    let variant = harness.add(id, "subject-emoji", 50.0);
    let agg = harness.load(id);
    assert_eq!(agg.variant(variant).unwrap().created_at, t0() + Duration::hours(3));
    assert_eq!(agg.experiment.created_at, t0());

    harness.clock.advance(Duration::days(1));
    let bulk = harness
        .service
        .bulk_create_from_content_list(
            vec![ContentCandidate::new("hero-a"), ContentCandidate::new("hero-b")],
            config(100),
            &actor(),
        )
        .unwrap()
        .into_result()
        .unwrap();
    let expected = t0() + Duration::hours(3) + Duration::days(1);
    assert!(bulk.variants.iter().all(|v| v.created_at == expected));
}

// ===== reads =====

#[rstest]
fn test_performance_metrics_is_idempotent(harness: Harness) {
    let id = harness.create(100);
    let variant = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    harness
        .service
        .record_results(
            id,
            vec![ResultEntry::new(variant, "click_rate", 2.0, 10), ResultEntry::new(variant, "conversions", 3.0, 10)],
        )
        .unwrap();
    let first = harness.service.performance_metrics(id, variant).unwrap();
    let second = harness.service.performance_metrics(id, variant).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[rstest]
fn test_compare_with_control_empty_without_control_data(harness: Harness) {
    let id = harness.create(100);
    let variant = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    harness
        .service
        .record_results(id, vec![ResultEntry::new(variant, "click_rate", 2.0, 10)])
        .unwrap();
    assert!(harness.service.compare_with_control(id, variant).unwrap().is_empty());
}

#[rstest]
fn test_current_results_shape(harness: Harness) {
    let id = harness.create(100);
    let emoji = harness.add(id, "subject-emoji", 30.0);
    harness.add(id, "subject-question", 20.0);
    harness.service.start(id, None, &actor()).unwrap();
    harness
        .service
        .record_results(id, vec![ResultEntry::new(emoji, "click_rate", 2.0, 40)])
        .unwrap();

    let results = harness.service.current_results(id).unwrap();
    let control = results.control.unwrap();
    assert_eq!(control.traffic_split.as_percent(), 50.0);
    assert_eq!(results.variants.len(), 2);
    assert_eq!(results.variants[0].variant_name, "subject-emoji");
    assert_eq!(results.variants[0].sample_size, 40);
    assert!(results.variants[1].metrics.is_empty());
}

#[rstest]
fn test_b_outperforming_below_minimum_is_not_a_winner(harness: Harness) {
    let id = harness.create(1_000_000);
    let b = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    let a = harness.load(id).control().unwrap().id;

    let mut batch = Vec::new();
    for d in 6..=12 {
        let jitter = f64::from(d % 3) * 0.05;
        batch.push(ResultEntry::new(a, "click_rate", 2.0 + jitter, 400).on(day(d)));
        batch.push(ResultEntry::new(b, "click_rate", 2.6 + jitter, 400).on(day(d)));
    }
    assert_eq!(harness.service.record_results(id, batch).unwrap().recorded, 14);

    let comparison = harness.service.compare_with_control(id, b).unwrap();
    assert!(comparison["click_rate"].improved);
    assert!(comparison["click_rate"].delta > 0.5);

    let report = harness.service.generate_performance_report(id).unwrap();
    assert_eq!(report.winner.verdict, Verdict::InsufficientData);
    assert!(report.winner.winner().is_none());
    assert!(report.winner.confidence_achieved.is_some());
    let leading = report
        .recommendations
        .iter()
        .find(|r| r.kind == RecommendationKind::LeadingVariant)
        .expect("leading variant recommendation");
    assert!(leading.message.contains("subject-emoji"));
    assert!(report.recommendations.iter().any(|r| r.kind == RecommendationKind::InsufficientSampleSize));
}

#[rstest]
fn test_report_declares_winner_with_enough_data(harness: Harness) {
    let id = harness.create(1_000);
    let b = harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    let a = harness.load(id).control().unwrap().id;

    let mut batch = Vec::new();
    for d in 6..=12 {
        batch.push(ResultEntry::new(a, "click_rate", 2.0, 5_000).on(day(d)));
        batch.push(ResultEntry::new(b, "click_rate", 3.0, 5_000).on(day(d)));
    }
    harness.service.record_results(id, batch).unwrap();
    harness.clock.advance(Duration::days(7));

    let report = harness.service.generate_performance_report(id).unwrap();
    assert_eq!(report.winner.winner(), Some(b));
    assert!(report.winner.confidence_achieved.unwrap() >= 95.0);
    assert_eq!(report.recommendations[0].kind, RecommendationKind::ClearWinner);
    assert_eq!(report.test_summary.total_sample_size, 70_000);
    assert_eq!(report.test_summary.days_running, 7);
    assert_eq!(report.performance_trends.len(), 2);
    assert_eq!(report.performance_trends[1].metrics["click_rate"].points.len(), 7);
}

#[rstest]
fn test_report_never_fails_on_missing_data(harness: Harness) {
    let id = harness.create(100);
    harness.add(id, "subject-emoji", 50.0);
    harness.service.start(id, None, &actor()).unwrap();
    let report = harness.service.generate_performance_report(id).unwrap();
    assert!(report.current_results.variants[0].metrics.is_empty());
    assert_eq!(report.winner.verdict, Verdict::InsufficientData);
    assert_eq!(report.recommendations.len(), 1);
    assert_eq!(report.recommendations[0].kind, RecommendationKind::CollectData);
}

#[rstest]
#[case(100.0)]
#[case(25.5)]
fn test_report_summary_carries_traffic_allocation(harness: Harness, #[case] allocation: f64) {
    let id = harness
        .service
        .create_experiment(ExperimentConfig { traffic_allocation: allocation, ..config(100) }, &actor())
        .unwrap()
        .into_result()
        .unwrap()
        .id();
    let report = harness.service.generate_performance_report(id).unwrap();
    assert_eq!(report.test_summary.traffic_allocation, allocation);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["test_summary"]["traffic_allocation"], allocation);
}
