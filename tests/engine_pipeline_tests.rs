//! End-to-end tests of the online decision loop: state update, feature
//! building, action selection, reward, delayed credit, and trend sampling
//! driven through the public engine surface.

use adaptive_engine::config::EngineConfig;
use adaptive_engine::engine::AdaptiveEngine;
use adaptive_engine::error::EngineError;
use adaptive_engine::features::FEATURE_DIM;
use adaptive_engine::types::{ColdStartPhase, ProcessOptions, RawEvent, TrendState};

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;

fn engine() -> AdaptiveEngine {
    AdaptiveEngine::with_seed(EngineConfig::default(), 17)
}

fn event(ts: i64, correct: bool, rt: i64) -> RawEvent {
    RawEvent {
        is_correct: correct,
        response_time_ms: rt,
        timestamp: ts,
        ..Default::default()
    }
}

#[test]
fn steady_learner_session_produces_consistent_results() {
    let mut engine = engine();

    for i in 0..60 {
        let result = engine
            .process_event(
                "learner",
                event(T0 + i * MINUTE, i % 5 != 0, 1800 + (i % 4) * 400),
                ProcessOptions {
                    recent_accuracy: Some(0.8),
                    study_duration_minutes: Some(i as f64),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(result.feature_vector.dim(), FEATURE_DIM);
        assert!((0.0..=1.0).contains(&result.state.attention));
        assert!((0.0..=1.0).contains(&result.state.fatigue));
        assert!((-1.0..=1.0).contains(&result.state.motivation));
        assert!((-1.0..=1.0).contains(&result.reward.value));
        assert!(result.action.batch_size >= 3);
        assert!(result.action.new_ratio >= 0.05);
        assert!((0..=2).contains(&result.action.hint_level));
    }

    assert_eq!(engine.user_count(), 1);
    // 60 events past the default cold-start budget: the bandits are live.
    assert_eq!(
        engine.cold_start_phase("learner"),
        Some(ColdStartPhase::Normal)
    );
}

#[test]
fn struggling_user_drifts_toward_easier_work() {
    let mut engine = engine();

    let mut last_action = None;
    for i in 0..80 {
        let result = engine
            .process_event(
                "struggler",
                RawEvent {
                    is_correct: i % 5 == 0,
                    response_time_ms: 12_000,
                    retry_count: 2,
                    timestamp: T0 + i * MINUTE,
                    ..Default::default()
                },
                ProcessOptions {
                    recent_accuracy: Some(0.2),
                    ..Default::default()
                },
            )
            .unwrap();
        last_action = Some(result.action);
    }

    let action = last_action.unwrap();
    // Sustained failure shows up as fatigue/low motivation; the guardrails
    // and policies should not be pushing hard work.
    assert_ne!(
        action.difficulty,
        adaptive_engine::types::DifficultyLevel::Hard
    );

    let state = engine.user_state("struggler").unwrap();
    assert!(state.motivation < 0.5);
    assert!(state.cognitive.mem < 0.5);
}

#[test]
fn distinct_users_evolve_independently() {
    let mut engine = engine();

    for i in 0..30 {
        engine
            .process_event("ace", event(T0 + i * MINUTE, true, 1200), ProcessOptions::default())
            .unwrap();
        engine
            .process_event(
                "novice",
                event(T0 + i * MINUTE, false, 9000),
                ProcessOptions::default(),
            )
            .unwrap();
    }

    let ace = engine.user_state("ace").unwrap();
    let novice = engine.user_state("novice").unwrap();
    assert!(ace.cognitive.mem > novice.cognitive.mem);
    assert!(ace.motivation > novice.motivation);
}

#[test]
fn trend_classifies_improving_user_as_up() {
    let config = EngineConfig::default();
    let mut engine = AdaptiveEngine::with_seed(config, 3);
    let day = 86_400_000i64;

    // Two events per day for 25 days, improving accuracy drives the
    // cognitive composite (and with it the sampled ability) upward.
    let mut last_trend = None;
    for d in 0..25 {
        for j in 0..2 {
            let correct = d > 2 || j == 0;
            let result = engine
                .process_event(
                    "improver",
                    event(T0 + d * day + j * MINUTE, correct, 1500),
                    ProcessOptions::default(),
                )
                .unwrap();
            if let Some(report) = result.trend {
                last_trend = Some(report);
            }
        }
    }

    let report = last_trend.expect("trend sampled on cadence");
    assert!((0.0..=1.0).contains(&report.confidence));
    assert!(report.sample_count >= 5);
    // Ability climbs steadily from ~0.5 cold start toward its ceiling, so
    // the trajectory must not read as declining.
    assert_ne!(report.state, TrendState::Down);
}

#[test]
fn duplicate_timestamp_is_tolerated_but_regression_is_not() {
    let mut engine = engine();
    engine
        .process_event("u", event(T0, true, 2000), ProcessOptions::default())
        .unwrap();

    // Same timestamp: allowed (monotonic, not strictly increasing).
    assert!(engine
        .process_event("u", event(T0, true, 2000), ProcessOptions::default())
        .is_ok());

    // Earlier timestamp: rejected before mutation.
    let err = engine
        .process_event("u", event(T0 - 1, true, 2000), ProcessOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[test]
fn invalid_event_rejected_without_side_effects() {
    let mut engine = engine();
    let bad = RawEvent {
        timestamp: 0,
        ..Default::default()
    };
    assert!(engine
        .process_event("u", bad, ProcessOptions::default())
        .is_err());
    assert_eq!(engine.user_count(), 0);
    assert_eq!(engine.aggregate_delayed_rewards(T0, None).pending_count, 0);
}

#[test]
fn snapshot_restore_preserves_decision_behavior() {
    let mut original = engine();
    for i in 0..40 {
        original
            .process_event("u", event(T0 + i * MINUTE, i % 3 != 0, 2000), ProcessOptions::default())
            .unwrap();
    }

    let snapshot = original.export_user("u").unwrap();
    let mut restored = AdaptiveEngine::with_seed(EngineConfig::default(), 17);
    restored.import_user(snapshot).unwrap();

    assert_eq!(
        original.user_state("u").unwrap().ts,
        restored.user_state("u").unwrap().ts
    );
    assert_eq!(
        original.current_action("u").unwrap(),
        restored.current_action("u").unwrap()
    );

    // Both copies keep accepting events.
    let next = event(T0 + 40 * MINUTE, true, 2000);
    assert!(original
        .process_event("u", next.clone(), ProcessOptions::default())
        .is_ok());
    assert!(restored
        .process_event("u", next, ProcessOptions::default())
        .is_ok());
}

#[test]
fn aggregator_snapshot_survives_engine_restart() {
    let mut engine = engine();
    engine
        .process_event("u", event(T0, true, 2000), ProcessOptions::default())
        .unwrap();
    let queue = engine.export_aggregator();

    let mut replacement = AdaptiveEngine::with_seed(EngineConfig::default(), 99);
    replacement.import_aggregator(queue);
    let outcome = replacement.aggregate_delayed_rewards(T0 + 7 * 86_400_000, None);
    assert_eq!(outcome.pending_count, 0);
    assert!(outcome.breakdown.contains_key("7d"));
}

#[test]
fn disabled_ensemble_keeps_current_action() {
    let mut config = EngineConfig::default();
    config.feature_flags.ensemble_enabled = false;
    config.feature_flags.cold_start_enabled = false;
    let mut engine = AdaptiveEngine::with_seed(config, 5);

    let first = engine
        .process_event("u", event(T0, true, 2000), ProcessOptions::default())
        .unwrap();
    let second = engine
        .process_event("u", event(T0 + MINUTE, false, 4000), ProcessOptions::default())
        .unwrap();
    assert_eq!(first.action, second.action);
    assert!(first.cold_start_phase.is_none());
}
