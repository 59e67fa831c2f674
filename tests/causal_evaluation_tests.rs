//! Offline causal evaluation driven end to end: ingest logged decisions,
//! fit, estimate, and compare — the certification path a policy rollout
//! would take before promotion.

use adaptive_engine::causal::{compute_ipw_weight, CausalEvaluator};
use adaptive_engine::config::CausalConfig;
use adaptive_engine::error::EngineError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Confounded logging policy with a known +0.4 treatment effect: stronger
/// learners are both more likely to get the candidate strategy and more
/// likely to do well regardless, which a naive difference in means
/// overstates.
fn confounded_rows(n: usize, seed: u64) -> Vec<(Vec<f64>, u8, f64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let skill: f64 = rng.gen_range(-1.0..1.0);
            let fatigue: f64 = rng.gen_range(0.0..1.0);
            let propensity = 1.0 / (1.0 + (-(1.5 * skill - 0.5 * fatigue)).exp());
            let treatment = u8::from(rng.gen::<f64>() < propensity);
            let noise: f64 = rng.gen_range(-0.05..0.05);
            let outcome = 0.3 * skill - 0.2 * fatigue
                + if treatment == 1 { 0.4 } else { 0.0 }
                + noise;
            (vec![skill, fatigue], treatment, outcome.clamp(-1.0, 1.0))
        })
        .collect()
}

fn fitted(n: usize, seed: u64) -> CausalEvaluator {
    let mut evaluator = CausalEvaluator::default();
    for (i, (features, treatment, outcome)) in confounded_rows(n, seed).into_iter().enumerate() {
        evaluator
            .add_observation(features, treatment, outcome, i as i64 + 1)
            .unwrap();
    }
    evaluator.fit().unwrap();
    evaluator
}

#[test]
fn ate_corrects_confounded_assignment() {
    let evaluator = fitted(600, 42);
    let estimate = evaluator.estimate_ate().unwrap();

    // The naive difference in means is inflated well above the true 0.4 by
    // the skill confounder; the IPW estimate should land closer.
    let rows = confounded_rows(600, 42);
    let treated: Vec<f64> = rows
        .iter()
        .filter(|(_, t, _)| *t == 1)
        .map(|(_, _, y)| *y)
        .collect();
    let control: Vec<f64> = rows
        .iter()
        .filter(|(_, t, _)| *t == 0)
        .map(|(_, _, y)| *y)
        .collect();
    let naive = treated.iter().sum::<f64>() / treated.len() as f64
        - control.iter().sum::<f64>() / control.len() as f64;

    assert!((estimate.ate - 0.4).abs() < (naive - 0.4).abs());
    assert!(estimate.significant);
}

#[test]
fn every_successful_ate_straddles_its_interval() {
    for seed in [1, 2, 3, 4, 5] {
        let evaluator = fitted(150, seed);
        let estimate = evaluator.estimate_ate().unwrap();
        assert!(
            estimate.confidence_interval.0 < estimate.ate
                && estimate.ate < estimate.confidence_interval.1,
            "interval {:?} does not straddle {}",
            estimate.confidence_interval,
            estimate.ate
        );
        assert!((0.0..=1.0).contains(&estimate.p_value));
    }
}

#[test]
fn ipw_weight_reference_values() {
    assert!((compute_ipw_weight(1, 0.5, 0.05, 0.95) - 2.0).abs() < 1e-12);
    assert!((compute_ipw_weight(0, 0.5, 0.05, 0.95) - 2.0).abs() < 1e-12);
    assert!((compute_ipw_weight(1, 0.01, 0.05, 0.95) - 20.0).abs() < 1e-12);
}

#[test]
fn insufficient_data_is_retryable_and_non_destructive() {
    let mut evaluator = CausalEvaluator::default();
    for i in 0..9 {
        evaluator
            .add_observation(vec![0.5, 0.5], (i % 2) as u8, 0.2, i + 1)
            .unwrap();
    }

    let err = evaluator.fit().unwrap_err();
    assert!(err.is_retryable());
    assert!(!evaluator.is_fitted());

    // More data arrives; the same evaluator now fits.
    for (i, (features, treatment, outcome)) in
        confounded_rows(100, 9).into_iter().enumerate()
    {
        evaluator
            .add_observation(features, treatment, outcome, 100 + i as i64)
            .unwrap();
    }
    evaluator.fit().unwrap();
    assert!(evaluator.is_fitted());
}

#[test]
fn single_arm_dataset_cannot_fit() {
    let mut evaluator = CausalEvaluator::default();
    for i in 0..20 {
        evaluator
            .add_observation(vec![0.1, 0.9], 1, 0.5, i + 1)
            .unwrap();
    }
    let err = evaluator.fit().unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData { .. }));
}

#[test]
fn dimension_mismatch_rejected_at_ingestion() {
    let mut evaluator = CausalEvaluator::default();
    evaluator
        .add_observation(vec![0.1, 0.2, 0.3], 1, 0.5, 1)
        .unwrap();
    let err = evaluator
        .add_observation(vec![0.1, 0.2], 0, 0.5, 2)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    );
    assert_eq!(evaluator.len(), 1);
}

#[test]
fn diagnostics_reveal_confounding_without_refusing() {
    let evaluator = fitted(400, 7);
    let diag = evaluator.diagnose_propensity().unwrap();

    // Assignment is driven by skill, so the propensity model separates the
    // arms better than chance.
    assert!(diag.auc > 0.55);
    assert!(diag.treatment_mean > diag.control_mean);
    // But support still overlaps; the report says so instead of erroring.
    assert!(diag.overlap > 0.1);
}

#[test]
fn compare_strategies_matches_ate_contract() {
    let evaluator = CausalEvaluator::default();

    let candidate: Vec<f64> = (0..40).map(|i| 0.5 + 0.01 * (i % 5) as f64).collect();
    let baseline: Vec<f64> = (0..40).map(|i| 0.1 + 0.01 * (i % 5) as f64).collect();

    let comparison = evaluator.compare_strategies(&candidate, &baseline).unwrap();
    assert!((comparison.difference - 0.4).abs() < 1e-9);
    assert!(comparison.significant);
    assert!(comparison.confidence_interval.0 < comparison.difference);
    assert!(comparison.difference < comparison.confidence_interval.1);

    // Identical groups: no significant difference.
    let flat = evaluator.compare_strategies(&candidate, &candidate).unwrap();
    assert!(!flat.significant);
}

#[test]
fn cate_varies_with_the_feature_point() {
    let evaluator = fitted(500, 21);
    let strong = evaluator.estimate_cate(&[0.8, 0.1]).unwrap();
    let weak = evaluator.estimate_cate(&[-0.8, 0.9]).unwrap();

    assert!(strong.cate.is_finite() && weak.cate.is_finite());
    assert!(strong.standard_error > 0.0);
    assert!(strong.confidence_interval.0 < strong.cate);
    assert!(strong.cate < strong.confidence_interval.1);

    // The further the query point sits from the data, the wider the
    // interval.
    let remote = evaluator.estimate_cate(&[10.0, -10.0]).unwrap();
    assert!(remote.standard_error > strong.standard_error);
}

#[test]
fn custom_clip_band_bounds_the_weights() {
    let config = CausalConfig {
        propensity_min: 0.2,
        propensity_max: 0.8,
        ..Default::default()
    };
    let mut evaluator = CausalEvaluator::new(config);
    for (i, (features, treatment, outcome)) in
        confounded_rows(200, 13).into_iter().enumerate()
    {
        evaluator
            .add_observation(features, treatment, outcome, i as i64 + 1)
            .unwrap();
    }
    evaluator.fit().unwrap();

    for (features, _, _) in confounded_rows(50, 14) {
        let score = evaluator.propensity_score(&features).unwrap();
        assert!((0.2..=0.8).contains(&score));
    }
}
