use std::collections::HashMap;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use super::{check_dimension, check_reward, DecisionPolicy, LinearArm, PolicyChoice};
use crate::config::BanditConfig;
use crate::error::EngineResult;
use crate::linalg;
use crate::types::{Action, FeatureVector};

/// Pull count at which confidence reaches the midpoint of its range.
const CONFIDENCE_HALF_LIFE: f64 = 20.0;

/// Thompson sampling over a Bayesian linear model per arm. The ridge
/// statistics `(A, b)` induce the posterior `N(A⁻¹b, σ²A⁻¹)`; each decision
/// draws one weight vector per arm and the highest sampled score wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThompsonPolicy {
    dim: usize,
    noise_variance: f64,
    min_confidence: f64,
    max_confidence: f64,
    arms: HashMap<String, LinearArm>,
}

impl ThompsonPolicy {
    pub fn new(config: &BanditConfig) -> Self {
        Self {
            dim: config.context_dim,
            noise_variance: config.noise_variance.max(1e-6),
            min_confidence: config.min_confidence,
            max_confidence: config.max_confidence,
            arms: HashMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn arm_count(&self) -> usize {
        self.arms.len()
    }

    /// Draws `θ̃ ~ N(θ, σ²A⁻¹)` and scores the context with it. With
    /// `A = L·Lᵀ`, a posterior draw is `θ + σ·L⁻ᵀz` for standard normal `z`.
    fn sample_score(&self, arm: Option<&LinearArm>, x: &[f64], rng: &mut dyn RngCore) -> f64 {
        let prior;
        let arm = match arm {
            Some(a) => a,
            None => {
                prior = LinearArm::new(self.dim);
                &prior
            }
        };

        let l = linalg::cholesky_decompose(&arm.a, self.dim);
        let theta = linalg::solve_cholesky(&l, &arm.b, self.dim);

        let z: Vec<f64> = (0..self.dim).map(|_| sample_standard_normal(rng)).collect();
        let perturbation = linalg::solve_triangular_upper_transpose(&l, &z, self.dim);

        let sigma = self.noise_variance.sqrt();
        let sampled: Vec<f64> = theta
            .iter()
            .zip(perturbation.iter())
            .map(|(t, p)| t + sigma * p)
            .collect();

        linalg::dot(&sampled, x)
    }

    fn arm_confidence(&self, pulls: u64) -> f64 {
        let saturation = pulls as f64 / (pulls as f64 + CONFIDENCE_HALF_LIFE);
        (self.min_confidence + (self.max_confidence - self.min_confidence) * saturation)
            .clamp(self.min_confidence, self.max_confidence)
    }
}

impl DecisionPolicy for ThompsonPolicy {
    fn select_action(
        &self,
        features: &FeatureVector,
        candidates: &[Action],
        rng: &mut dyn RngCore,
    ) -> EngineResult<PolicyChoice> {
        check_dimension(self.dim, features)?;

        let mut best: Option<(f64, u64, &Action)> = None;
        for candidate in candidates {
            let arm = self.arms.get(&candidate.arm_key());
            let score = self.sample_score(arm, &features.values, rng);
            let pulls = arm.map(|a| a.pulls).unwrap_or(0);
            if best.map_or(true, |(s, _, _)| score > s) {
                best = Some((score, pulls, candidate));
            }
        }

        let (_, pulls, action) = best.ok_or_else(|| {
            crate::error::EngineError::InvalidInput("no candidate actions".into())
        })?;

        Ok(PolicyChoice {
            action: action.clone(),
            confidence: self.arm_confidence(pulls),
            source: "thompson",
        })
    }

    fn update(
        &mut self,
        features: &FeatureVector,
        action: &Action,
        reward: f64,
    ) -> EngineResult<()> {
        check_dimension(self.dim, features)?;
        let reward = check_reward(reward)?;

        let arm = self
            .arms
            .entry(action.arm_key())
            .or_insert_with(|| LinearArm::new(self.dim));
        arm.observe(&features.values, reward);
        Ok(())
    }
}

/// Box–Muller transform.
fn sample_standard_normal(rng: &mut dyn RngCore) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-10);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::types::DifficultyLevel;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn config(dim: usize) -> BanditConfig {
        BanditConfig {
            context_dim: dim,
            ..Default::default()
        }
    }

    fn fv(values: Vec<f64>) -> FeatureVector {
        let labels = values.iter().map(|_| "f".to_string()).collect();
        FeatureVector::new(values, labels, 0)
    }

    fn two_candidates() -> Vec<Action> {
        vec![
            Action {
                difficulty: DifficultyLevel::Easy,
                ..Action::default()
            },
            Action {
                difficulty: DifficultyLevel::Hard,
                ..Action::default()
            },
        ]
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let policy = ThompsonPolicy::new(&config(5));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = policy
            .select_action(&fv(vec![0.5; 2]), &two_candidates(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }

    #[test]
    fn converges_to_better_arm() {
        let mut policy = ThompsonPolicy::new(&config(2));
        let context = fv(vec![1.0, 0.3]);
        let candidates = two_candidates();

        for _ in 0..200 {
            policy.update(&context, &candidates[1], 0.9).unwrap();
            policy.update(&context, &candidates[0], -0.9).unwrap();
        }

        // With a concentrated posterior, the rewarded arm should dominate.
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut hard_picks = 0;
        for _ in 0..100 {
            let choice = policy
                .select_action(&context, &candidates, &mut rng)
                .unwrap();
            if choice.action.difficulty == DifficultyLevel::Hard {
                hard_picks += 1;
            }
        }
        assert!(hard_picks > 80, "picked hard {hard_picks}/100 times");
    }

    #[test]
    fn seeded_replay_is_deterministic() {
        let policy = ThompsonPolicy::new(&config(2));
        let context = fv(vec![0.5, 0.5]);
        let candidates = two_candidates();

        let mut rng_a = ChaCha8Rng::seed_from_u64(9);
        let mut rng_b = ChaCha8Rng::seed_from_u64(9);
        for _ in 0..20 {
            let a = policy
                .select_action(&context, &candidates, &mut rng_a)
                .unwrap();
            let b = policy
                .select_action(&context, &candidates, &mut rng_b)
                .unwrap();
            assert_eq!(a.action, b.action);
        }
    }

    #[test]
    fn confidence_grows_with_pulls() {
        let mut policy = ThompsonPolicy::new(&config(2));
        let context = fv(vec![0.5, 0.5]);
        let action = two_candidates()[0].clone();

        let cold = policy.arm_confidence(0);
        for _ in 0..100 {
            policy.update(&context, &action, 0.5).unwrap();
        }
        let warm = policy.arm_confidence(
            policy
                .arms
                .get(&action.arm_key())
                .map(|a| a.pulls)
                .unwrap_or(0),
        );
        assert!(warm > cold);
    }

    #[test]
    fn normal_sampler_is_roughly_centered() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let n = 10_000;
        let mean: f64 =
            (0..n).map(|_| sample_standard_normal(&mut rng)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05);
    }
}
