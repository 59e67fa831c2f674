pub mod coldstart;
pub mod ensemble;
pub mod heuristic;
pub mod linucb;
pub mod thompson;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::linalg;
use crate::types::{Action, DifficultyLevel, FeatureVector};

pub use coldstart::{ColdStartManager, PopulationPriors};
pub use ensemble::EnsemblePolicy;
pub use heuristic::HeuristicPolicy;
pub use linucb::LinUcbPolicy;
pub use thompson::ThompsonPolicy;

/// A policy's pick plus how sure it is about it.
#[derive(Debug, Clone)]
pub struct PolicyChoice {
    pub action: Action,
    pub confidence: f64,
    pub source: &'static str,
}

/// The bandit capability set. `select_action` is a pure read of the current
/// parameters (randomness comes in through the caller-owned `rng`), so
/// logged decisions replay deterministically; only `update` mutates.
pub trait DecisionPolicy {
    fn select_action(
        &self,
        features: &FeatureVector,
        candidates: &[Action],
        rng: &mut dyn RngCore,
    ) -> EngineResult<PolicyChoice>;

    fn update(&mut self, features: &FeatureVector, action: &Action, reward: f64)
        -> EngineResult<()>;
}

/// Shared per-arm Bayesian linear model: `A = I + Σ x·xᵀ`, `b = Σ r·x`.
/// LinUCB reads the ridge point estimate plus an uncertainty bound from it,
/// Thompson samples the posterior it induces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearArm {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub pulls: u64,
}

impl LinearArm {
    pub fn new(dim: usize) -> Self {
        Self {
            a: linalg::identity(dim),
            b: vec![0.0; dim],
            pulls: 0,
        }
    }

    pub fn theta(&self, dim: usize) -> Vec<f64> {
        let l = linalg::cholesky_decompose(&self.a, dim);
        linalg::solve_cholesky(&l, &self.b, dim)
    }

    pub fn observe(&mut self, x: &[f64], reward: f64) {
        let dim = x.len();
        linalg::rank1_update(&mut self.a, x, dim);
        linalg::vec_add_scaled(&mut self.b, x, reward);
        self.pulls += 1;
    }
}

pub(crate) fn check_dimension(expected: usize, features: &FeatureVector) -> EngineResult<()> {
    if features.dim() == 0 {
        return Err(EngineError::EmptyFeatures);
    }
    if features.dim() != expected {
        return Err(EngineError::DimensionMismatch {
            expected,
            actual: features.dim(),
        });
    }
    Ok(())
}

pub(crate) fn check_reward(reward: f64) -> EngineResult<f64> {
    if !reward.is_finite() {
        return Err(EngineError::InvalidInput(format!(
            "reward must be finite, got {reward}"
        )));
    }
    Ok(reward.clamp(-1.0, 1.0))
}

/// The candidate grid the policies score: variations of the current action
/// along one dimension at a time, so a single decision can move difficulty,
/// mix, batch size, or hinting without jumping across the whole space.
pub fn candidate_actions(current: &Action) -> Vec<Action> {
    let difficulties = [
        DifficultyLevel::Easy,
        DifficultyLevel::Mid,
        DifficultyLevel::Hard,
    ];
    let new_ratios = [0.1, 0.2, 0.3, 0.4];
    let batch_sizes = [5, 8, 12, 16];
    let hint_levels = [0, 1, 2];
    let interval_scales = [0.8, 1.0, 1.2];

    let mut candidates = Vec::with_capacity(
        difficulties.len() * new_ratios.len()
            + batch_sizes.len()
            + hint_levels.len()
            + interval_scales.len(),
    );

    for &difficulty in &difficulties {
        for &new_ratio in &new_ratios {
            candidates.push(Action {
                difficulty,
                new_ratio,
                ..current.clone()
            });
        }
    }
    for &batch_size in &batch_sizes {
        candidates.push(Action {
            batch_size,
            ..current.clone()
        });
    }
    for &hint_level in &hint_levels {
        candidates.push(Action {
            hint_level,
            ..current.clone()
        });
    }
    for &interval_scale in &interval_scales {
        candidates.push(Action {
            interval_scale,
            ..current.clone()
        });
    }

    candidates
}
