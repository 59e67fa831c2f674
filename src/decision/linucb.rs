use std::collections::HashMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{check_dimension, check_reward, DecisionPolicy, LinearArm, PolicyChoice};
use crate::config::BanditConfig;
use crate::error::EngineResult;
use crate::linalg;
use crate::types::{Action, FeatureVector};

/// Per-arm ridge-regression bandit. Each candidate action owns an
/// independent linear model over the context features; the arm maximizing
/// `θᵀx + α·√(xᵀA⁻¹x)` wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinUcbPolicy {
    dim: usize,
    alpha: f64,
    exploration_scale: f64,
    min_confidence: f64,
    max_confidence: f64,
    arms: HashMap<String, LinearArm>,
}

impl LinUcbPolicy {
    pub fn new(config: &BanditConfig) -> Self {
        Self {
            dim: config.context_dim,
            alpha: config.alpha,
            exploration_scale: config.exploration_scale,
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

    /// UCB score and exploration width for one arm at context `x`.
    fn score_arm(&self, arm: Option<&LinearArm>, x: &[f64]) -> (f64, f64) {
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
        let exploitation = linalg::dot(&theta, x);
        let exploration = linalg::quadratic_form(&l, x, self.dim).max(0.0).sqrt();
        (exploitation + self.alpha * exploration, exploration)
    }
}

impl DecisionPolicy for LinUcbPolicy {
    fn select_action(
        &self,
        features: &FeatureVector,
        candidates: &[Action],
        _rng: &mut dyn RngCore,
    ) -> EngineResult<PolicyChoice> {
        check_dimension(self.dim, features)?;

        let mut best: Option<(f64, f64, &Action)> = None;
        for candidate in candidates {
            let arm = self.arms.get(&candidate.arm_key());
            let (score, exploration) = self.score_arm(arm, &features.values);
            if best.map_or(true, |(s, _, _)| score > s) {
                best = Some((score, exploration, candidate));
            }
        }

        let (_, exploration, action) = best.ok_or_else(|| {
            crate::error::EngineError::InvalidInput("no candidate actions".into())
        })?;

        // Narrow confidence bounds read as high decision confidence.
        let confidence = (self.max_confidence - self.exploration_scale * exploration)
            .clamp(self.min_confidence, self.max_confidence);

        Ok(PolicyChoice {
            action: action.clone(),
            confidence,
            source: "linucb",
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
