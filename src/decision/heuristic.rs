use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{check_dimension, check_reward, DecisionPolicy, PolicyChoice};
use crate::error::EngineResult;
use crate::features::{IDX_ATTENTION, IDX_FATIGUE, IDX_MEMORY, IDX_MOTIVATION};
use crate::types::{Action, DifficultyLevel, FeatureVector};

/// Rule-based fallback that reads the state components straight out of the
/// feature vector and votes for the candidate closest to what the rules
/// prescribe. Carries no learned parameters; `update` is a validated no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicPolicy {
    dim: usize,
    fatigue_threshold: f64,
    attention_threshold: f64,
    motivation_threshold: f64,
}

impl HeuristicPolicy {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            fatigue_threshold: 0.7,
            attention_threshold: 0.4,
            motivation_threshold: -0.3,
        }
    }

    fn preferred_action(&self, features: &FeatureVector) -> Action {
        let attention = features.values[IDX_ATTENTION];
        let fatigue = features.values[IDX_FATIGUE];
        let motivation = features.values[IDX_MOTIVATION];
        let memory = features.values[IDX_MEMORY];

        let strained = fatigue > self.fatigue_threshold || motivation < self.motivation_threshold;
        let thriving = motivation > 0.7 && fatigue < 0.3 && attention > 0.7;

        let difficulty = if strained {
            DifficultyLevel::Easy
        } else if thriving {
            DifficultyLevel::Hard
        } else {
            DifficultyLevel::Mid
        };

        let batch_size = if strained {
            5
        } else if thriving {
            12
        } else {
            8
        };

        let mut hint_level = 1;
        if attention < self.attention_threshold || memory < 0.4 {
            hint_level = 2;
        } else if thriving {
            hint_level = 0;
        }

        let new_ratio = if strained {
            0.1
        } else if thriving {
            0.3
        } else {
            0.2
        };

        // Strong memory affords tighter review spacing; weak memory needs
        // more room.
        let interval_scale = if memory > 0.8 {
            0.8
        } else if memory < 0.4 {
            1.2
        } else {
            1.0
        };

        Action {
            interval_scale,
            new_ratio,
            difficulty,
            batch_size,
            hint_level,
        }
    }

    pub fn confidence(&self, features: &FeatureVector) -> f64 {
        let fatigue_factor: f64 = if features.values[IDX_FATIGUE] > self.fatigue_threshold {
            0.8
        } else {
            1.0
        };
        let attention_factor: f64 = if features.values[IDX_ATTENTION] < self.attention_threshold {
            0.8
        } else {
            1.0
        };
        let motivation_factor: f64 = if features.values[IDX_MOTIVATION] < self.motivation_threshold
        {
            0.8
        } else {
            1.0
        };
        (fatigue_factor * attention_factor * motivation_factor).max(0.3)
    }

    fn distance(a: &Action, b: &Action) -> f64 {
        let difficulty = if a.difficulty == b.difficulty { 0.0 } else { 1.0 };
        let ratio = (a.new_ratio - b.new_ratio).abs();
        let batch = (a.batch_size - b.batch_size).abs() as f64 / 15.0;
        let hint = (a.hint_level - b.hint_level).abs() as f64 / 2.0;
        let interval = (a.interval_scale - b.interval_scale).abs();
        0.35 * difficulty + 0.2 * ratio + 0.2 * batch + 0.15 * hint + 0.1 * interval
    }
}

impl DecisionPolicy for HeuristicPolicy {
    fn select_action(
        &self,
        features: &FeatureVector,
        candidates: &[Action],
        _rng: &mut dyn RngCore,
    ) -> EngineResult<PolicyChoice> {
        check_dimension(self.dim, features)?;

        let preferred = self.preferred_action(features);
        let action = candidates
            .iter()
            .min_by(|a, b| {
                Self::distance(a, &preferred)
                    .partial_cmp(&Self::distance(b, &preferred))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
            .unwrap_or(preferred);

        Ok(PolicyChoice {
            action,
            confidence: self.confidence(features),
            source: "heuristic",
        })
    }

    fn update(
        &mut self,
        features: &FeatureVector,
        _action: &Action,
        reward: f64,
    ) -> EngineResult<()> {
        check_dimension(self.dim, features)?;
        check_reward(reward)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_DIM;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn fv_with_state(attention: f64, fatigue: f64, motivation: f64, memory: f64) -> FeatureVector {
        let mut values = vec![0.5; FEATURE_DIM];
        values[IDX_ATTENTION] = attention;
        values[IDX_FATIGUE] = fatigue;
        values[IDX_MOTIVATION] = motivation;
        values[IDX_MEMORY] = memory;
        FeatureVector::new(values, vec!["f".to_string(); FEATURE_DIM], 0)
    }

    #[test]
    fn fatigued_user_gets_easier_work() {
        let policy = HeuristicPolicy::new(FEATURE_DIM);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let candidates = super::super::candidate_actions(&Action::default());

        let choice = policy
            .select_action(&fv_with_state(0.5, 0.9, 0.0, 0.5), &candidates, &mut rng)
            .unwrap();
        assert_eq!(choice.action.difficulty, DifficultyLevel::Easy);
        assert!(choice.confidence < 1.0);
    }

    #[test]
    fn thriving_user_gets_harder_work() {
        let policy = HeuristicPolicy::new(FEATURE_DIM);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let candidates = super::super::candidate_actions(&Action::default());

        let choice = policy
            .select_action(&fv_with_state(0.9, 0.1, 0.9, 0.6), &candidates, &mut rng)
            .unwrap();
        assert_eq!(choice.action.difficulty, DifficultyLevel::Hard);
    }

    #[test]
    fn update_validates_but_keeps_no_state() {
        let mut policy = HeuristicPolicy::new(FEATURE_DIM);
        let features = fv_with_state(0.5, 0.5, 0.0, 0.5);
        assert!(policy.update(&features, &Action::default(), 0.5).is_ok());
        assert!(policy
            .update(&features, &Action::default(), f64::NAN)
            .is_err());
    }
}
