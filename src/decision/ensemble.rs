use std::collections::HashMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{DecisionPolicy, HeuristicPolicy, LinUcbPolicy, PolicyChoice, ThompsonPolicy};
use crate::config::{BanditConfig, EnsembleWeights, FeatureFlags};
use crate::error::{EngineError, EngineResult};
use crate::types::{Action, DifficultyLevel, FeatureVector, UserState};

/// One member's vote in a blended decision.
#[derive(Debug, Clone)]
pub struct DecisionCandidate {
    pub source: String,
    pub action: Action,
    pub confidence: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmPerformance {
    pub ema_reward: f64,
    pub sample_count: u64,
    pub trust_score: f64,
}

/// Session-level context for the post-selection guardrails.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub total_sessions: u32,
    pub duration_minutes: f64,
}

/// Attributes observed reward back to the members whose votes resembled the
/// final action and converts the running scores into trust weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceTracker {
    pub algorithms: HashMap<String, AlgorithmPerformance>,
    ema_alpha: f64,
    min_samples: u64,
    min_weight: f64,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self {
            algorithms: HashMap::new(),
            ema_alpha: 0.1,
            min_samples: 20,
            min_weight: 0.15,
        }
    }
}

impl PerformanceTracker {
    pub fn update(
        &mut self,
        candidates: &[DecisionCandidate],
        final_action: &Action,
        actual_reward: f64,
    ) {
        let total: u64 = self.algorithms.values().map(|p| p.sample_count).sum();
        if total < self.min_samples {
            for c in candidates {
                self.algorithms
                    .entry(c.source.clone())
                    .or_default()
                    .sample_count += 1;
            }
            return;
        }

        for c in candidates {
            let similarity = action_similarity(&c.action, final_action);
            let attributed = actual_reward * similarity;
            let perf = self.algorithms.entry(c.source.clone()).or_default();
            perf.sample_count += 1;
            perf.ema_reward = (1.0 - self.ema_alpha) * perf.ema_reward + self.ema_alpha * attributed;
        }
        self.update_trust_scores();
    }

    fn update_trust_scores(&mut self) {
        let rewards: Vec<f64> = self.algorithms.values().map(|p| p.ema_reward).collect();
        if rewards.is_empty() {
            return;
        }
        let max_reward = rewards.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_reward = rewards.iter().cloned().fold(f64::INFINITY, f64::min);
        let range = (max_reward - min_reward).max(1e-6);

        for perf in self.algorithms.values_mut() {
            perf.trust_score = ((perf.ema_reward - min_reward) / range).clamp(0.2, 1.0);
        }
    }

    /// Blend of configured base weights and earned trust, normalized to 1.
    /// Trust only starts counting once enough samples have accumulated.
    pub fn get_weights(&self, base: &[(&str, f64)]) -> HashMap<String, f64> {
        let total: u64 = self.algorithms.values().map(|p| p.sample_count).sum();
        let blend = if total < self.min_samples {
            0.0
        } else {
            ((total - self.min_samples) as f64 / 100.0).min(0.5)
        };

        let mut result = HashMap::new();
        for (src, base_w) in base {
            let trust = self
                .algorithms
                .get(*src)
                .map(|p| p.trust_score)
                .unwrap_or(0.33);
            let w = ((1.0 - blend) * base_w + blend * trust).max(self.min_weight);
            result.insert(src.to_string(), w);
        }
        normalize(&mut result);
        result
    }
}

fn action_similarity(a: &Action, b: &Action) -> f64 {
    let difficulty = if a.difficulty == b.difficulty { 1.0 } else { 0.0 };
    let ratio = 1.0 - (a.new_ratio - b.new_ratio).abs();
    let batch = 1.0 - ((a.batch_size - b.batch_size).abs() as f64 / 15.0);
    let interval = 1.0 - (a.interval_scale - b.interval_scale).abs();
    (0.3 * difficulty + 0.25 * ratio + 0.25 * batch + 0.2 * interval).clamp(0.0, 1.0)
}

fn normalize(weights: &mut HashMap<String, f64>) {
    let total: f64 = weights.values().sum();
    if total > 1e-6 {
        for v in weights.values_mut() {
            *v /= total;
        }
    }
}

/// Blends the bandit members and the heuristic rule layer into one action.
/// Composes the other policies rather than replacing them: each member keeps
/// its own parameters and the blend weights adapt to attributed reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsemblePolicy {
    flags: FeatureFlags,
    base_weights: EnsembleWeights,
    linucb: LinUcbPolicy,
    thompson: ThompsonPolicy,
    heuristic: HeuristicPolicy,
    pub performance: PerformanceTracker,
}

impl EnsemblePolicy {
    pub fn new(flags: FeatureFlags, weights: EnsembleWeights, bandit: &BanditConfig) -> Self {
        Self {
            flags,
            base_weights: weights,
            linucb: LinUcbPolicy::new(bandit),
            thompson: ThompsonPolicy::new(bandit),
            heuristic: HeuristicPolicy::new(bandit.context_dim),
            performance: PerformanceTracker::default(),
        }
    }

    pub fn set_feature_flags(&mut self, flags: FeatureFlags) {
        self.flags = flags;
    }

    /// Full decision: the blended action plus the member votes, which the
    /// caller feeds back into [`Self::update_performance`] once the reward
    /// is known.
    pub fn select_with_candidates(
        &self,
        features: &FeatureVector,
        candidates: &[Action],
        current: &Action,
        rng: &mut dyn RngCore,
    ) -> EngineResult<(Action, Vec<DecisionCandidate>)> {
        let dynamic_weights = self.performance.get_weights(&[
            ("linucb", self.base_weights.linucb),
            ("thompson", self.base_weights.thompson),
            ("heuristic", self.base_weights.heuristic),
        ]);

        let mut votes: Vec<DecisionCandidate> = Vec::new();
        let mut push_vote = |choice: PolicyChoice, weight: f64| {
            votes.push(DecisionCandidate {
                source: choice.source.to_string(),
                action: choice.action,
                confidence: choice.confidence,
                weight,
            });
        };

        if self.flags.linucb_enabled {
            let choice = self.linucb.select_action(features, candidates, rng)?;
            push_vote(
                choice,
                *dynamic_weights
                    .get("linucb")
                    .unwrap_or(&self.base_weights.linucb),
            );
        }
        if self.flags.thompson_enabled {
            let choice = self.thompson.select_action(features, candidates, rng)?;
            push_vote(
                choice,
                *dynamic_weights
                    .get("thompson")
                    .unwrap_or(&self.base_weights.thompson),
            );
        }
        if self.flags.heuristic_enabled {
            let choice = self.heuristic.select_action(features, candidates, rng)?;
            push_vote(
                choice,
                *dynamic_weights
                    .get("heuristic")
                    .unwrap_or(&self.base_weights.heuristic),
            );
        }

        if votes.is_empty() {
            return Ok((current.clone(), vec![]));
        }

        let merged = weighted_merge(&votes);
        Ok((merged, votes))
    }

    pub fn update_performance(
        &mut self,
        candidates: &[DecisionCandidate],
        final_action: &Action,
        reward: f64,
    ) {
        self.performance.update(candidates, final_action, reward);
    }

    /// Hard guardrails applied after the blend: deep fatigue and scattered
    /// attention override whatever the bandits wanted, and brand-new users
    /// are kept on gentle settings.
    pub fn post_filter(
        &self,
        mut action: Action,
        state: &UserState,
        session: Option<&SessionInfo>,
    ) -> Action {
        let fatigue = state.fatigue;

        let (min_batch, max_batch) = if fatigue > 0.9 {
            (3, 5)
        } else if fatigue > 0.75 {
            (3, 8)
        } else {
            (3, 20)
        };
        let max_ratio = if fatigue > 0.75 { 0.2 } else { 0.5 };

        if fatigue > 0.9 {
            action.difficulty = DifficultyLevel::Easy;
            action.hint_level = action.hint_level.max(2);
        } else if fatigue > 0.75 && action.difficulty == DifficultyLevel::Hard {
            action.difficulty = DifficultyLevel::Mid;
        }

        if state.attention < 0.3 {
            action.hint_level = action.hint_level.max(1);
        }

        if let Some(s) = session {
            if s.total_sessions < 5 {
                action.difficulty = DifficultyLevel::Easy;
                action.hint_level = action.hint_level.max(1);
            }
            if s.duration_minutes > 45.0 {
                action.new_ratio = action.new_ratio.min(0.15);
            }
        }

        action.batch_size = snap_to_grid(action.batch_size, &[5, 8, 12, 16], min_batch, max_batch);
        action.new_ratio = snap_new_ratio(action.new_ratio.clamp(0.05, max_ratio));
        action
    }
}

impl DecisionPolicy for EnsemblePolicy {
    fn select_action(
        &self,
        features: &FeatureVector,
        candidates: &[Action],
        rng: &mut dyn RngCore,
    ) -> EngineResult<PolicyChoice> {
        let current = candidates
            .first()
            .cloned()
            .ok_or_else(|| EngineError::InvalidInput("no candidate actions".into()))?;
        let (action, votes) = self.select_with_candidates(features, candidates, &current, rng)?;

        let confidence = if votes.is_empty() {
            0.5
        } else {
            let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
            votes
                .iter()
                .map(|v| v.weight * v.confidence)
                .sum::<f64>()
                / total_weight.max(1e-6)
        };

        Ok(PolicyChoice {
            action,
            confidence,
            source: "ensemble",
        })
    }

    fn update(
        &mut self,
        features: &FeatureVector,
        action: &Action,
        reward: f64,
    ) -> EngineResult<()> {
        self.linucb.update(features, action, reward)?;
        self.thompson.update(features, action, reward)?;
        self.heuristic.update(features, action, reward)?;
        Ok(())
    }
}

fn weighted_merge(votes: &[DecisionCandidate]) -> Action {
    let total_weight: f64 = votes.iter().map(|v| v.weight * v.confidence).sum();
    if total_weight < 1e-6 {
        return votes[0].action.clone();
    }

    let mut interval_scale = 0.0;
    let mut new_ratio = 0.0;
    let mut batch_size = 0.0;
    let mut hint_level = 0.0;
    let mut difficulty_scores = [0.0f64; 3];

    for vote in votes {
        let w = vote.weight * vote.confidence / total_weight;
        interval_scale += w * vote.action.interval_scale;
        new_ratio += w * vote.action.new_ratio;
        batch_size += w * vote.action.batch_size as f64;
        hint_level += w * vote.action.hint_level as f64;

        match vote.action.difficulty {
            DifficultyLevel::Easy => difficulty_scores[0] += w,
            DifficultyLevel::Mid => difficulty_scores[1] += w,
            DifficultyLevel::Hard => difficulty_scores[2] += w,
        }
    }

    let difficulty =
        if difficulty_scores[2] > difficulty_scores[1] && difficulty_scores[2] > difficulty_scores[0]
        {
            DifficultyLevel::Hard
        } else if difficulty_scores[0] > difficulty_scores[1] {
            DifficultyLevel::Easy
        } else {
            DifficultyLevel::Mid
        };

    Action {
        interval_scale: snap_interval_scale(interval_scale),
        new_ratio: snap_new_ratio(new_ratio),
        difficulty,
        batch_size: snap_batch_size(batch_size),
        hint_level: hint_level.round() as i32,
    }
}

fn snap_interval_scale(value: f64) -> f64 {
    snap_f64(value, &[0.5, 0.8, 1.0, 1.2, 1.5], 1.0)
}

fn snap_new_ratio(value: f64) -> f64 {
    snap_f64(value, &[0.1, 0.2, 0.3, 0.4], 0.2)
}

fn snap_f64(value: f64, options: &[f64], fallback: f64) -> f64 {
    *options
        .iter()
        .min_by(|a, b| {
            ((*a) - value)
                .abs()
                .partial_cmp(&((*b) - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(&fallback)
}

fn snap_batch_size(value: f64) -> i32 {
    *[5, 8, 12, 16]
        .iter()
        .min_by(|a, b| {
            ((**a as f64) - value)
                .abs()
                .partial_cmp(&((**b as f64) - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(&8)
}

fn snap_to_grid(value: i32, grid: &[i32], min: i32, max: i32) -> i32 {
    let valid: Vec<i32> = grid
        .iter()
        .filter(|&&v| v >= min && v <= max)
        .copied()
        .collect();
    if valid.is_empty() {
        return min;
    }
    *valid.iter().min_by_key(|&&v| (v - value).abs()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_DIM;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn policy() -> EnsemblePolicy {
        EnsemblePolicy::new(
            FeatureFlags::default(),
            EnsembleWeights::default(),
            &BanditConfig::default(),
        )
    }

    fn fv() -> FeatureVector {
        FeatureVector::new(vec![0.5; FEATURE_DIM], vec!["f".to_string(); FEATURE_DIM], 0)
    }

    #[test]
    fn decision_includes_all_enabled_members() {
        let policy = policy();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let candidates = super::super::candidate_actions(&Action::default());
        let (_, votes) = policy
            .select_with_candidates(&fv(), &candidates, &Action::default(), &mut rng)
            .unwrap();
        let sources: Vec<&str> = votes.iter().map(|v| v.source.as_str()).collect();
        assert!(sources.contains(&"linucb"));
        assert!(sources.contains(&"thompson"));
        assert!(sources.contains(&"heuristic"));
    }

    #[test]
    fn disabled_members_fall_back_to_current() {
        let mut policy = policy();
        policy.set_feature_flags(FeatureFlags {
            linucb_enabled: false,
            thompson_enabled: false,
            heuristic_enabled: false,
            ..Default::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let current = Action {
            batch_size: 12,
            ..Action::default()
        };
        let candidates = super::super::candidate_actions(&current);
        let (action, votes) = policy
            .select_with_candidates(&fv(), &candidates, &current, &mut rng)
            .unwrap();
        assert!(votes.is_empty());
        assert_eq!(action, current);
    }

    #[test]
    fn merged_action_lands_on_snap_grid() {
        let policy = policy();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let candidates = super::super::candidate_actions(&Action::default());
        let (action, _) = policy
            .select_with_candidates(&fv(), &candidates, &Action::default(), &mut rng)
            .unwrap();
        assert!([5, 8, 12, 16].contains(&action.batch_size));
        assert!([0.1, 0.2, 0.3, 0.4].iter().any(|&r| (r - action.new_ratio).abs() < 1e-9));
        assert!([0.5, 0.8, 1.0, 1.2, 1.5]
            .iter()
            .any(|&s| (s - action.interval_scale).abs() < 1e-9));
    }

    #[test]
    fn post_filter_guards_deep_fatigue() {
        let policy = policy();
        let mut state = UserState::default();
        state.fatigue = 0.95;
        let filtered = policy.post_filter(
            Action {
                difficulty: DifficultyLevel::Hard,
                batch_size: 16,
                hint_level: 0,
                ..Action::default()
            },
            &state,
            None,
        );
        assert_eq!(filtered.difficulty, DifficultyLevel::Easy);
        assert!(filtered.batch_size <= 5);
        assert_eq!(filtered.hint_level, 2);
    }

    #[test]
    fn post_filter_eases_in_new_users() {
        let policy = policy();
        let state = UserState::default();
        let filtered = policy.post_filter(
            Action {
                difficulty: DifficultyLevel::Hard,
                ..Action::default()
            },
            &state,
            Some(&SessionInfo {
                total_sessions: 1,
                duration_minutes: 5.0,
            }),
        );
        assert_eq!(filtered.difficulty, DifficultyLevel::Easy);
        assert!(filtered.hint_level >= 1);
    }

    #[test]
    fn performance_weights_stay_normalized() {
        let mut tracker = PerformanceTracker::default();
        let candidates = vec![
            DecisionCandidate {
                source: "linucb".to_string(),
                action: Action::default(),
                confidence: 0.8,
                weight: 0.4,
            },
            DecisionCandidate {
                source: "thompson".to_string(),
                action: Action {
                    difficulty: DifficultyLevel::Hard,
                    ..Action::default()
                },
                confidence: 0.6,
                weight: 0.4,
            },
        ];

        for _ in 0..60 {
            tracker.update(&candidates, &Action::default(), 0.8);
        }

        let weights = tracker.get_weights(&[("linucb", 0.4), ("thompson", 0.4), ("heuristic", 0.2)]);
        let total: f64 = weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        // The member whose votes matched the final action earns more trust.
        assert!(weights["linucb"] > weights["thompson"]);
    }

    #[test]
    fn similarity_is_bounded() {
        let a = Action::default();
        let b = Action {
            difficulty: DifficultyLevel::Hard,
            new_ratio: 0.4,
            batch_size: 16,
            interval_scale: 1.5,
            hint_level: 0,
        };
        let s = action_similarity(&a, &b);
        assert!((0.0..=1.0).contains(&s));
        assert!((action_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }
}
