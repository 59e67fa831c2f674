use serde::{Deserialize, Serialize};

use crate::config::ColdStartConfig;
use crate::types::{Action, ColdStartPhase, DifficultyLevel, UserArchetype};

/// Population-level priors backing the cold-start phase. Read-mostly: the
/// online loop only reads these; [`PopulationPriors::absorb_batch`] is the
/// single explicit write path and is expected to run as a separately
/// synchronized batch step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationPriors {
    /// Response times under this read as a fast learner.
    pub fast_rt_ms: f64,
    /// Response times over this read as a cautious learner.
    pub slow_rt_ms: f64,
    pub high_accuracy: f64,
    pub low_accuracy: f64,
    pub sample_count: u64,
}

impl Default for PopulationPriors {
    fn default() -> Self {
        Self {
            fast_rt_ms: 2000.0,
            slow_rt_ms: 4000.0,
            high_accuracy: 0.8,
            low_accuracy: 0.6,
            sample_count: 0,
        }
    }
}

impl PopulationPriors {
    pub fn action_for(&self, archetype: UserArchetype) -> Action {
        Action::for_archetype(archetype)
    }

    /// Folds a cohort aggregate into the thresholds. Deliberately coarse:
    /// the classification boundaries drift toward the population median
    /// rather than tracking it exactly.
    pub fn absorb_batch(&mut self, mean_rt_ms: f64, mean_accuracy: f64, samples: u64) {
        if samples == 0 || !mean_rt_ms.is_finite() || !mean_accuracy.is_finite() {
            return;
        }
        let alpha = 0.2;
        self.fast_rt_ms = (1.0 - alpha) * self.fast_rt_ms + alpha * (mean_rt_ms * 0.66);
        self.slow_rt_ms = (1.0 - alpha) * self.slow_rt_ms + alpha * (mean_rt_ms * 1.33);
        self.high_accuracy =
            ((1.0 - alpha) * self.high_accuracy + alpha * (mean_accuracy + 0.1)).clamp(0.5, 0.95);
        self.low_accuracy =
            ((1.0 - alpha) * self.low_accuracy + alpha * (mean_accuracy - 0.1)).clamp(0.2, 0.7);
        self.sample_count += samples;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ColdStartState {
    pub phase: ColdStartPhase,
    pub archetype: Option<UserArchetype>,
    pub probe_index: i32,
    pub update_count: i32,
    #[serde(default)]
    pub classification_scores: [f64; 3],
    pub settled_action: Option<Action>,
}

/// Drives the first interactions of a new user: classify them against the
/// population archetypes, probe with a short exploration sequence, then hand
/// control to the bandits.
pub struct ColdStartManager {
    config: ColdStartConfig,
    state: ColdStartState,
}

impl ColdStartManager {
    pub fn new(config: ColdStartConfig) -> Self {
        Self {
            config,
            state: ColdStartState::default(),
        }
    }

    pub fn from_state(config: ColdStartConfig, state: ColdStartState) -> Self {
        Self { config, state }
    }

    pub fn update(
        &mut self,
        accuracy: f64,
        response_time_ms: i64,
        priors: &PopulationPriors,
    ) -> Option<Action> {
        match self.state.phase {
            ColdStartPhase::Classify => self.handle_classify(accuracy, response_time_ms, priors),
            ColdStartPhase::Explore => self.handle_explore(accuracy, priors),
            ColdStartPhase::Normal => None,
        }
    }

    fn handle_classify(
        &mut self,
        accuracy: f64,
        response_time_ms: i64,
        priors: &PopulationPriors,
    ) -> Option<Action> {
        let rt = response_time_ms as f64;
        let fast_score = if rt < priors.fast_rt_ms && accuracy > priors.high_accuracy {
            1.0
        } else {
            0.0
        };
        let stable_score = if accuracy >= priors.low_accuracy && accuracy <= priors.high_accuracy {
            1.0
        } else {
            0.0
        };
        let cautious_score = if rt > priors.slow_rt_ms || accuracy < priors.low_accuracy {
            1.0
        } else {
            0.0
        };

        self.state.classification_scores[0] += fast_score;
        self.state.classification_scores[1] += stable_score;
        self.state.classification_scores[2] += cautious_score;
        self.state.update_count += 1;

        if self.state.update_count >= self.config.min_classify_samples {
            if let Some(archetype) = self.confident_archetype() {
                return Some(self.enter_explore(archetype, priors));
            }
        }

        if self.state.update_count >= self.config.classify_samples {
            let max_idx = self
                .state
                .classification_scores
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .unwrap_or(1);
            return Some(self.enter_explore(archetype_from_index(max_idx), priors));
        }

        // Provisional personalization from the very first answer.
        let provisional = if rt < priors.fast_rt_ms && accuracy > priors.high_accuracy {
            UserArchetype::Fast
        } else if rt > priors.slow_rt_ms || accuracy < priors.low_accuracy {
            UserArchetype::Cautious
        } else {
            UserArchetype::Stable
        };
        Some(priors.action_for(provisional))
    }

    fn enter_explore(&mut self, archetype: UserArchetype, priors: &PopulationPriors) -> Action {
        self.state.archetype = Some(archetype);
        self.state.phase = ColdStartPhase::Explore;
        self.state.probe_index = 0;
        priors.action_for(archetype)
    }

    fn handle_explore(&mut self, accuracy: f64, priors: &PopulationPriors) -> Option<Action> {
        self.state.update_count += 1;

        let min_total = self.config.min_classify_samples + self.config.min_explore_samples;
        if self.state.update_count >= min_total
            && (accuracy >= self.config.explore_high_accuracy
                || accuracy <= self.config.explore_low_accuracy)
        {
            return self.finish_explore(accuracy, priors);
        }

        if self.state.update_count >= self.config.classify_samples + self.config.explore_samples {
            return self.finish_explore(accuracy, priors);
        }

        if self.state.probe_index < self.config.probe_sequence.len() as i32 {
            let probe = self.config.probe_sequence[self.state.probe_index as usize];
            self.state.probe_index += 1;
            return Some(priors.action_for(archetype_from_index(probe.clamp(0, 2) as usize)));
        }

        None
    }

    fn confident_archetype(&self) -> Option<UserArchetype> {
        let total: f64 = self.state.classification_scores.iter().sum();
        if total <= 1e-6 {
            return None;
        }
        let mut indexed: Vec<(usize, f64)> = self
            .state
            .classification_scores
            .iter()
            .copied()
            .enumerate()
            .collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let (top_idx, top_score) = indexed[0];
        let second_score = indexed.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        let margin = (top_score - second_score) / total.max(1e-6);
        if margin < self.config.classify_confidence_margin {
            return None;
        }
        Some(archetype_from_index(top_idx))
    }

    fn finish_explore(&mut self, accuracy: f64, priors: &PopulationPriors) -> Option<Action> {
        self.state.phase = ColdStartPhase::Normal;

        let archetype = self.state.archetype.unwrap_or(UserArchetype::Stable);
        let base = priors.action_for(archetype);

        let adjusted = if accuracy >= self.config.explore_high_accuracy {
            Action {
                difficulty: DifficultyLevel::Hard,
                new_ratio: (base.new_ratio + 0.1).min(0.4),
                ..base
            }
        } else if accuracy <= self.config.explore_low_accuracy {
            Action {
                difficulty: DifficultyLevel::Easy,
                new_ratio: (base.new_ratio - 0.1).max(0.1),
                hint_level: 2,
                ..base
            }
        } else {
            base
        };

        self.state.settled_action = Some(adjusted.clone());
        Some(adjusted)
    }

    pub fn phase(&self) -> ColdStartPhase {
        self.state.phase
    }

    pub fn state(&self) -> &ColdStartState {
        &self.state
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state.phase, ColdStartPhase::Normal)
    }

    pub fn archetype(&self) -> Option<UserArchetype> {
        self.state.archetype
    }
}

impl Default for ColdStartManager {
    fn default() -> Self {
        Self::new(ColdStartConfig::default())
    }
}

fn archetype_from_index(idx: usize) -> UserArchetype {
    match idx {
        0 => UserArchetype::Fast,
        2 => UserArchetype::Cautious,
        _ => UserArchetype::Stable,
    }
}
