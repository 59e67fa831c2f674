use crate::config::RewardConfig;
use crate::types::{DifficultyLevel, RawEvent, Reward, UserState};

/// Retrievability at which a review lands on the sweet spot of the
/// forgetting curve: late enough to strengthen the trace, early enough to
/// still succeed.
const OPTIMAL_RECALL_POINT: f64 = 0.85;

/// Context the immediate reward depends on beyond the event itself.
#[derive(Debug, Clone, Default)]
pub struct RewardContext {
    /// Personal response-time baseline (window mean). None on cold start.
    pub baseline_rt_ms: Option<f64>,
    /// Difficulty tier the item was served at.
    pub difficulty: DifficultyLevel,
    /// Predicted recall probability at review time, when the caller's
    /// scheduling model provides one.
    pub predicted_recall: Option<f64>,
}

/// Converts one completed interaction into a scalar reward in [-1,1].
///
/// This sits on the hot path: it is a total function. Malformed input maps
/// to the neutral midpoint instead of an error so a bad telemetry row can
/// never abort the decision loop.
pub struct RewardEvaluator {
    config: RewardConfig,
}

impl RewardEvaluator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, event: &RawEvent, state: &UserState, ctx: &RewardContext) -> Reward {
        if !self.inputs_sane(event, state, ctx) {
            return Reward::new(0.0, "malformed input", event.timestamp);
        }

        let accuracy_score = if event.is_correct { 1.0 } else { 0.0 };
        let speed_score = self.speed_score(event, ctx);
        let difficulty_score = Self::difficulty_score(event.is_correct, ctx.difficulty);
        let retention_score = Self::retention_score(ctx.predicted_recall);

        let weights = &self.config;
        let total = weights.accuracy_weight * accuracy_score
            + weights.speed_weight * speed_score
            + weights.difficulty_weight * difficulty_score
            + weights.retention_weight * retention_score;
        let weight_sum = weights.accuracy_weight
            + weights.speed_weight
            + weights.difficulty_weight
            + weights.retention_weight;

        let value = (total / weight_sum.max(1e-6) * 2.0 - 1.0).clamp(-1.0, 1.0);

        let reason = if event.is_correct {
            if speed_score > 0.7 {
                "correct fast answer"
            } else if event.hint_used {
                "correct with hint"
            } else {
                "correct answer"
            }
        } else {
            "incorrect answer"
        };

        Reward::new(value, reason, event.timestamp)
    }

    fn inputs_sane(&self, event: &RawEvent, state: &UserState, ctx: &RewardContext) -> bool {
        if event.response_time_ms < 0 {
            return false;
        }
        if !state.attention.is_finite() || !state.cognitive.mem.is_finite() {
            return false;
        }
        if ctx.baseline_rt_ms.is_some_and(|b| !b.is_finite() || b <= 0.0) {
            return false;
        }
        if ctx.predicted_recall.is_some_and(|r| !r.is_finite()) {
            return false;
        }
        true
    }

    /// Speed scored against the personal baseline. A correct answer faster
    /// than the baseline earns a capped bonus above the 0.5 neutral point;
    /// slower-than-baseline drifts toward 0. Speed never rewards a wrong
    /// answer.
    fn speed_score(&self, event: &RawEvent, ctx: &RewardContext) -> f64 {
        if !event.is_correct {
            return 0.5;
        }
        let baseline = match ctx.baseline_rt_ms {
            Some(b) => b,
            None => return 0.5,
        };
        let ratio = (event.response_time_ms as f64 / baseline).clamp(0.1, 4.0);
        let score = 1.0 - ratio * 0.5;
        score.clamp(0.0, 0.5 + self.config.speed_bonus_cap)
    }

    /// Difficulty calibration: a correct answer on a hard item is worth more
    /// than a correct answer on a trivial one, and a miss on a hard item is
    /// forgiven more than a miss on an easy one.
    fn difficulty_score(is_correct: bool, difficulty: DifficultyLevel) -> f64 {
        let d = difficulty.as_score();
        if is_correct {
            0.3 + 0.7 * d
        } else {
            0.4 * d
        }
    }

    /// Alignment with the forgetting curve: reviews near the optimal recall
    /// point score highest, far-too-early or far-too-late reviews lowest.
    fn retention_score(predicted_recall: Option<f64>) -> f64 {
        match predicted_recall {
            Some(recall) => {
                let recall = recall.clamp(0.0, 1.0);
                (1.0 - (recall - OPTIMAL_RECALL_POINT).abs() / OPTIMAL_RECALL_POINT).clamp(0.0, 1.0)
            }
            None => 0.5,
        }
    }
}

impl Default for RewardEvaluator {
    fn default() -> Self {
        Self::new(RewardConfig::default())
    }
}
