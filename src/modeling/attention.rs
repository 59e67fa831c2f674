use crate::config::AttentionWeights;

/// Per-event signals feeding the attention estimate. All normalized fields
/// are expected in [0,1]; the monitor clamps defensively anyway.
#[derive(Debug, Clone)]
pub struct AttentionSignals {
    pub rt_norm: f64,
    pub rt_cv: f64,
    pub pause_count: f64,
    pub switch_count: f64,
    pub interaction_density: f64,
    pub focus_loss: f64,
    pub recent_accuracy: f64,
    pub is_correct: Option<bool>,
    pub hint_used: bool,
    pub retry_count: i32,
    pub dwell_norm: f64,
    pub study_duration_minutes: f64,
    pub hour_of_day: u32,
}

impl Default for AttentionSignals {
    fn default() -> Self {
        Self {
            rt_norm: 0.5,
            rt_cv: 0.0,
            pause_count: 0.0,
            switch_count: 0.0,
            interaction_density: 0.5,
            focus_loss: 0.0,
            recent_accuracy: 0.7,
            is_correct: None,
            hint_used: false,
            retry_count: 0,
            dwell_norm: 0.5,
            study_duration_minutes: 0.0,
            hour_of_day: 12,
        }
    }
}

/// Smoothed attention estimate with streak tracking and adaptive smoothing:
/// volatile input moves the estimate faster, steady input slower.
pub struct AttentionMonitor {
    weights: AttentionWeights,
    base_smoothing: f64,
    current_value: f64,
    correct_streak: u32,
    error_streak: u32,
}

impl AttentionMonitor {
    pub fn new(weights: AttentionWeights, smoothing: f64) -> Self {
        Self {
            weights,
            base_smoothing: smoothing,
            current_value: 0.7,
            correct_streak: 0,
            error_streak: 0,
        }
    }

    pub fn update(&mut self, signals: AttentionSignals) -> f64 {
        // Inverted scores: lower raw load reads as higher attention.
        let rt_score = 1.0 - signals.rt_norm.clamp(0.0, 1.0);
        let cv_score = 1.0 - signals.rt_cv.clamp(0.0, 1.0);
        let pause_score = 1.0 - (signals.pause_count / 10.0).clamp(0.0, 1.0);
        let switch_score = 1.0 - (signals.switch_count / 5.0).clamp(0.0, 1.0);
        let interaction_score = signals.interaction_density.clamp(0.0, 1.0);
        let focus_score = 1.0 - signals.focus_loss.clamp(0.0, 1.0);
        let accuracy_score = signals.recent_accuracy.clamp(0.0, 1.0);

        if let Some(is_correct) = signals.is_correct {
            if is_correct {
                self.correct_streak = self.correct_streak.saturating_add(1);
                self.error_streak = 0;
            } else {
                self.error_streak = self.error_streak.saturating_add(1);
                self.correct_streak = 0;
            }
        }

        let streak_boost = (self.correct_streak.min(5) as f64 / 5.0) * 0.5;
        let streak_penalty = (self.error_streak.min(3) as f64 / 3.0) * 0.5;
        let streak_score = 0.5 + streak_boost - streak_penalty;

        let hint_score = if signals.hint_used { 0.3 } else { 1.0 };
        let retry_score = 1.0 - (signals.retry_count as f64 / 3.0).clamp(0.0, 1.0);

        // Dwell time scores on a U-curve: ~20% of the ceiling is optimal,
        // both skimming and lingering read as disengagement.
        let dwell_distance = (signals.dwell_norm.clamp(0.0, 1.0) - 0.2).abs() * 2.5;
        let dwell_score = (1.0 - dwell_distance).max(0.0);

        let circadian_score = match signals.hour_of_day {
            6..=11 => 1.0,
            12..=14 => 0.75,
            15..=19 => 0.9,
            20..=23 => 0.65,
            _ => 0.5,
        };

        let weighted_sum = self.weights.rt_mean * rt_score
            + self.weights.rt_cv * cv_score
            + self.weights.pause * pause_score
            + self.weights.switch * switch_score
            + self.weights.interaction * interaction_score
            + self.weights.focus_loss * focus_score
            + self.weights.recent_accuracy * accuracy_score
            + self.weights.streak * streak_score
            + self.weights.hint_used * hint_score
            + self.weights.retry_count * retry_score
            + self.weights.dwell_time * dwell_score
            + self.weights.circadian * circadian_score;

        let mut raw_attention = weighted_sum / self.weights.total().max(1e-6);

        // Attention decays after ~20 minutes of continuous study.
        if signals.study_duration_minutes > 20.0 {
            let decay = ((signals.study_duration_minutes - 20.0) / 60.0).clamp(0.0, 0.4);
            raw_attention *= 1.0 - decay;
        }

        let volatility =
            (signals.rt_cv.clamp(0.0, 1.0) + (signals.switch_count / 5.0).clamp(0.0, 1.0)) / 2.0;
        let adaptive_smoothing = (self.base_smoothing * (1.0 + 0.5 * volatility)).clamp(0.15, 0.7);

        let smoothed =
            adaptive_smoothing * raw_attention + (1.0 - adaptive_smoothing) * self.current_value;
        self.current_value = smoothed.clamp(0.0, 1.0);
        self.current_value
    }

    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn set_value(&mut self, value: f64) {
        self.current_value = value.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.current_value = 0.7;
        self.correct_streak = 0;
        self.error_streak = 0;
    }

    pub fn streaks(&self) -> (u32, u32) {
        (self.correct_streak, self.error_streak)
    }
}

impl Default for AttentionMonitor {
    fn default() -> Self {
        Self::new(AttentionWeights::default(), 0.3)
    }
}
