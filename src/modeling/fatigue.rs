use crate::config::FatigueParams;

const SECONDS_PER_HOUR: f64 = 3600.0;
/// Recovery targets below this are clamped before the logarithm.
const MIN_TARGET: f64 = 1e-3;

/// Per-event signals feeding fatigue accumulation.
#[derive(Debug, Clone, Default)]
pub struct FatigueSignals {
    pub error_rate_trend: f64,
    pub rt_increase_rate: f64,
    pub repeat_errors: i32,
    pub break_minutes: Option<f64>,
}

/// Accumulates fatigue from error and slowdown signals with per-event decay.
/// A long enough break resets the estimate entirely; shorter rests are
/// handled by [`recovered_fatigue`] between sessions.
pub struct FatigueEstimator {
    params: FatigueParams,
    current_value: f64,
}

impl FatigueEstimator {
    pub fn new(params: FatigueParams) -> Self {
        Self {
            params,
            current_value: 0.0,
        }
    }

    pub fn update(&mut self, signals: FatigueSignals) -> f64 {
        if let Some(break_min) = signals.break_minutes {
            if break_min >= self.params.long_break_minutes {
                self.current_value = 0.0;
                return self.current_value;
            }
        }

        let error_component = self.params.beta * signals.error_rate_trend.max(0.0);
        let rt_component = self.params.gamma * signals.rt_increase_rate.max(0.0);
        let repeat_component = self.params.delta * (signals.repeat_errors as f64 / 5.0).min(1.0);

        let delta_fatigue = error_component + rt_component + repeat_component;
        let decay = (-self.params.k).exp();

        self.current_value = (self.current_value * decay + delta_fatigue).clamp(0.0, 1.0);
        self.current_value
    }

    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn set_value(&mut self, value: f64) {
        self.current_value = value.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.current_value = 0.0;
    }
}

impl Default for FatigueEstimator {
    fn default() -> Self {
        Self::new(FatigueParams::default())
    }
}

/// Exponential recovery over a rest interval: `F' = F · e^(−k·restHours)`.
/// Rest gaps below the configured floor are ignored so micro-pauses between
/// questions never count as recovery.
pub fn recovered_fatigue(fatigue: f64, rest_seconds: f64, params: &FatigueParams) -> f64 {
    let fatigue = fatigue.clamp(0.0, 1.0);
    if !rest_seconds.is_finite() || rest_seconds < params.min_recovery_seconds {
        return fatigue;
    }
    let rest_hours = rest_seconds / SECONDS_PER_HOUR;
    (fatigue * (-params.recovery_rate_per_hour * rest_hours).exp()).clamp(0.0, 1.0)
}

/// Inverse of [`recovered_fatigue`]: how long a user must rest to bring
/// fatigue from `current` down to `target`. The target is clamped to a small
/// positive epsilon before the logarithm; the result is floored at the
/// minimum recovery interval.
pub fn required_break_seconds(current: f64, target: f64, params: &FatigueParams) -> f64 {
    let current = current.clamp(0.0, 1.0);
    let target = target.clamp(MIN_TARGET, 1.0);
    if current <= target {
        return params.min_recovery_seconds;
    }
    let hours = (current / target).ln() / params.recovery_rate_per_hour.max(1e-6);
    (hours * SECONDS_PER_HOUR).max(params.min_recovery_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FatigueParams {
        FatigueParams::default()
    }

    #[test]
    fn accumulates_from_errors_and_decays() {
        let mut estimator = FatigueEstimator::default();
        for _ in 0..10 {
            estimator.update(FatigueSignals {
                error_rate_trend: 0.5,
                rt_increase_rate: 0.4,
                repeat_errors: 2,
                break_minutes: None,
            });
        }
        let loaded = estimator.current();
        assert!(loaded > 0.3);

        estimator.update(FatigueSignals {
            break_minutes: Some(45.0),
            ..Default::default()
        });
        assert_eq!(estimator.current(), 0.0);
        assert!(loaded <= 1.0);
    }

    #[test]
    fn recovery_is_noop_below_floor() {
        let p = params();
        assert_eq!(recovered_fatigue(0.8, 299.0, &p), 0.8);
        assert_eq!(recovered_fatigue(0.8, 0.0, &p), 0.8);
        assert_eq!(recovered_fatigue(0.8, f64::NAN, &p), 0.8);
    }

    #[test]
    fn recovery_decays_exponentially() {
        let p = params();
        // One hour at k = 0.3/h.
        let after_hour = recovered_fatigue(0.8, 3600.0, &p);
        let expected = 0.8 * (-0.3f64).exp();
        assert!((after_hour - expected).abs() < 1e-12);

        // Longer rest recovers more.
        let after_four = recovered_fatigue(0.8, 4.0 * 3600.0, &p);
        assert!(after_four < after_hour);
    }

    #[test]
    fn recovery_output_bounded() {
        let p = params();
        for fatigue in [0.0, 0.3, 1.0, 1.7] {
            for rest in [0.0, 300.0, 3600.0, 1e7] {
                let out = recovered_fatigue(fatigue, rest, &p);
                assert!((0.0..=1.0).contains(&out));
            }
        }
    }

    #[test]
    fn required_break_inverts_recovery() {
        let p = params();
        let secs = required_break_seconds(0.8, 0.2, &p);
        let recovered = recovered_fatigue(0.8, secs, &p);
        assert!((recovered - 0.2).abs() < 1e-9);
    }

    #[test]
    fn required_break_handles_degenerate_targets() {
        let p = params();
        // Zero target clamps to the epsilon instead of a log-domain error.
        let secs = required_break_seconds(0.8, 0.0, &p);
        assert!(secs.is_finite());
        assert!(secs >= p.min_recovery_seconds);

        // Already below the target: only the minimum rest is suggested.
        assert_eq!(required_break_seconds(0.1, 0.5, &p), p.min_recovery_seconds);
    }
}
