use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::TrendParams;
use crate::types::TrendState;

const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilitySample {
    pub ability: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendMethod {
    Regression,
    Ema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub state: TrendState,
    pub slope_per_day: f64,
    pub confidence: f64,
    pub sample_count: usize,
    pub span_days: f64,
    pub method: TrendMethod,
}

impl Default for TrendReport {
    fn default() -> Self {
        Self {
            state: TrendState::Flat,
            slope_per_day: 0.0,
            confidence: 0.0,
            sample_count: 0,
            span_days: 0.0,
            method: TrendMethod::Ema,
        }
    }
}

/// Classifies the longitudinal ability trajectory over a rolling window,
/// evicted by sample age rather than count. With enough samples over enough
/// span the classification comes from an OLS fit of ability against time;
/// before that an EMA slope approximation stands in with deliberately lower
/// confidence.
pub struct TrendAnalyzer {
    params: TrendParams,
    samples: VecDeque<AbilitySample>,
}

impl TrendAnalyzer {
    pub fn new(params: TrendParams) -> Self {
        Self {
            params,
            samples: VecDeque::new(),
        }
    }

    /// Adds a sample and reclassifies. Non-finite abilities, non-positive or
    /// regressing timestamps are ignored: the current report is returned and
    /// the window is left untouched.
    pub fn update(&mut self, ability: f64, ts: i64) -> TrendReport {
        let degenerate = !ability.is_finite()
            || ts <= 0
            || self.samples.back().is_some_and(|last| ts < last.ts);
        if degenerate {
            return self.current();
        }

        self.samples.push_back(AbilitySample {
            ability: ability.clamp(0.0, 1.0),
            ts,
        });

        let horizon = ts - (self.params.window_days * MS_PER_DAY) as i64;
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.ts < horizon)
        {
            self.samples.pop_front();
        }

        self.current()
    }

    /// Classification of the window as it stands. Pure read.
    pub fn current(&self) -> TrendReport {
        let n = self.samples.len();
        if n < 2 {
            return TrendReport {
                sample_count: n,
                ..Default::default()
            };
        }

        let first_ts = self.samples.front().map(|s| s.ts).unwrap_or(0);
        let last_ts = self.samples.back().map(|s| s.ts).unwrap_or(first_ts);
        let span_days = (last_ts - first_ts) as f64 / MS_PER_DAY;

        if n >= self.params.min_samples && span_days >= self.params.min_span_days {
            self.classify_regression(span_days)
        } else {
            self.classify_ema(span_days)
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &AbilitySample> {
        self.samples.iter()
    }

    pub fn export_samples(&self) -> Vec<AbilitySample> {
        self.samples.iter().copied().collect()
    }

    pub fn import_samples(&mut self, samples: Vec<AbilitySample>) {
        self.samples = samples
            .into_iter()
            .filter(|s| s.ability.is_finite() && s.ts > 0)
            .collect();
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    fn classify_regression(&self, span_days: f64) -> TrendReport {
        let n = self.samples.len() as f64;
        let first_ts = self.samples.front().map(|s| s.ts).unwrap_or(0);

        let xs: Vec<f64> = self
            .samples
            .iter()
            .map(|s| (s.ts - first_ts) as f64 / MS_PER_DAY)
            .collect();
        let ys: Vec<f64> = self.samples.iter().map(|s| s.ability).collect();

        let x_mean = xs.iter().sum::<f64>() / n;
        let y_mean = ys.iter().sum::<f64>() / n;

        let mut num = 0.0;
        let mut den = 0.0;
        for (x, y) in xs.iter().zip(ys.iter()) {
            num += (x - x_mean) * (y - y_mean);
            den += (x - x_mean) * (x - x_mean);
        }

        // All timestamps identical despite the span gate: fall back.
        if den.abs() < 1e-12 {
            return self.classify_ema(span_days);
        }

        let slope = num / den;
        let intercept = y_mean - slope * x_mean;
        let residual_variance = xs
            .iter()
            .zip(ys.iter())
            .map(|(x, y)| {
                let fitted = intercept + slope * x;
                (y - fitted) * (y - fitted)
            })
            .sum::<f64>()
            / n;

        let state = if slope > self.params.up_threshold {
            TrendState::Up
        } else if slope < self.params.down_threshold {
            TrendState::Down
        } else if residual_variance > self.params.stuck_residual_variance {
            // Near-zero slope with oscillation that the line does not
            // explain: ambiguous churn, not a plateau.
            TrendState::Stuck
        } else {
            TrendState::Flat
        };

        let count_factor = (self.samples.len() as f64 / 30.0).min(1.0);
        let span_factor = (span_days / self.params.window_days).min(1.0);
        let volatility_factor = 1.0 / (1.0 + 20.0 * residual_variance);
        let mut confidence = 0.4 * count_factor + 0.3 * span_factor + 0.3 * volatility_factor;

        if slope.abs() < self.params.up_threshold * 0.5 {
            confidence *= 0.7;
        }

        TrendReport {
            state,
            slope_per_day: slope,
            confidence: confidence.clamp(0.0, 1.0),
            sample_count: self.samples.len(),
            span_days,
            method: TrendMethod::Regression,
        }
    }

    fn classify_ema(&self, span_days: f64) -> TrendReport {
        let alpha = self.params.ema_alpha;
        let mut ema_slope: Option<f64> = None;

        let samples: Vec<&AbilitySample> = self.samples.iter().collect();
        for pair in samples.windows(2) {
            let dt_days = (pair[1].ts - pair[0].ts) as f64 / MS_PER_DAY;
            if dt_days <= 1e-9 {
                continue;
            }
            let delta = (pair[1].ability - pair[0].ability) / dt_days;
            ema_slope = Some(match ema_slope {
                Some(prev) => alpha * delta + (1.0 - alpha) * prev,
                None => delta,
            });
        }

        let slope = ema_slope.unwrap_or(0.0);
        let state = if slope > self.params.up_threshold {
            TrendState::Up
        } else if slope < self.params.down_threshold {
            TrendState::Down
        } else {
            TrendState::Flat
        };

        // The approximation never reports the confidence a regression would.
        let count_factor =
            (self.samples.len() as f64 / self.params.min_samples as f64).min(1.0);
        let confidence = (0.4 * count_factor).clamp(0.0, 0.4);

        TrendReport {
            state,
            slope_per_day: slope,
            confidence,
            sample_count: self.samples.len(),
            span_days,
            method: TrendMethod::Ema,
        }
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendParams::default())
    }
}
