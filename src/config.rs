use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionWeights {
    pub rt_mean: f64,
    pub rt_cv: f64,
    pub pause: f64,
    pub switch: f64,
    pub interaction: f64,
    pub focus_loss: f64,
    pub recent_accuracy: f64,
    pub streak: f64,
    pub hint_used: f64,
    pub retry_count: f64,
    pub dwell_time: f64,
    pub circadian: f64,
}

impl AttentionWeights {
    pub fn total(&self) -> f64 {
        self.rt_mean
            + self.rt_cv
            + self.pause
            + self.switch
            + self.interaction
            + self.focus_loss
            + self.recent_accuracy
            + self.streak
            + self.hint_used
            + self.retry_count
            + self.dwell_time
            + self.circadian
    }
}

impl Default for AttentionWeights {
    fn default() -> Self {
        Self {
            rt_mean: 0.16,
            rt_cv: 0.10,
            pause: 0.10,
            switch: 0.08,
            interaction: 0.08,
            focus_loss: 0.10,
            recent_accuracy: 0.12,
            streak: 0.08,
            hint_used: 0.04,
            retry_count: 0.04,
            dwell_time: 0.05,
            circadian: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueParams {
    /// Weight of the error-rate trend component.
    pub beta: f64,
    /// Weight of the response-time inflation component.
    pub gamma: f64,
    /// Weight of the repeat-error component.
    pub delta: f64,
    /// Per-event decay constant.
    pub k: f64,
    /// Rest gap (minutes) that fully resets accumulated fatigue.
    pub long_break_minutes: f64,
    /// Exponential recovery rate per rest hour.
    pub recovery_rate_per_hour: f64,
    /// Rest intervals below this floor are not counted as recovery.
    pub min_recovery_seconds: f64,
}

impl Default for FatigueParams {
    fn default() -> Self {
        Self {
            beta: 0.3,
            gamma: 0.3,
            delta: 0.2,
            k: 0.05,
            long_break_minutes: 30.0,
            recovery_rate_per_hour: 0.3,
            min_recovery_seconds: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotivationParams {
    pub rho: f64,
    pub kappa: f64,
    pub lambda: f64,
    pub mu: f64,
}

impl Default for MotivationParams {
    fn default() -> Self {
        Self {
            rho: 0.9,
            kappa: 0.1,
            lambda: 0.15,
            mu: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveParams {
    pub memory_alpha: f64,
    pub speed_baseline_ms: f64,
    pub stability_window: usize,
}

impl Default for CognitiveParams {
    fn default() -> Self {
        Self {
            memory_alpha: 0.1,
            speed_baseline_ms: 3000.0,
            stability_window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendParams {
    /// Window horizon in days; samples older than this are evicted.
    pub window_days: f64,
    /// Minimum samples for the regression path.
    pub min_samples: usize,
    /// Minimum span in days for the regression path.
    pub min_span_days: f64,
    /// Slope (per day) above which the trajectory is classified Up.
    pub up_threshold: f64,
    /// Slope (per day) below which the trajectory is classified Down.
    pub down_threshold: f64,
    /// Residual variance above which a near-zero slope reads as Stuck
    /// rather than Flat. Heuristic and tunable, not load-bearing.
    pub stuck_residual_variance: f64,
    /// EMA smoothing for the cold-start slope approximation.
    pub ema_alpha: f64,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            window_days: 30.0,
            min_samples: 10,
            min_span_days: 5.0,
            up_threshold: 0.01,
            down_threshold: -0.005,
            stuck_residual_variance: 0.01,
            ema_alpha: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartConfig {
    pub classify_samples: i32,
    pub explore_samples: i32,
    pub min_classify_samples: i32,
    pub min_explore_samples: i32,
    pub classify_confidence_margin: f64,
    pub explore_high_accuracy: f64,
    pub explore_low_accuracy: f64,
    pub probe_sequence: Vec<i32>,
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            classify_samples: 5,
            explore_samples: 10,
            min_classify_samples: 3,
            min_explore_samples: 5,
            classify_confidence_margin: 0.34,
            explore_high_accuracy: 0.9,
            explore_low_accuracy: 0.4,
            probe_sequence: vec![0, 1, 2, 0, 1, 2],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    /// LinUCB exploration multiplier.
    pub alpha: f64,
    /// Thompson posterior noise variance.
    pub noise_variance: f64,
    /// Feature dimension the policies are trained against.
    pub context_dim: usize,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub exploration_scale: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            noise_variance: 0.25,
            context_dim: crate::features::FEATURE_DIM,
            min_confidence: 0.3,
            max_confidence: 1.0,
            exploration_scale: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub linucb: f64,
    pub thompson: f64,
    pub heuristic: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            linucb: 0.4,
            thompson: 0.4,
            heuristic: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub accuracy_weight: f64,
    pub speed_weight: f64,
    pub difficulty_weight: f64,
    pub retention_weight: f64,
    /// Cap on the faster-than-baseline bonus.
    pub speed_bonus_cap: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            accuracy_weight: 0.5,
            speed_weight: 0.2,
            difficulty_weight: 0.15,
            retention_weight: 0.15,
            speed_bonus_cap: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalConfig {
    pub propensity_min: f64,
    pub propensity_max: f64,
    pub learning_rate: f64,
    pub regularization: f64,
    pub max_iterations: u32,
    pub convergence_threshold: f64,
    pub min_samples: usize,
    pub min_arm_samples: usize,
}

impl Default for CausalConfig {
    fn default() -> Self {
        Self {
            propensity_min: 0.05,
            propensity_max: 0.95,
            learning_rate: 0.1,
            regularization: 0.01,
            max_iterations: 1000,
            convergence_threshold: 1e-6,
            min_samples: 10,
            min_arm_samples: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub ensemble_enabled: bool,
    pub linucb_enabled: bool,
    pub thompson_enabled: bool,
    pub heuristic_enabled: bool,
    pub cold_start_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            ensemble_enabled: true,
            linucb_enabled: true,
            thompson_enabled: true,
            heuristic_enabled: true,
            cold_start_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub attention_weights: AttentionWeights,
    pub fatigue: FatigueParams,
    pub motivation: MotivationParams,
    pub cognitive: CognitiveParams,
    pub trend: TrendParams,
    pub cold_start: ColdStartConfig,
    pub bandit: BanditConfig,
    pub ensemble_weights: EnsembleWeights,
    pub reward: RewardConfig,
    pub causal: CausalConfig,
    pub feature_flags: FeatureFlags,
    pub attention_smoothing: f64,
    pub confidence_decay: f64,
    pub min_confidence: f64,
    /// Per-user feature window capacity.
    pub feature_window: usize,
    /// Response-time normalization ceiling in milliseconds.
    pub max_response_time_ms: i64,
    /// Trend sample cadence: one ability sample every N processed events.
    pub trend_update_interval: u32,
    /// Elapsed-time threshold above which a processed event is logged slow.
    pub slow_event_warn_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attention_weights: AttentionWeights::default(),
            fatigue: FatigueParams::default(),
            motivation: MotivationParams::default(),
            cognitive: CognitiveParams::default(),
            trend: TrendParams::default(),
            cold_start: ColdStartConfig::default(),
            bandit: BanditConfig::default(),
            ensemble_weights: EnsembleWeights::default(),
            reward: RewardConfig::default(),
            causal: CausalConfig::default(),
            feature_flags: FeatureFlags::default(),
            attention_smoothing: 0.3,
            confidence_decay: 0.99,
            min_confidence: 0.1,
            feature_window: 50,
            max_response_time_ms: 30_000,
            trend_update_interval: 5,
            slow_event_warn_ms: 50,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ENGINE_ENSEMBLE_ENABLED") {
            config.feature_flags.ensemble_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_THOMPSON_ENABLED") {
            config.feature_flags.thompson_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_LINUCB_ENABLED") {
            config.feature_flags.linucb_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_COLD_START_ENABLED") {
            config.feature_flags.cold_start_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_SLOW_EVENT_WARN_MS") {
            if let Ok(ms) = val.parse() {
                config.slow_event_warn_ms = ms;
            }
        }

        config
    }
}
