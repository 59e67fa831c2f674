use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::decision::coldstart::ColdStartState;
use crate::decision::ensemble::SessionInfo;
use crate::decision::{
    candidate_actions, ColdStartManager, DecisionPolicy, EnsemblePolicy, PopulationPriors,
};
use crate::delayed::{AggregateOutcome, AggregatorState, DelayedRewardAggregator};
use crate::error::{ensure_finite, EngineError, EngineResult};
use crate::features::{FeatureBuilder, WindowEntry};
use crate::modeling::{
    recovered_fatigue, AbilitySample, AttentionMonitor, AttentionSignals, CognitiveInput,
    CognitiveProfiler, FatigueEstimator, FatigueSignals, MotivationEvent, MotivationTracker,
    TrendAnalyzer,
};
use crate::reward::{RewardContext, RewardEvaluator};
use crate::types::{
    Action, ColdStartPhase, FeatureVector, ProcessOptions, ProcessResult, RawEvent, UserState,
};

/// Everything the engine holds for one user. Logically owned by that user:
/// callers serialize event processing per user id, cross-user calls are
/// independent.
struct UserRecord {
    state: UserState,
    attention: AttentionMonitor,
    fatigue: FatigueEstimator,
    cognitive: CognitiveProfiler,
    motivation: MotivationTracker,
    trend: TrendAnalyzer,
    policy: EnsemblePolicy,
    cold_start: Option<ColdStartManager>,
    current_action: Action,
    last_feature: Option<FeatureVector>,
    interaction_count: u32,
    last_updated: i64,
}

/// Per-user snapshot for the external store. Plain serde data; the engine
/// rebuilds the runtime record from it on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedUserRecord {
    pub user_id: String,
    pub state: UserState,
    pub policy: EnsemblePolicy,
    pub cold_start: Option<ColdStartState>,
    pub current_action: Action,
    pub last_feature: Option<FeatureVector>,
    pub interaction_count: u32,
    pub feature_window: Vec<WindowEntry>,
    pub trend_samples: Vec<AbilitySample>,
    pub last_updated: i64,
}

/// The online decision loop: one synchronous pass per event through state
/// update, feature building, action selection, reward computation, and
/// delayed-credit enqueueing, with a lower-frequency trend sample. Owns an
/// arena of per-user records and performs no I/O of its own.
pub struct AdaptiveEngine {
    config: EngineConfig,
    features: FeatureBuilder,
    reward: RewardEvaluator,
    aggregator: DelayedRewardAggregator,
    priors: Arc<RwLock<PopulationPriors>>,
    users: HashMap<String, UserRecord>,
    rng: StdRng,
}

impl AdaptiveEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_seed(config, rand::random())
    }

    /// Seeded construction for deterministic replay in tests and offline
    /// evaluation.
    pub fn with_seed(config: EngineConfig, seed: u64) -> Self {
        let features = FeatureBuilder::new(config.feature_window, config.max_response_time_ms);
        let reward = RewardEvaluator::new(config.reward.clone());
        Self {
            config,
            features,
            reward,
            aggregator: DelayedRewardAggregator::default(),
            priors: Arc::new(RwLock::new(PopulationPriors::default())),
            users: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Shared handle to the population priors. Read-mostly: the loop reads
    /// them during cold start; writers run `absorb_batch` out of band.
    pub fn population_priors(&self) -> Arc<RwLock<PopulationPriors>> {
        Arc::clone(&self.priors)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// One full pass for one event. Fails before mutation on invalid input;
    /// never fails on a slow pass (that is logged and reported instead).
    pub fn process_event(
        &mut self,
        user_id: &str,
        event: RawEvent,
        options: ProcessOptions,
    ) -> EngineResult<ProcessResult> {
        let started = Instant::now();

        event.validate()?;
        validate_options(&options)?;

        let mut record = match self.users.remove(user_id) {
            Some(record) => record,
            None => self.new_record(),
        };

        // The record always goes back into the arena, pass or fail; a
        // mid-pipeline error must not drop the user's accumulated state.
        let result = self.run_pipeline(user_id, &event, &options, &mut record);
        self.users.insert(user_id.to_string(), record);
        let result = result?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.slow_event_warn_ms {
            warn!(
                user_id,
                elapsed_ms,
                threshold_ms = self.config.slow_event_warn_ms,
                "slow decision pass"
            );
        }

        Ok(ProcessResult {
            elapsed_ms,
            ..result
        })
    }

    fn run_pipeline(
        &mut self,
        user_id: &str,
        event: &RawEvent,
        options: &ProcessOptions,
        record: &mut UserRecord,
    ) -> EngineResult<ProcessResult> {
        // Timestamps are monotonic per user.
        if event.timestamp < record.state.ts {
            return Err(EngineError::InvalidInput(format!(
                "event timestamp {} precedes user state timestamp {}",
                event.timestamp, record.state.ts
            )));
        }

        // Rest since the previous event recovers fatigue before the new
        // load is applied.
        if record.state.ts > 0 {
            let rest_seconds = (event.timestamp - record.state.ts) as f64 / 1000.0;
            let recovered =
                recovered_fatigue(record.fatigue.current(), rest_seconds, &self.config.fatigue);
            record.fatigue.set_value(recovered);
        }

        let new_state = self.update_state(record, event, options);
        let feature_vector = self.features.build(user_id, event, &new_state);

        let accuracy = options
            .recent_accuracy
            .unwrap_or(if event.is_correct { 1.0 } else { 0.0 });

        // Cold start is an orchestration-level branch: until it completes,
        // population archetypes pick the action and the bandits stay out.
        let cold_start_action = match record.cold_start.as_mut() {
            Some(cs) if self.config.feature_flags.cold_start_enabled && !cs.is_complete() => {
                let priors = self.priors.read();
                cs.update(accuracy, event.response_time_ms, &priors)
            }
            _ => None,
        };

        let (chosen_action, votes) = if let Some(action) = cold_start_action.clone() {
            (action, vec![])
        } else if !self.config.feature_flags.ensemble_enabled {
            (record.current_action.clone(), vec![])
        } else {
            let candidates = candidate_actions(&record.current_action);
            let (merged, votes) = record.policy.select_with_candidates(
                &feature_vector,
                &candidates,
                &record.current_action,
                &mut self.rng,
            )?;
            let session = options.study_duration_minutes.map(|minutes| SessionInfo {
                total_sessions: record.interaction_count / 10,
                duration_minutes: minutes,
            });
            let filtered = record
                .policy
                .post_filter(merged, &new_state, session.as_ref());
            (filtered, votes)
        };

        // The reward grades the interaction under the action it was served
        // with, not the one just chosen for the next batch.
        let reward_ctx = RewardContext {
            baseline_rt_ms: self.features.baseline_rt_ms(user_id),
            difficulty: record.current_action.difficulty,
            predicted_recall: options.predicted_recall,
        };
        let reward = self.reward.evaluate(event, &new_state, &reward_ctx);

        if cold_start_action.is_none() {
            record
                .policy
                .update(&feature_vector, &chosen_action, reward.value)?;
            record
                .policy
                .update_performance(&votes, &chosen_action, reward.value);
        }

        let meta = options
            .session_id
            .as_ref()
            .map(|sid| serde_json::json!({ "sessionId": sid }));
        let delayed_reward_id = self.aggregator.add_reward_with_context(
            user_id,
            reward.value,
            event.timestamp,
            Some(feature_vector.clone()),
            Some(chosen_action.arm_key()),
            meta,
        )?;

        record.interaction_count += 1;

        // Trend runs batched at a lower cadence than the per-event models.
        let trend_report = if record.interaction_count % self.config.trend_update_interval == 0 {
            let ability = new_state.cognitive.composite();
            Some(record.trend.update(ability, event.timestamp))
        } else {
            None
        };

        let mut final_state = new_state;
        if let Some(ref report) = trend_report {
            final_state.trend = Some(report.state);
        } else {
            final_state.trend = record.state.trend;
        }

        let cold_start_phase = record.cold_start.as_ref().map(|cs| cs.phase());

        record.state = final_state.clone();
        record.current_action = chosen_action.clone();
        record.last_feature = Some(feature_vector.clone());
        record.last_updated = event.timestamp;

        Ok(ProcessResult {
            state: final_state,
            action: chosen_action,
            reward,
            feature_vector,
            trend: trend_report,
            cold_start_phase,
            delayed_reward_id,
            elapsed_ms: 0,
        })
    }

    /// Sweeps the delayed-reward queue. Safe to call redundantly; delivery
    /// is tracked per slot.
    pub fn aggregate_delayed_rewards(
        &mut self,
        now_ts: i64,
        user_id: Option<&str>,
    ) -> AggregateOutcome {
        self.aggregator.aggregate(now_ts, user_id)
    }

    /// Applies externally computed credit (for example a matured delayed
    /// reward) to a user's policy, using the context of their most recent
    /// decision.
    pub fn apply_external_reward(&mut self, user_id: &str, reward: f64) -> EngineResult<()> {
        ensure_finite(reward, "reward")?;
        let record = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;
        let feature = record.last_feature.clone().ok_or_else(|| {
            EngineError::InvalidInput("user has no decision context yet".into())
        })?;
        let action = record.current_action.clone();
        record.policy.update(&feature, &action, reward)?;
        Ok(())
    }

    pub fn user_state(&self, user_id: &str) -> Option<UserState> {
        self.users.get(user_id).map(|r| r.state.clone())
    }

    pub fn current_action(&self, user_id: &str) -> Option<Action> {
        self.users.get(user_id).map(|r| r.current_action.clone())
    }

    pub fn cold_start_phase(&self, user_id: &str) -> Option<ColdStartPhase> {
        self.users
            .get(user_id)
            .and_then(|r| r.cold_start.as_ref())
            .map(|cs| cs.phase())
    }

    /// Snapshot of one user for the external store.
    pub fn export_user(&self, user_id: &str) -> EngineResult<PersistedUserRecord> {
        let record = self
            .users
            .get(user_id)
            .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;
        Ok(PersistedUserRecord {
            user_id: user_id.to_string(),
            state: record.state.clone(),
            policy: record.policy.clone(),
            cold_start: record.cold_start.as_ref().map(|cs| cs.state().clone()),
            current_action: record.current_action.clone(),
            last_feature: record.last_feature.clone(),
            interaction_count: record.interaction_count,
            feature_window: self.features.export_window(user_id),
            trend_samples: record.trend.export_samples(),
            last_updated: record.last_updated,
        })
    }

    /// Rebuilds a user's runtime record from a snapshot.
    pub fn import_user(&mut self, snapshot: PersistedUserRecord) -> EngineResult<()> {
        let mut record = self.new_record();
        record.attention.set_value(snapshot.state.attention);
        record.fatigue.set_value(snapshot.state.fatigue);
        record.motivation.set_value(snapshot.state.motivation);
        record.cognitive.set_profile(snapshot.state.cognitive.clone());
        record.trend.import_samples(snapshot.trend_samples);
        record.policy = snapshot.policy;
        record.cold_start = snapshot
            .cold_start
            .map(|cs| ColdStartManager::from_state(self.config.cold_start.clone(), cs));
        record.state = snapshot.state.clamped();
        record.current_action = snapshot.current_action;
        record.last_feature = snapshot.last_feature;
        record.interaction_count = snapshot.interaction_count;
        record.last_updated = snapshot.last_updated;

        self.features
            .import_window(&snapshot.user_id, snapshot.feature_window);
        self.users.insert(snapshot.user_id, record);
        Ok(())
    }

    /// Explicit reset: user state is never deleted implicitly.
    pub fn reset_user(&mut self, user_id: &str) {
        self.users.remove(user_id);
        self.features.remove_user(user_id);
        debug!(user_id, "user state reset");
    }

    /// Evicts records idle for longer than `max_age_ms`. The external store
    /// still holds their snapshots; this only frees the in-memory arena.
    pub fn cleanup_stale_users(&mut self, now_ts: i64, max_age_ms: i64) -> usize {
        let stale: Vec<String> = self
            .users
            .iter()
            .filter(|(_, record)| now_ts - record.last_updated > max_age_ms)
            .map(|(user_id, _)| user_id.clone())
            .collect();
        for user_id in &stale {
            self.users.remove(user_id);
            self.features.remove_user(user_id);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "evicted stale user records");
        }
        stale.len()
    }

    pub fn export_aggregator(&self) -> AggregatorState {
        self.aggregator.export_state()
    }

    pub fn import_aggregator(&mut self, state: AggregatorState) {
        self.aggregator.import_state(state);
    }

    fn new_record(&self) -> UserRecord {
        let config = &self.config;
        UserRecord {
            state: UserState::default(),
            attention: AttentionMonitor::new(
                config.attention_weights.clone(),
                config.attention_smoothing,
            ),
            fatigue: FatigueEstimator::new(config.fatigue.clone()),
            cognitive: CognitiveProfiler::new(config.cognitive.clone()),
            motivation: MotivationTracker::new(config.motivation.clone()),
            trend: TrendAnalyzer::new(config.trend.clone()),
            policy: EnsemblePolicy::new(
                config.feature_flags.clone(),
                config.ensemble_weights.clone(),
                &config.bandit,
            ),
            cold_start: config
                .feature_flags
                .cold_start_enabled
                .then(|| ColdStartManager::new(config.cold_start.clone())),
            current_action: Action::default(),
            last_feature: None,
            interaction_count: 0,
            last_updated: 0,
        }
    }

    fn update_state(
        &self,
        record: &mut UserRecord,
        event: &RawEvent,
        options: &ProcessOptions,
    ) -> UserState {
        let max_rt = self.config.max_response_time_ms as f64;
        let rt_norm = (event.response_time_ms as f64 / max_rt).min(1.0);
        let dwell_norm = event
            .dwell_time_ms
            .map(|ms| (ms as f64 / max_rt).min(1.0))
            .unwrap_or(rt_norm);

        let prev_state = &record.state;

        let attention = record.attention.update(AttentionSignals {
            rt_norm,
            rt_cv: options.rt_cv.unwrap_or(0.0),
            pause_count: event.pause_count as f64,
            switch_count: event.switch_count as f64,
            interaction_density: event.interaction_density.unwrap_or(0.5),
            focus_loss: event
                .focus_loss_ms
                .map(|ms| ms as f64 / 60_000.0)
                .unwrap_or(0.0),
            recent_accuracy: options.recent_accuracy.unwrap_or(0.7),
            is_correct: Some(event.is_correct),
            hint_used: event.hint_used,
            retry_count: event.retry_count,
            dwell_norm,
            study_duration_minutes: options.study_duration_minutes.unwrap_or(0.0),
            hour_of_day: hour_of_day(event.timestamp),
        });

        let break_minutes = if prev_state.ts > 0 {
            Some((event.timestamp - prev_state.ts) as f64 / 60_000.0)
        } else {
            None
        };
        let fatigue = record.fatigue.update(FatigueSignals {
            error_rate_trend: if event.is_correct { -0.05 } else { 0.1 },
            rt_increase_rate: rt_norm,
            repeat_errors: event.retry_count,
            break_minutes,
        });

        let cognitive = record.cognitive.update(CognitiveInput {
            accuracy: if event.is_correct { 1.0 } else { 0.0 },
            response_time_ms: event.response_time_ms,
        });

        let motivation = record.motivation.update(MotivationEvent {
            is_correct: event.is_correct,
            is_quit: event.is_quit,
        });

        let conf = (self.config.confidence_decay * prev_state.conf
            + (1.0 - self.config.confidence_decay) * 0.7)
            .max(self.config.min_confidence);

        UserState {
            attention,
            fatigue,
            motivation,
            cognitive,
            trend: prev_state.trend,
            conf,
            ts: event.timestamp,
        }
        .clamped()
    }
}

impl Default for AdaptiveEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn validate_options(options: &ProcessOptions) -> EngineResult<()> {
    if let Some(v) = options.recent_accuracy {
        ensure_finite(v, "recentAccuracy")?;
    }
    if let Some(v) = options.rt_cv {
        ensure_finite(v, "rtCv")?;
    }
    if let Some(v) = options.study_duration_minutes {
        ensure_finite(v, "studyDurationMinutes")?;
    }
    if let Some(v) = options.predicted_recall {
        ensure_finite(v, "predictedRecall")?;
    }
    Ok(())
}

fn hour_of_day(ts_ms: i64) -> u32 {
    use chrono::Timelike;
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.hour())
        .unwrap_or(12)
}
