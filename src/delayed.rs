use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::FeatureVector;

/// One release horizon: `weight × reward` is credited once `delay_secs`
/// after the originating event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub delay_secs: u64,
    pub weight: f64,
    pub label: String,
}

/// Fixed release schedule. Weights must sum to 1 so a fully delivered event
/// credits exactly its original reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardSchedule {
    slots: Vec<ScheduleSlot>,
}

impl RewardSchedule {
    /// At most 32 horizons; the delivered-state bitmap is a `u32`.
    pub const MAX_SLOTS: usize = 32;

    pub fn new(slots: Vec<ScheduleSlot>) -> EngineResult<Self> {
        if slots.is_empty() || slots.len() > Self::MAX_SLOTS {
            return Err(EngineError::InvalidInput(format!(
                "schedule must have between 1 and {} slots",
                Self::MAX_SLOTS
            )));
        }
        let total: f64 = slots.iter().map(|s| s.weight).sum();
        if slots.iter().any(|s| !s.weight.is_finite() || s.weight < 0.0) {
            return Err(EngineError::InvalidInput(
                "schedule weights must be finite and non-negative".into(),
            ));
        }
        if (total - 1.0).abs() > 1e-9 {
            return Err(EngineError::InvalidInput(format!(
                "schedule weights must sum to 1, got {total}"
            )));
        }
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[ScheduleSlot] {
        &self.slots
    }

    fn full_mask(&self) -> u32 {
        if self.slots.len() == 32 {
            u32::MAX
        } else {
            (1u32 << self.slots.len()) - 1
        }
    }
}

impl Default for RewardSchedule {
    fn default() -> Self {
        let slot = |delay_secs: u64, weight: f64, label: &str| ScheduleSlot {
            delay_secs,
            weight,
            label: label.to_string(),
        };
        Self {
            slots: vec![
                slot(0, 0.30, "immediate"),
                slot(3_600, 0.20, "1h"),
                slot(21_600, 0.15, "6h"),
                slot(86_400, 0.20, "1d"),
                slot(604_800, 0.15, "7d"),
            ],
        }
    }
}

/// Queued credit for one interaction, consumed incrementally by
/// [`DelayedRewardAggregator::aggregate`] passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedRewardEvent {
    pub id: u64,
    pub user_id: String,
    pub reward: f64,
    pub origin_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// One bit per schedule slot, set once that horizon's share is released.
    pub delivered_mask: u32,
}

/// Plain-data snapshot for the external persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorState {
    pub events: Vec<DelayedRewardEvent>,
    pub next_id: u64,
}

/// Result of one aggregation sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOutcome {
    pub total_increment: f64,
    /// Released credit per schedule label.
    pub breakdown: HashMap<String, f64>,
    /// Released credit per user, for callers feeding policy updates.
    pub per_user: HashMap<String, f64>,
    pub pending_count: usize,
}

/// Spreads each action's credit over several time horizons, because true
/// learning outcomes (retention) only manifest later. Delivery is tracked
/// per (event, slot), so sweeps are idempotent and safe to run redundantly
/// or against a drifting clock.
pub struct DelayedRewardAggregator {
    schedule: RewardSchedule,
    retention_secs: u64,
    events: Vec<DelayedRewardEvent>,
    next_id: u64,
}

impl DelayedRewardAggregator {
    /// Events older than this forfeit whatever credit is still undelivered.
    pub const DEFAULT_RETENTION_SECS: u64 = 8 * 86_400;

    pub fn new(schedule: RewardSchedule) -> Self {
        Self {
            schedule,
            retention_secs: Self::DEFAULT_RETENTION_SECS,
            events: Vec::new(),
            next_id: 1,
        }
    }

    pub fn with_retention(mut self, retention_secs: u64) -> Self {
        self.retention_secs = retention_secs;
        self
    }

    pub fn schedule(&self) -> &RewardSchedule {
        &self.schedule
    }

    pub fn add_reward(
        &mut self,
        user_id: &str,
        reward: f64,
        origin_ts: i64,
        meta: Option<serde_json::Value>,
    ) -> EngineResult<u64> {
        self.add_reward_with_context(user_id, reward, origin_ts, None, None, meta)
    }

    pub fn add_reward_with_context(
        &mut self,
        user_id: &str,
        reward: f64,
        origin_ts: i64,
        feature: Option<FeatureVector>,
        action_key: Option<String>,
        meta: Option<serde_json::Value>,
    ) -> EngineResult<u64> {
        if !reward.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "reward must be finite, got {reward}"
            )));
        }
        if origin_ts <= 0 {
            return Err(EngineError::InvalidInput(
                "originTs must be a positive epoch timestamp".into(),
            ));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.events.push(DelayedRewardEvent {
            id,
            user_id: user_id.to_string(),
            reward: reward.clamp(-1.0, 1.0),
            origin_ts,
            feature,
            action_key,
            meta,
            delivered_mask: 0,
        });
        Ok(id)
    }

    /// Releases every elapsed, not-yet-delivered slot exactly once and purges
    /// events past the retention ceiling. Restricting to one user leaves other
    /// users' events untouched (and uncounted).
    pub fn aggregate(&mut self, now_ts: i64, user_id: Option<&str>) -> AggregateOutcome {
        let mut outcome = AggregateOutcome {
            total_increment: 0.0,
            breakdown: HashMap::new(),
            per_user: HashMap::new(),
            pending_count: 0,
        };

        let full_mask = self.schedule.full_mask();
        let retention_ms = self.retention_secs as i64 * 1000;
        let slots = self.schedule.slots.clone();

        self.events.retain_mut(|event| {
            if user_id.is_some_and(|u| u != event.user_id) {
                return true;
            }

            // Bounded-credit policy: past the retention ceiling the event is
            // dropped even if some horizons never fired.
            if now_ts - event.origin_ts > retention_ms {
                if event.delivered_mask != full_mask {
                    let forfeited: f64 = slots
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| event.delivered_mask & (1 << i) == 0)
                        .map(|(_, slot)| event.reward * slot.weight)
                        .sum();
                    debug!(
                        event_id = event.id,
                        user_id = %event.user_id,
                        forfeited,
                        "delayed reward past retention, undelivered credit forfeited"
                    );
                }
                return false;
            }

            for (i, slot) in slots.iter().enumerate() {
                let bit = 1u32 << i;
                if event.delivered_mask & bit != 0 {
                    continue;
                }
                let due_ts = event.origin_ts + slot.delay_secs as i64 * 1000;
                if now_ts >= due_ts {
                    let amount = event.reward * slot.weight;
                    event.delivered_mask |= bit;
                    outcome.total_increment += amount;
                    *outcome.breakdown.entry(slot.label.clone()).or_insert(0.0) += amount;
                    *outcome
                        .per_user
                        .entry(event.user_id.clone())
                        .or_insert(0.0) += amount;
                }
            }

            if event.delivered_mask == full_mask {
                return false;
            }
            outcome.pending_count += 1;
            true
        });

        outcome
    }

    /// Pending events in scope, without releasing anything.
    pub fn pending_count(&self, user_id: Option<&str>) -> usize {
        self.events
            .iter()
            .filter(|e| user_id.map_or(true, |u| u == e.user_id))
            .count()
    }

    pub fn export_state(&self) -> AggregatorState {
        AggregatorState {
            events: self.events.clone(),
            next_id: self.next_id,
        }
    }

    pub fn import_state(&mut self, state: AggregatorState) {
        self.next_id = state.next_id.max(1);
        self.events = state.events;
    }
}

impl Default for DelayedRewardAggregator {
    fn default() -> Self {
        Self::new(RewardSchedule::default())
    }
}
