use std::collections::{HashMap, VecDeque};

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::types::{FeatureVector, RawEvent, UserState};

/// Output dimensionality of [`FeatureBuilder::build`]. Fixed per
/// [`crate::types::FEATURE_SCHEMA_VERSION`]; policies trained against one
/// dimensionality reject vectors of another.
pub const FEATURE_DIM: usize = 12;

// Positions of the state fields inside the vector, for consumers that read
// individual components (the heuristic rule layer does).
pub const IDX_ATTENTION: usize = 4;
pub const IDX_FATIGUE: usize = 5;
pub const IDX_MOTIVATION: usize = 6;
pub const IDX_MEMORY: usize = 7;

/// One window entry, the minimum needed for the rolling aggregates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEntry {
    pub is_correct: bool,
    pub response_time_ms: i64,
    pub ts: i64,
}

/// Builds fixed-dimension feature vectors from the event, the latent state,
/// and a bounded per-user window of recent events. Pure with respect to its
/// window: replaying the same event sequence reproduces the same vectors.
pub struct FeatureBuilder {
    capacity: usize,
    max_response_time_ms: i64,
    windows: HashMap<String, VecDeque<WindowEntry>>,
}

impl FeatureBuilder {
    pub fn new(capacity: usize, max_response_time_ms: i64) -> Self {
        Self {
            capacity: capacity.max(1),
            max_response_time_ms: max_response_time_ms.max(1),
            windows: HashMap::new(),
        }
    }

    /// Pushes the event into the user's window and derives the vector.
    pub fn build(&mut self, user_id: &str, event: &RawEvent, state: &UserState) -> FeatureVector {
        let window = self.windows.entry(user_id.to_string()).or_default();
        window.push_back(WindowEntry {
            is_correct: event.is_correct,
            response_time_ms: event.response_time_ms,
            ts: event.timestamp,
        });
        while window.len() > self.capacity {
            window.pop_front();
        }

        let max_rt = self.max_response_time_ms as f64;
        let rt_norm = (event.response_time_ms as f64 / max_rt).min(1.0);
        let dwell_norm = event
            .dwell_time_ms
            .map(|d| (d as f64 / 10_000.0).min(1.0))
            .unwrap_or(0.5);
        let retry_norm = (event.retry_count as f64 / 5.0).min(1.0);

        let error_rate = {
            let errors = window.iter().filter(|e| !e.is_correct).count();
            errors as f64 / window.len() as f64
        };
        let mean_rt_norm = {
            let sum: i64 = window.iter().map(|e| e.response_time_ms).sum();
            (sum as f64 / window.len() as f64 / max_rt).min(1.0)
        };

        let hour = hour_of_day(event.timestamp);
        let hour_bucket = (hour / 4) as f64 / 5.0;
        let interaction_norm = window.len() as f64 / self.capacity as f64;

        let values = vec![
            rt_norm,
            dwell_norm,
            if event.is_correct { 1.0 } else { 0.0 },
            retry_norm,
            state.attention,
            state.fatigue,
            state.motivation,
            state.cognitive.mem,
            error_rate,
            mean_rt_norm,
            hour_bucket,
            interaction_norm,
        ];
        debug_assert_eq!(values.len(), FEATURE_DIM);

        let labels = vec![
            "rtNorm".to_string(),
            "dwellNorm".to_string(),
            "correct".to_string(),
            "retryNorm".to_string(),
            "attention".to_string(),
            "fatigue".to_string(),
            "motivation".to_string(),
            "memory".to_string(),
            "recentErrorRate".to_string(),
            "recentRtMean".to_string(),
            "hourBucket".to_string(),
            "interactionCount".to_string(),
        ];

        FeatureVector::new(values, labels, event.timestamp)
    }

    /// Mean response time of the user's window, the personal speed baseline
    /// the reward evaluator compares against.
    pub fn baseline_rt_ms(&self, user_id: &str) -> Option<f64> {
        let window = self.windows.get(user_id)?;
        if window.is_empty() {
            return None;
        }
        let sum: i64 = window.iter().map(|e| e.response_time_ms).sum();
        Some(sum as f64 / window.len() as f64)
    }

    pub fn window_len(&self, user_id: &str) -> usize {
        self.windows.get(user_id).map(|w| w.len()).unwrap_or(0)
    }

    pub fn export_window(&self, user_id: &str) -> Vec<WindowEntry> {
        self.windows
            .get(user_id)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn import_window(&mut self, user_id: &str, entries: Vec<WindowEntry>) {
        let mut window: VecDeque<WindowEntry> = entries.into_iter().collect();
        while window.len() > self.capacity {
            window.pop_front();
        }
        self.windows.insert(user_id.to_string(), window);
    }

    pub fn remove_user(&mut self, user_id: &str) {
        self.windows.remove(user_id);
    }
}

fn hour_of_day(ts_ms: i64) -> u32 {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.hour())
        .unwrap_or(12)
}
