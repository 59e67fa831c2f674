use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Mid,
    Hard,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Mid => "mid",
            Self::Hard => "hard",
        }
    }

    pub fn harder(&self) -> Self {
        match self {
            Self::Easy => Self::Mid,
            _ => Self::Hard,
        }
    }

    pub fn easier(&self) -> Self {
        match self {
            Self::Hard => Self::Mid,
            _ => Self::Easy,
        }
    }

    /// Numeric encoding used by the bandit action features.
    pub fn as_score(&self) -> f64 {
        match self {
            Self::Easy => 0.3,
            Self::Mid => 0.6,
            Self::Hard => 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendState {
    Up,
    #[default]
    Flat,
    Stuck,
    Down,
}

impl TrendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Flat => "flat",
            Self::Stuck => "stuck",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserArchetype {
    Fast,
    #[default]
    Stable,
    Cautious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColdStartPhase {
    #[default]
    Classify,
    Explore,
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveProfile {
    pub mem: f64,
    pub speed: f64,
    pub stability: f64,
}

impl Default for CognitiveProfile {
    fn default() -> Self {
        Self {
            mem: 0.5,
            speed: 0.5,
            stability: 0.5,
        }
    }
}

impl CognitiveProfile {
    pub fn composite(&self) -> f64 {
        (self.mem + self.speed + self.stability) / 3.0
    }

    pub fn clamped(mut self) -> Self {
        self.mem = self.mem.clamp(0.0, 1.0);
        self.speed = self.speed.clamp(0.0, 1.0);
        self.stability = self.stability.clamp(0.0, 1.0);
        self
    }
}

/// Per-user latent state. Every bounded field is clamped after each update
/// and `ts` is monotonic per user; events arriving out of order are rejected
/// before any mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub attention: f64,
    pub fatigue: f64,
    pub motivation: f64,
    pub cognitive: CognitiveProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendState>,
    /// Reliability of the estimate itself.
    pub conf: f64,
    pub ts: i64,
}

impl Default for UserState {
    fn default() -> Self {
        Self {
            attention: 0.7,
            fatigue: 0.0,
            motivation: 0.5,
            cognitive: CognitiveProfile::default(),
            trend: None,
            conf: 0.5,
            ts: 0,
        }
    }
}

impl UserState {
    pub fn clamped(mut self) -> Self {
        self.attention = self.attention.clamp(0.0, 1.0);
        self.fatigue = self.fatigue.clamp(0.0, 1.0);
        self.motivation = self.motivation.clamp(-1.0, 1.0);
        self.cognitive = self.cognitive.clamped();
        self.conf = self.conf.clamp(0.0, 1.0);
        self
    }
}

/// One answered item. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_id: Option<String>,
    pub is_correct: bool,
    pub response_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_time_ms: Option<i64>,
    pub pause_count: i32,
    pub switch_count: i32,
    pub retry_count: i32,
    pub hint_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_loss_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_density: Option<f64>,
    #[serde(default)]
    pub is_quit: bool,
    pub timestamp: i64,
}

impl Default for RawEvent {
    fn default() -> Self {
        Self {
            word_id: None,
            is_correct: true,
            response_time_ms: 3000,
            dwell_time_ms: None,
            pause_count: 0,
            switch_count: 0,
            retry_count: 0,
            hint_used: false,
            focus_loss_ms: None,
            interaction_density: None,
            is_quit: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl RawEvent {
    /// Boundary validation: all numeric telemetry must be finite and
    /// non-negative where a count or duration is expected.
    pub fn validate(&self) -> EngineResult<()> {
        if self.timestamp <= 0 {
            return Err(EngineError::InvalidInput(
                "timestamp must be a positive epoch timestamp".into(),
            ));
        }
        if self.response_time_ms < 0 {
            return Err(EngineError::InvalidInput(
                "responseTimeMs must be non-negative".into(),
            ));
        }
        if self.pause_count < 0 || self.switch_count < 0 || self.retry_count < 0 {
            return Err(EngineError::InvalidInput(
                "interaction counts must be non-negative".into(),
            ));
        }
        if let Some(density) = self.interaction_density {
            if !density.is_finite() {
                return Err(EngineError::InvalidInput(
                    "interactionDensity must be finite".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Current feature schema. Bump when the layout of
/// `FeatureBuilder::build` output changes; older vectors stay decodable
/// but are rejected by policies trained on a different dimensionality.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    FEATURE_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub values: Vec<f64>,
    pub labels: Vec<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub ts: i64,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>, labels: Vec<String>, ts: i64) -> Self {
        Self {
            values,
            labels,
            schema_version: FEATURE_SCHEMA_VERSION,
            ts,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// Pedagogical action emitted per decision and consumed by the external
/// word-selection and scheduling logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub interval_scale: f64,
    pub new_ratio: f64,
    pub difficulty: DifficultyLevel,
    pub batch_size: i32,
    pub hint_level: i32,
}

impl Default for Action {
    fn default() -> Self {
        Self {
            interval_scale: 1.0,
            new_ratio: 0.2,
            difficulty: DifficultyLevel::Mid,
            batch_size: 8,
            hint_level: 1,
        }
    }
}

impl Action {
    pub fn for_archetype(archetype: UserArchetype) -> Self {
        match archetype {
            UserArchetype::Fast => Self {
                interval_scale: 0.8,
                new_ratio: 0.3,
                difficulty: DifficultyLevel::Hard,
                batch_size: 12,
                hint_level: 0,
            },
            UserArchetype::Stable => Self::default(),
            UserArchetype::Cautious => Self {
                interval_scale: 1.2,
                new_ratio: 0.1,
                difficulty: DifficultyLevel::Easy,
                batch_size: 5,
                hint_level: 2,
            },
        }
    }

    /// Stable identity used to key per-arm bandit parameters.
    pub fn arm_key(&self) -> String {
        format!(
            "{}_{:.2}_{}_{}_{:.1}",
            self.difficulty.as_str(),
            self.new_ratio,
            self.batch_size,
            self.hint_level,
            self.interval_scale
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub value: f64,
    pub reason: String,
    pub ts: i64,
}

impl Reward {
    pub fn new(value: f64, reason: impl Into<String>, ts: i64) -> Self {
        Self {
            value: value.clamp(-1.0, 1.0),
            reason: reason.into(),
            ts,
        }
    }
}

/// Caller-supplied context that is not derivable from the event itself.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rt_cv: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study_duration_minutes: Option<f64>,
    /// Predicted recall probability at review time, from the caller's
    /// scheduling model. Drives the forgetting-curve reward term.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_recall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub state: UserState,
    pub action: Action,
    pub reward: Reward,
    pub feature_vector: FeatureVector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<crate::modeling::trend::TrendReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cold_start_phase: Option<ColdStartPhase>,
    pub delayed_reward_id: u64,
    pub elapsed_ms: u64,
}

// ============================================
// Model version metadata
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Draft,
    Active,
    Deprecated,
    Archived,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Archived => "archived",
        }
    }
}

/// Metadata for a trained policy snapshot. Status moves only through the
/// explicit transition methods; rollout bookkeeping consumes this together
/// with the causal evaluator's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersion {
    pub version: String,
    pub params: serde_json::Value,
    pub metrics: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub status: ModelStatus,
    pub created_at: i64,
}

impl ModelVersion {
    pub fn draft(version: impl Into<String>, params: serde_json::Value, created_at: i64) -> Self {
        Self {
            version: version.into(),
            params,
            metrics: HashMap::new(),
            parent_id: None,
            status: ModelStatus::Draft,
            created_at,
        }
    }

    pub fn promote(&mut self) -> EngineResult<()> {
        match self.status {
            ModelStatus::Draft => {
                self.status = ModelStatus::Active;
                Ok(())
            }
            other => Err(EngineError::InvalidInput(format!(
                "cannot promote a {} model version",
                other.as_str()
            ))),
        }
    }

    pub fn deprecate(&mut self) -> EngineResult<()> {
        match self.status {
            ModelStatus::Active => {
                self.status = ModelStatus::Deprecated;
                Ok(())
            }
            other => Err(EngineError::InvalidInput(format!(
                "cannot deprecate a {} model version",
                other.as_str()
            ))),
        }
    }

    pub fn archive(&mut self) -> EngineResult<()> {
        match self.status {
            ModelStatus::Draft | ModelStatus::Deprecated => {
                self.status = ModelStatus::Archived;
                Ok(())
            }
            other => Err(EngineError::InvalidInput(format!(
                "cannot archive a {} model version",
                other.as_str()
            ))),
        }
    }
}
