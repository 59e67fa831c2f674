pub mod attention;
pub mod cognitive;
pub mod fatigue;
pub mod motivation;
pub mod trend;

pub use attention::{AttentionMonitor, AttentionSignals};
pub use cognitive::{CognitiveInput, CognitiveProfiler};
pub use fatigue::{recovered_fatigue, required_break_seconds, FatigueEstimator, FatigueSignals};
pub use motivation::{MotivationEvent, MotivationTracker};
pub use trend::{AbilitySample, TrendAnalyzer, TrendMethod, TrendReport};
