pub mod causal;
pub mod config;
pub mod decision;
pub mod delayed;
pub mod engine;
pub mod error;
pub mod features;
pub mod linalg;
pub mod modeling;
pub mod reward;
pub mod types;

pub use causal::CausalEvaluator;
pub use config::EngineConfig;
pub use delayed::DelayedRewardAggregator;
pub use engine::AdaptiveEngine;
pub use error::EngineError;
#[allow(unused_imports)]
pub use types::*;
