pub mod admission;
pub mod config;
pub mod engine;
pub mod error_channel;
pub mod errors;
pub mod flags;
pub mod logging;
pub mod phase;
pub mod progress;
pub mod signals;
pub mod stage;

pub use engine::{EngineSnapshot, LoadingEngine, OperationGuard, OrchestratorHandle, SweepReport};
pub use phase::Phase;
pub use stage::{StageChange, TransitionDecision};
