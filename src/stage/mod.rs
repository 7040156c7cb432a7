//! Stage registry: phase ownership, transition validation and history.

pub mod history;
pub mod registry;
pub mod rules;

pub use history::{StageHistory, TransitionRecord};
pub use registry::{PhaseEntry, StageChange, StageRegistry};
pub use rules::{
    DetectedCycle, RejectReason, TransitionDecision, TransitionPolicy, TransitionRequest,
    TransitionRule, detect_cycle, evaluate,
};
