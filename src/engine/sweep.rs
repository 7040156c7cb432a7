//! Consistency sweep: heals state combinations that should not persist.

use serde::Serialize;
use tracing::{info, warn};

use super::EngineState;
use crate::phase::Phase;

/// One inconsistency the sweep found and corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    /// A flag is raised but nothing is tracked as in flight
    OrphanedFlags { phase: Phase },
    /// A flag is still raised after the pipeline completed
    FlagsAfterCompletion,
    /// ERROR with no message to show
    ErrorPhaseWithoutMessage,
    /// Content phase with nothing loading; the pipeline is finished
    StalledContent { phase: Phase },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub phase_before: Phase,
    pub phase_after: Phase,
    pub corrections: Vec<Inconsistency>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty()
    }
}

impl EngineState {
    /// Apply the four corrections in order, each against the state the
    /// previous one left behind.
    pub(super) fn sweep(&mut self, tracked_operations: usize) -> SweepReport {
        let phase_before = self.registry.current();
        let mut corrections = Vec::new();

        let phase = self.registry.current();
        if self.flags.any() && tracked_operations == 0 && !phase.is_pre_content() {
            warn!(
                phase = %phase,
                static_loading = self.flags.is_static_loading(),
                dynamic_loading = self.flags.is_dynamic_loading(),
                "Loading flags set with no tracked operations, resetting"
            );
            self.flags.reset();
            corrections.push(Inconsistency::OrphanedFlags { phase });
        }

        if self.registry.current() == Phase::Completed && self.flags.any() {
            warn!("Loading flags still set after completion, resetting");
            self.flags.reset();
            corrections.push(Inconsistency::FlagsAfterCompletion);
        }

        if self.registry.current() == Phase::Error && !self.error.has_error() {
            warn!("ERROR phase without an error message, returning to authentication");
            self.request(Phase::Authentication, false);
            corrections.push(Inconsistency::ErrorPhaseWithoutMessage);
        }

        let phase = self.registry.current();
        if phase.is_dynamic() && self.flags.active_requests() == 0 && !self.flags.any() {
            info!(phase = %phase, "Nothing left loading, completing");
            self.request(Phase::Completed, false);
            corrections.push(Inconsistency::StalledContent { phase });
        }

        SweepReport {
            phase_before,
            phase_after: self.registry.current(),
            corrections,
        }
    }
}
