//! Progress meter: a 0-100 value for UI progress bars, independent of phase.

use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressMeter {
    value: u8,
}

impl ProgressMeter {
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Store `value` clamped to 0..=100. Returns the stored value.
    pub fn set(&mut self, value: i64) -> u8 {
        let clamped = value.clamp(0, 100) as u8;
        if i64::from(clamped) != value {
            warn!(original = value, adjusted = clamped, "Adjusted invalid progress value");
        }
        if clamped != self.value {
            debug!(value = clamped, "Setting progress");
            self.value = clamped;
        }
        clamped
    }
}
