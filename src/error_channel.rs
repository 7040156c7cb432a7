//! The single active application error.
//!
//! Holding a message means the pipeline is in ERROR. The engine keeps the two
//! in step: the message is only stored together with a forced transition into
//! ERROR, and it is dropped on every accepted transition out of ERROR.

use tracing::{error, info};

/// What a `set_error` call asks the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorUpdate {
    /// Same message as before, or clearing when nothing is set
    Unchanged,
    /// A new message was stored; force the pipeline into ERROR
    Raised,
    /// The message was cleared; restart the pipeline from AUTHENTICATION
    Cleared,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorState {
    message: Option<String>,
}

impl ErrorState {
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.message.is_some()
    }

    /// Store or clear the message. Empty and whitespace-only messages clear.
    pub fn set(&mut self, message: Option<String>) -> ErrorUpdate {
        let message = message.filter(|m| !m.trim().is_empty());

        match (message, self.message.is_some()) {
            (Some(new), _) if self.message.as_deref() == Some(new.as_str()) => ErrorUpdate::Unchanged,
            (Some(new), _) => {
                error!(error = %new, "Loading error occurred");
                self.message = Some(new);
                ErrorUpdate::Raised
            }
            (None, true) => {
                info!("Clearing loading error");
                self.message = None;
                ErrorUpdate::Cleared
            }
            (None, false) => ErrorUpdate::Unchanged,
        }
    }

    /// Drop the message without asking for a transition. Returns the old one.
    pub fn take(&mut self) -> Option<String> {
        self.message.take()
    }
}
