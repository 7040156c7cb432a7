//! Signal and script step types.

use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// An external signal the engine reacts to.
///
/// These come from collaborators outside the loading pipeline: the auth
/// check, the fetch layer seeing a 401, or any component reporting a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Signal {
    /// The initial auth check finished
    AuthCheckComplete { is_authenticated: bool },
    /// A request came back unauthorized
    Unauthorized,
    /// A component failed in a way the user should see
    LoadingError { message: String },
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::AuthCheckComplete { .. } => "auth_check_complete",
            Signal::Unauthorized => "unauthorized",
            Signal::LoadingError { .. } => "loading_error",
        }
    }
}

/// Duration as written in a script: `"250ms"`, `"5s"` or bare milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Millis(u64),
    Text(String),
}

/// One step of a replay script, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep {
    AuthCheckComplete {
        is_authenticated: bool,
    },
    Unauthorized,
    LoadingError {
        message: String,
    },
    StaticLoading {
        loading: bool,
    },
    DynamicLoading {
        loading: bool,
    },
    ResetLoading,
    SetError {
        #[serde(default)]
        message: Option<String>,
    },
    ClearError,
    Progress {
        value: i64,
    },
    Route {
        path: String,
    },
    Transition {
        phase: Phase,
        #[serde(default)]
        auth_failure: bool,
    },
    BeginSession,
    Sweep,
    Wait {
        duration: DurationSpec,
    },
}

impl ScriptStep {
    /// The signal this step carries, for the three signal ops.
    pub fn as_signal(&self) -> Option<Signal> {
        match self {
            ScriptStep::AuthCheckComplete { is_authenticated } => Some(Signal::AuthCheckComplete {
                is_authenticated: *is_authenticated,
            }),
            ScriptStep::Unauthorized => Some(Signal::Unauthorized),
            ScriptStep::LoadingError { message } => Some(Signal::LoadingError {
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// A parsed replay script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Free-form label shown by `replay`
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<ScriptStep>,
}
