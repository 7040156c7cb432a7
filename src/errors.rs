//! Typed error hierarchy for stagegate.
//!
//! The engine itself never returns errors to its callers: invalid requests
//! degrade to logged no-ops. Errors only exist at the fallible edges:
//! - `ConfigError`: reading, parsing and writing `stagegate.toml`
//! - `ScriptError`: loading replay scripts

use thiserror::Error;

/// Errors from the configuration layer.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse stagegate.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize stagegate.toml: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from loading a replay script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse script: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Script has no steps")]
    Empty,

    #[error("Invalid duration '{value}' in step {step}: expected e.g. \"500ms\", \"5s\" or a number of milliseconds")]
    InvalidDuration { step: usize, value: String },
}
