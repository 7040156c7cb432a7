//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `replay`  | `Replay`         |
//! | `check`   | `Check`          |
//! | `config`  | `Config`         |

pub mod check;
pub mod config;
pub mod replay;

use std::path::Path;

use anyhow::{Context, Result};
use stagegate::config::{EngineConfig, StagegateToml};

pub use check::{CheckArgs, cmd_check};
pub use config::cmd_config;
pub use replay::cmd_replay;

/// Load the file layer, falling back to defaults when the file is absent.
pub fn load_toml(config_path: &Path) -> Result<StagegateToml> {
    if config_path.exists() {
        StagegateToml::load(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))
    } else {
        Ok(StagegateToml::default())
    }
}

/// File layer plus `STAGEGATE_*` overrides.
pub fn load_engine_config(config_path: &Path) -> Result<EngineConfig> {
    let toml = load_toml(config_path)?;
    EngineConfig::resolve(&toml).context("Invalid environment override")
}
