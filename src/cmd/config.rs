//! Configuration view, creation and validation: `stagegate config`.

use std::path::Path;

use anyhow::{Context, Result};
use stagegate::config::{EngineConfig, StagegateToml};

use super::super::ConfigCommands;
use super::load_toml;

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => show(config_path),
        Some(ConfigCommands::Validate) => validate(config_path),
        Some(ConfigCommands::Init) => init(config_path),
    }
}

fn show(config_path: &Path) -> Result<()> {
    println!();
    println!("Stagegate Configuration");
    println!("=======================");
    println!();

    if config_path.exists() {
        println!("Config file: {}", config_path.display());
    } else {
        println!("No stagegate.toml found at {}", config_path.display());
        println!("Using default configuration.");
    }
    println!();

    let toml = load_toml(config_path)?;
    let rendered = toml::to_string_pretty(&toml).context("Failed to render configuration")?;
    println!("{}", rendered.trim_end());
    println!();

    println!("Effective values (with env overrides):");
    let config = EngineConfig::resolve(&toml).context("Invalid environment override")?;
    println!("  sweep_interval = {:?}", config.sweep_interval);
    println!("  static_content_timeout = {:?}", config.static_content_timeout);
    println!("  error_recovery_timeout = {:?}", config.error_recovery_timeout);
    println!("  debug_override = {}", config.policy.debug_override);
    println!();

    if !config_path.exists() {
        println!("Run 'stagegate config init' to create a stagegate.toml file.");
        println!();
    }
    Ok(())
}

fn validate(config_path: &Path) -> Result<()> {
    println!();
    println!("Validating configuration...");
    println!();

    if !config_path.exists() {
        println!("No stagegate.toml found. Using defaults (valid).");
        return Ok(());
    }

    let toml = load_toml(config_path)?;
    let warnings = toml.validate();

    if warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        println!("Configuration warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(())
}

fn init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("stagegate.toml already exists at {}", config_path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    StagegateToml::default()
        .save(config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Created stagegate.toml at {}", config_path.display());
    println!();
    println!("You can now customize:");
    println!("  - [timing] sweep interval and phase timeouts");
    println!("  - [transitions] history size and cycle heuristics");
    println!("  - [routes] fast-path prefixes");
    println!();
    Ok(())
}
