use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(version, about = "Staged-loading orchestration engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to stagegate.toml (defaults to <project-dir>/stagegate.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a YAML or JSON script against a fresh engine
    Replay {
        /// Path to the script
        script: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Keep the orchestrator running this long after the last step (e.g. "6s")
        #[arg(long, default_value = "0ms")]
        settle: String,
    },
    /// Evaluate a single transition request against the validation rules
    Check {
        #[arg(long)]
        current: String,

        #[arg(long)]
        target: String,

        /// Recent phases, oldest first (comma-separated)
        #[arg(long, value_delimiter = ',')]
        history: Vec<String>,

        /// Treat the request as an auth failure
        #[arg(long)]
        auth_failure: bool,

        /// Enable the debug override
        #[arg(long)]
        debug: bool,

        /// The session already got past authentication
        #[arg(long)]
        reached_beyond_auth: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// View, create or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default stagegate.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let _log_guard = stagegate::logging::init(&stagegate::logging::LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir: cli.log_dir.as_deref(),
    })?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config_path = stagegate::config::config_path(cli.config.as_deref(), &project_dir);

    match &cli.command {
        Commands::Replay {
            script,
            format,
            settle,
        } => {
            cmd::cmd_replay(&config_path, script, *format, settle).await?;
        }
        Commands::Check {
            current,
            target,
            history,
            auth_failure,
            debug,
            reached_beyond_auth,
            format,
        } => {
            cmd::cmd_check(
                &config_path,
                &cmd::CheckArgs {
                    current,
                    target,
                    history,
                    auth_failure: *auth_failure,
                    debug: *debug,
                    reached_beyond_auth: *reached_beyond_auth,
                    format: *format,
                },
            )?;
        }
        Commands::Config { command } => cmd::cmd_config(&config_path, command.clone())?,
    }

    Ok(())
}
