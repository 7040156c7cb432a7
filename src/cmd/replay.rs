//! Script replay: `stagegate replay`.
//!
//! Runs every step against a fresh engine with the orchestrator running, so
//! timeouts and sweeps fire during `wait` steps just as they would live.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use stagegate::engine::{EngineSnapshot, LoadingEngine};
use stagegate::phase::Phase;
use stagegate::signals::{Script, ScriptStep, load_script, parse_duration};
use stagegate::stage::StageChange;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::load_engine_config;
use crate::OutputFormat;

/// Where replay output goes: styled lines plus a progress bar, or JSON lines.
#[derive(Clone)]
struct Reporter {
    format: OutputFormat,
    bar: Option<ProgressBar>,
}

impl Reporter {
    fn new(format: OutputFormat) -> Result<Self> {
        let bar = match format {
            OutputFormat::Json => None,
            OutputFormat::Text => {
                let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                        .context("Invalid progress bar template")?
                        .progress_chars("█▓▒░"),
                );
                bar.set_prefix("Progress");
                Some(bar)
            }
        };
        Ok(Self { format, bar })
    }

    fn line(&self, text: String) {
        match &self.bar {
            Some(bar) if !bar.is_hidden() => bar.println(text),
            _ => println!("{}", text),
        }
    }

    fn header(&self, script: &Script) {
        if self.format == OutputFormat::Text {
            let name = script.name.as_deref().unwrap_or("unnamed script");
            self.line(format!(
                "{} {} ({} steps)",
                style("Replaying").bold(),
                name,
                script.steps.len()
            ));
        }
    }

    fn step(&self, index: usize, step: &ScriptStep) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({"event": "step", "index": index, "step": step});
                println!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Text => {
                let op = serde_json::to_value(step)?;
                let op = op["op"].as_str().unwrap_or("?").to_string();
                self.line(format!("  {} {}", style(format!("#{index}")).dim(), op));
            }
        }
        Ok(())
    }

    fn transition(&self, change: &StageChange) {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({"event": "transition", "change": change});
                if let Ok(text) = serde_json::to_string(&output) {
                    println!("{}", text);
                }
            }
            OutputFormat::Text => {
                let to = match change.to {
                    Phase::Error => style(change.to.as_str()).red().bold(),
                    Phase::Completed => style(change.to.as_str()).green().bold(),
                    _ => style(change.to.as_str()).cyan().bold(),
                };
                let forced = if change.forced { " (forced)" } else { "" };
                self.line(format!(
                    "    {} {} -> {}{}",
                    style(format!("[{}]", change.seq)).dim(),
                    change.from,
                    to,
                    forced
                ));
            }
        }
    }

    fn lagged(&self, missed: u64) {
        if self.format == OutputFormat::Text {
            self.line(format!(
                "    {}",
                style(format!("... {missed} transitions not shown")).yellow()
            ));
        }
    }

    fn progress(&self, value: u8) {
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(value));
        }
    }

    fn finish(&self, snapshot: &EngineSnapshot) -> Result<()> {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({"event": "snapshot", "snapshot": snapshot});
                println!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Text => {
                println!();
                println!("Final state");
                println!("  phase = {}", style(snapshot.phase).bold());
                println!("  transitions = {}", snapshot.transitions);
                println!(
                    "  static_loading = {}, dynamic_loading = {}, active_requests = {}",
                    snapshot.static_loading, snapshot.dynamic_loading, snapshot.active_requests
                );
                println!(
                    "  error = {}",
                    snapshot.error.as_deref().unwrap_or("none")
                );
                println!("  progress = {}%", snapshot.progress);
                println!("  auth_checked = {}", snapshot.auth_checked);
                println!("  route_class = {}", snapshot.route_class);
                println!();
            }
        }
        Ok(())
    }
}

pub async fn cmd_replay(
    config_path: &Path,
    script_path: &Path,
    format: OutputFormat,
    settle: &str,
) -> Result<()> {
    let settle = parse_duration(settle)
        .with_context(|| format!("Invalid --settle '{settle}': expected e.g. \"500ms\" or \"5s\""))?;
    let script = load_script(script_path)
        .with_context(|| format!("Failed to load script {}", script_path.display()))?;
    let config = load_engine_config(config_path)?;

    let engine = LoadingEngine::new(config);
    let reporter = Reporter::new(format)?;
    reporter.header(&script);

    let printer_token = CancellationToken::new();
    let printer = tokio::spawn(print_changes(
        engine.subscribe(),
        reporter.clone(),
        printer_token.clone(),
    ));
    let orchestrator = engine.spawn_orchestrator();

    for (index, step) in script.steps.iter().enumerate() {
        reporter.step(index + 1, step)?;
        run_step(&engine, step).await;
        reporter.progress(engine.progress());
    }

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    orchestrator.shutdown().await;
    printer_token.cancel();
    printer.await.context("Transition printer failed")?;

    reporter.finish(&engine.snapshot())
}

async fn run_step(engine: &LoadingEngine, step: &ScriptStep) {
    if let Some(signal) = step.as_signal() {
        engine.handle_signal(signal);
        return;
    }

    match step {
        ScriptStep::StaticLoading { loading } => engine.set_static_loading(*loading),
        ScriptStep::DynamicLoading { loading } => engine.set_dynamic_loading(*loading),
        ScriptStep::ResetLoading => engine.reset_loading(),
        ScriptStep::SetError { message } => engine.set_error(message.clone()),
        ScriptStep::ClearError => engine.clear_error(),
        ScriptStep::Progress { value } => {
            engine.set_progress(*value);
        }
        ScriptStep::Route { path } => engine.set_route(path.as_str()),
        ScriptStep::Transition {
            phase,
            auth_failure,
        } => {
            engine.request_transition_with(*phase, *auth_failure);
        }
        ScriptStep::BeginSession => {
            engine.begin_session();
        }
        ScriptStep::Sweep => {
            engine.sweep();
        }
        ScriptStep::Wait { duration } => {
            // Validated at load time
            let duration = duration.resolve().unwrap_or(Duration::ZERO);
            tokio::time::sleep(duration).await;
        }
        ScriptStep::AuthCheckComplete { .. }
        | ScriptStep::Unauthorized
        | ScriptStep::LoadingError { .. } => {}
    }
}

async fn print_changes(
    mut changes: broadcast::Receiver<StageChange>,
    reporter: Reporter,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            result = changes.recv() => match result {
                Ok(change) => reporter.transition(&change),
                Err(RecvError::Lagged(missed)) => reporter.lagged(missed),
                Err(RecvError::Closed) => break,
            },

            _ = token.cancelled() => {
                while let Ok(change) = changes.try_recv() {
                    reporter.transition(&change);
                }
                break;
            }
        }
    }
}
