//! Single-request rule evaluation: `stagegate check`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use stagegate::phase::Phase;
use stagegate::stage::{
    StageHistory, TransitionRecord, TransitionRequest, detect_cycle, evaluate,
};
use tokio::time::Instant;

use super::load_engine_config;
use crate::OutputFormat;

/// Spacing between the synthetic history entries.
const HISTORY_STEP: Duration = Duration::from_millis(100);

pub struct CheckArgs<'a> {
    pub current: &'a str,
    pub target: &'a str,
    pub history: &'a [String],
    pub auth_failure: bool,
    pub debug: bool,
    pub reached_beyond_auth: bool,
    pub format: OutputFormat,
}

pub fn cmd_check(config_path: &Path, args: &CheckArgs<'_>) -> Result<()> {
    let config = load_engine_config(config_path)?;

    let current: Phase = args
        .current
        .parse()
        .with_context(|| format!("Invalid --current '{}'", args.current))?;
    let target: Phase = args
        .target
        .parse()
        .with_context(|| format!("Invalid --target '{}'", args.target))?;
    let phases = args
        .history
        .iter()
        .map(|p| {
            p.parse::<Phase>()
                .with_context(|| format!("Invalid --history entry '{p}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    // Entries are HISTORY_STEP apart; the newest one is "now"
    let base = Instant::now();
    let records = phases
        .iter()
        .enumerate()
        .map(|(i, phase)| TransitionRecord::new(*phase, base + HISTORY_STEP * i as u32));
    let history = StageHistory::from_records(config.history_capacity, records);
    let now = base + HISTORY_STEP * phases.len().saturating_sub(1) as u32;

    let reached_beyond_auth = args.reached_beyond_auth
        || !current.is_pre_content()
        || phases.iter().any(|p| !p.is_pre_content());

    let mut policy = config.policy.clone();
    policy.debug_override |= args.debug;

    let request = TransitionRequest::new(current, target)
        .with_auth_failure(args.auth_failure)
        .with_reached_beyond_auth(reached_beyond_auth);
    let decision = evaluate(&request, &history, &policy, now);
    let cycle = detect_cycle(&history, now, policy.cycle_window);

    match args.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "current": current,
                "target": target,
                "allowed": decision.allowed,
                "rule": decision.rule,
                "reason": decision.reason(),
                "cycle": cycle.map(|c| c.members),
            });
            println!("{}", serde_json::to_string(&output)?);
        }
        OutputFormat::Text => {
            println!();
            println!("{} -> {}", current, target);
            if let Some(cycle) = &cycle {
                let members: Vec<&str> = cycle.members.iter().map(|p| p.as_str()).collect();
                println!("  Cycle in history: {}", members.join(", "));
            }
            let rule = serde_json::to_value(decision.rule)?;
            let rule = rule.as_str().unwrap_or_default().to_string();
            if decision.allowed {
                println!("  {} (rule: {})", style("ALLOWED").green().bold(), rule);
            } else {
                println!("  {} (rule: {})", style("REJECTED").red().bold(), rule);
                if let Some(reason) = decision.reason() {
                    println!("  Reason: {}", reason);
                }
            }
            println!();
        }
    }

    Ok(())
}
