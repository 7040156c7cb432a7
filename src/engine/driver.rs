//! Background driver: periodic sweep plus the STATIC_CONTENT and ERROR timers.
//!
//! One task per session. It follows the notification channel to re-arm its
//! single timer cell after every accepted transition; a timer only acts if
//! the phase entry that armed it is still the current one.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::LoadingEngine;
use crate::config::EngineConfig;
use crate::phase::Phase;
use crate::stage::PhaseEntry;

/// Handle to a running orchestrator. Dropping it stops the task.
#[derive(Debug)]
pub struct OrchestratorHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl OrchestratorHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            warn!(error = %e, "Orchestrator task panicked");
        }
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    AdvanceToDynamic,
    RecoverFromError,
}

/// The one pending timer, tied to the phase entry that armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArmedTimer {
    seq: u64,
    deadline: Instant,
    action: TimerAction,
}

impl ArmedTimer {
    fn for_entry(entry: PhaseEntry, config: &EngineConfig) -> Option<Self> {
        let (action, after) = match entry.phase {
            Phase::StaticContent => (TimerAction::AdvanceToDynamic, config.static_content_timeout),
            Phase::Error => (TimerAction::RecoverFromError, config.error_recovery_timeout),
            _ => return None,
        };
        Some(Self {
            seq: entry.seq,
            deadline: entry.entered_at + after,
            action,
        })
    }
}

pub(super) fn spawn(engine: LoadingEngine) -> OrchestratorHandle {
    let token = CancellationToken::new();
    let task = tokio::spawn(run(engine, token.clone()));
    OrchestratorHandle {
        token,
        task: Some(task),
    }
}

async fn run(engine: LoadingEngine, token: CancellationToken) {
    let config = engine.config().clone();
    let (mut changes, entry) = engine.subscribe_with_entry();
    let mut timer = ArmedTimer::for_entry(entry, &config);

    let period = config.sweep_interval.max(Duration::from_millis(1));
    let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        session = %engine.session_id(),
        sweep_interval_ms = period.as_millis() as u64,
        "Orchestrator started"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            _ = sweep.tick() => {
                let report = engine.sweep();
                if !report.is_clean() {
                    debug!(corrections = report.corrections.len(), "Sweep applied corrections");
                }
            }

            result = changes.recv() => {
                match result {
                    Ok(change) => {
                        debug!(seq = change.seq, to = %change.to, "Re-arming phase timer");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Orchestrator lagged behind stage changes, resynchronizing");
                    }
                    Err(RecvError::Closed) => break,
                }
                timer = ArmedTimer::for_entry(engine.phase_entry(), &config);
            }

            _ = wait_for(timer) => {
                // One shot per entry; a resulting transition re-arms via `changes`
                if let Some(fired) = timer.take() {
                    fire(&engine, fired);
                }
            }
        }
    }

    info!(session = %engine.session_id(), "Orchestrator stopped");
}

async fn wait_for(timer: Option<ArmedTimer>) {
    match timer {
        Some(timer) => tokio::time::sleep_until(timer.deadline).await,
        None => std::future::pending().await,
    }
}

fn fire(engine: &LoadingEngine, timer: ArmedTimer) {
    let mut state = engine.lock();
    let entry = state.registry.entry();
    if entry.seq != timer.seq {
        debug!(armed_seq = timer.seq, current_seq = entry.seq, "Discarding stale phase timer");
        return;
    }

    match timer.action {
        TimerAction::AdvanceToDynamic => {
            info!("Static content timed out, forcing dynamic content");
            state.registry.force(Phase::DynamicContent);
        }
        TimerAction::RecoverFromError => {
            info!("Error recovery timeout reached");
            state.recover_from_error();
        }
    }
}
