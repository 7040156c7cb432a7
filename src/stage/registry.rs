//! The stage registry: current phase, history and change notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::history::{StageHistory, TransitionRecord};
use super::rules::{
    RejectReason, TransitionDecision, TransitionPolicy, TransitionRequest, TransitionRule,
    evaluate,
};
use crate::phase::Phase;

/// Notification emitted once per accepted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageChange {
    /// Session the transition belongs to
    pub session: Uuid,
    /// Strictly increasing per accepted transition
    pub seq: u64,
    pub from: Phase,
    pub to: Phase,
    /// True when the error channel or the static content timeout forced
    /// the transition past validation
    pub forced: bool,
    pub at: DateTime<Utc>,
}

/// Where the registry currently is, with enough detail to arm timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseEntry {
    pub phase: Phase,
    /// Sequence number of the transition that entered the phase (0 at start)
    pub seq: u64,
    pub entered_at: Instant,
}

/// Holds the current phase and validates every change to it.
pub struct StageRegistry {
    session: Uuid,
    current: Phase,
    seq: u64,
    entered_at: Instant,
    history: StageHistory,
    reached_beyond_auth: bool,
    auth_checked: bool,
    policy: TransitionPolicy,
    notifier: broadcast::Sender<StageChange>,
}

impl StageRegistry {
    /// Create a registry at `INITIAL`.
    pub fn new(
        session: Uuid,
        policy: TransitionPolicy,
        history_capacity: usize,
        notifier: broadcast::Sender<StageChange>,
    ) -> Self {
        Self {
            session,
            current: Phase::Initial,
            seq: 0,
            entered_at: Instant::now(),
            history: StageHistory::with_capacity(history_capacity),
            reached_beyond_auth: false,
            auth_checked: false,
            policy,
            notifier,
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn entry(&self) -> PhaseEntry {
        PhaseEntry {
            phase: self.current,
            seq: self.seq,
            entered_at: self.entered_at,
        }
    }

    pub fn history(&self) -> &StageHistory {
        &self.history
    }

    pub fn is_auth_checked(&self) -> bool {
        self.auth_checked
    }

    /// One-shot: once set it stays set for the session.
    pub fn mark_auth_checked(&mut self) {
        if !self.auth_checked {
            info!(session = %self.session, "Auth check marked complete");
            self.auth_checked = true;
        }
    }

    pub fn debug_override(&self) -> bool {
        self.policy.debug_override
    }

    pub fn set_debug_override(&mut self, enabled: bool) {
        if self.policy.debug_override != enabled {
            warn!(session = %self.session, enabled, "Transition debug override changed");
            self.policy.debug_override = enabled;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageChange> {
        self.notifier.subscribe()
    }

    /// Validate and, if allowed, apply a transition.
    pub fn request(&mut self, target: Phase, auth_failure: bool) -> TransitionDecision {
        let decision = if target == Phase::Error && !self.policy.debug_override {
            TransitionDecision::reject(
                TransitionRule::ErrorChannelGuard,
                RejectReason::ErrorChannelOnly,
            )
        } else {
            let request = TransitionRequest::new(self.current, target)
                .with_auth_failure(auth_failure)
                .with_reached_beyond_auth(self.reached_beyond_auth);
            evaluate(&request, &self.history, &self.policy, Instant::now())
        };

        if decision.allowed {
            self.apply(target, false);
        } else {
            self.log_rejection(target, &decision);
        }
        decision
    }

    /// Apply a transition without validation. Only the error channel and the
    /// static content timeout do this.
    pub(crate) fn force(&mut self, target: Phase) -> StageChange {
        self.apply(target, true)
    }

    fn apply(&mut self, target: Phase, forced: bool) -> StageChange {
        let now = Instant::now();
        let from = self.current;

        self.current = target;
        self.seq += 1;
        self.entered_at = now;
        self.history.push(TransitionRecord::new(target, now));
        if !target.is_pre_content() {
            self.reached_beyond_auth = true;
        }

        info!(
            session = %self.session,
            seq = self.seq,
            from = %from,
            to = %target,
            forced,
            "Changing loading stage"
        );

        let change = StageChange {
            session: self.session,
            seq: self.seq,
            from,
            to: target,
            forced,
            at: Utc::now(),
        };
        // No subscribers is fine
        let _ = self.notifier.send(change.clone());
        change
    }

    fn log_rejection(&self, target: Phase, decision: &TransitionDecision) {
        let reason = decision.reason().unwrap_or_default();
        let recent: Vec<Phase> = self.history.iter().rev().take(3).map(|r| r.phase).collect();
        if decision.rule == TransitionRule::NoOpGuard {
            debug!(
                session = %self.session,
                current = %self.current,
                attempted = %target,
                reason = %reason,
                "Stage change not allowed"
            );
        } else {
            warn!(
                session = %self.session,
                current = %self.current,
                attempted = %target,
                rule = ?decision.rule,
                reason = %reason,
                recent = ?recent,
                "Stage change not allowed"
            );
        }
    }
}
