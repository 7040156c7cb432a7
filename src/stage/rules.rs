//! Transition validation rules.
//!
//! `evaluate` is a pure function of the current phase, the requested phase,
//! the recent history and the clock. Rules are checked in a fixed order and
//! the first one that matches decides.

use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::history::StageHistory;
use crate::phase::Phase;

/// Default lookback for pattern-cycle detection.
pub const DEFAULT_CYCLE_WINDOW: Duration = Duration::from_secs(3);
/// Default lookback for the repetition throttle.
pub const DEFAULT_REPETITION_WINDOW: Duration = Duration::from_secs(2);
/// Entries of the same phase within the repetition window that trip the throttle.
pub const DEFAULT_REPETITION_LIMIT: usize = 3;

/// Tunables for the heuristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub cycle_window: Duration,
    pub repetition_window: Duration,
    pub repetition_limit: usize,
    /// Testing escape hatch: allow everything
    pub debug_override: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            cycle_window: DEFAULT_CYCLE_WINDOW,
            repetition_window: DEFAULT_REPETITION_WINDOW,
            repetition_limit: DEFAULT_REPETITION_LIMIT,
            debug_override: false,
        }
    }
}

/// A single transition request as seen by the rules.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRequest {
    pub current: Phase,
    pub target: Phase,
    /// Set by authorization-expired signals to allow the regression to AUTHENTICATION
    pub auth_failure: bool,
    /// Whether the session has ever been in a phase other than INITIAL/AUTHENTICATION
    pub reached_beyond_auth: bool,
}

impl TransitionRequest {
    pub fn new(current: Phase, target: Phase) -> Self {
        Self {
            current,
            target,
            auth_failure: false,
            reached_beyond_auth: false,
        }
    }

    pub fn with_auth_failure(mut self, auth_failure: bool) -> Self {
        self.auth_failure = auth_failure;
        self
    }

    pub fn with_reached_beyond_auth(mut self, reached: bool) -> Self {
        self.reached_beyond_auth = reached;
        self
    }
}

/// The rule that decided a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionRule {
    DebugOverride,
    ErrorChannelGuard,
    ErrorRecovery,
    AuthFastPath,
    InitialBoundary,
    PatternCycle,
    RegressionGuard,
    RepetitionThrottle,
    NoOpGuard,
    Default,
}

/// Why a request was turned down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("ERROR is entered only through the error channel")]
    ErrorChannelOnly,

    #[error("INITIAL cannot transition to itself")]
    InitialSelfLoop,

    #[error("cycle detected between {}", format_members(.members))]
    CycleDetected { members: Vec<Phase> },

    #[error("Regression to AUTHENTICATION after higher stages is not allowed")]
    RegressionToAuthentication,

    #[error("Too many rapid changes to the same stage ({count} within the window), potential cycle detected")]
    RapidRepetition { count: usize },

    #[error("Stage is already set to this value")]
    AlreadySet,
}

fn format_members(members: &[Phase]) -> String {
    members
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of a transition request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDecision {
    pub allowed: bool,
    pub rule: TransitionRule,
    reason: Option<RejectReason>,
}

impl TransitionDecision {
    pub fn allow(rule: TransitionRule) -> Self {
        Self {
            allowed: true,
            rule,
            reason: None,
        }
    }

    pub fn reject(rule: TransitionRule, reason: RejectReason) -> Self {
        Self {
            allowed: false,
            rule,
            reason: Some(reason),
        }
    }

    /// Typed rejection reason, `None` when allowed.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        self.reason.as_ref()
    }

    /// Human-readable reason, `None` when allowed.
    pub fn reason(&self) -> Option<String> {
        self.reason.as_ref().map(|r| r.to_string())
    }

    /// Check if the request was rejected by the cycle heuristics.
    pub fn is_cycle_rejection(&self) -> bool {
        matches!(
            self.reason,
            Some(RejectReason::CycleDetected { .. } | RejectReason::RapidRepetition { .. })
        )
    }
}

/// A repeating alternation found in recent history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCycle {
    /// Distinct phases taking part, in pipeline order
    pub members: Vec<Phase>,
    /// Length of the repeating unit (2 or 3)
    pub period: usize,
}

impl DetectedCycle {
    /// Check if the cycle involves the pre-content phases, which makes
    /// STATIC_CONTENT the only way out.
    pub fn touches_pre_content(&self) -> bool {
        self.members.iter().any(|p| p.is_pre_content())
    }
}

/// Scan the recent tail of the history for A-B-A-B or A-B-C-A-B-C patterns.
pub fn detect_cycle(history: &StageHistory, now: Instant, window: Duration) -> Option<DetectedCycle> {
    let recent = history.recent_phases(now, window);

    if let [.., a, b, c, d] = recent.as_slice()
        && a == c
        && b == d
        && a != b
    {
        return Some(cycle_of(&[*a, *b], 2));
    }

    if let [.., a, b, c, d, e, f] = recent.as_slice()
        && a == d
        && b == e
        && c == f
        && !(a == b && b == c)
    {
        return Some(cycle_of(&[*a, *b, *c], 3));
    }

    None
}

fn cycle_of(phases: &[Phase], period: usize) -> DetectedCycle {
    let members: BTreeSet<usize> = phases
        .iter()
        .map(|p| Phase::ALL.iter().position(|q| q == p).unwrap_or(usize::MAX))
        .collect();
    DetectedCycle {
        members: members
            .into_iter()
            .filter_map(|i| Phase::ALL.get(i).copied())
            .collect(),
        period,
    }
}

/// Decide whether `request` may be applied.
pub fn evaluate(
    request: &TransitionRequest,
    history: &StageHistory,
    policy: &TransitionPolicy,
    now: Instant,
) -> TransitionDecision {
    let TransitionRequest {
        current, target, ..
    } = *request;

    if policy.debug_override {
        return TransitionDecision::allow(TransitionRule::DebugOverride);
    }

    if current == Phase::Error && target == Phase::Authentication {
        return TransitionDecision::allow(TransitionRule::ErrorRecovery);
    }

    if current == Phase::Authentication && target == Phase::StaticContent {
        return TransitionDecision::allow(TransitionRule::AuthFastPath);
    }

    match (current == Phase::Initial, target == Phase::Initial) {
        (true, true) => {
            return TransitionDecision::reject(
                TransitionRule::InitialBoundary,
                RejectReason::InitialSelfLoop,
            );
        }
        (true, false) | (false, true) => {
            return TransitionDecision::allow(TransitionRule::InitialBoundary);
        }
        (false, false) => {}
    }

    if let Some(cycle) = detect_cycle(history, now, policy.cycle_window) {
        if cycle.touches_pre_content() && target == Phase::StaticContent {
            return TransitionDecision::allow(TransitionRule::PatternCycle);
        }
        return TransitionDecision::reject(
            TransitionRule::PatternCycle,
            RejectReason::CycleDetected {
                members: cycle.members,
            },
        );
    }

    if target == Phase::Authentication && request.reached_beyond_auth {
        if request.auth_failure {
            return TransitionDecision::allow(TransitionRule::RegressionGuard);
        }
        return TransitionDecision::reject(
            TransitionRule::RegressionGuard,
            RejectReason::RegressionToAuthentication,
        );
    }

    let count = history.count_recent(target, now, policy.repetition_window);
    if count >= policy.repetition_limit {
        return TransitionDecision::reject(
            TransitionRule::RepetitionThrottle,
            RejectReason::RapidRepetition { count },
        );
    }

    if target == current {
        return TransitionDecision::reject(TransitionRule::NoOpGuard, RejectReason::AlreadySet);
    }

    TransitionDecision::allow(TransitionRule::Default)
}
