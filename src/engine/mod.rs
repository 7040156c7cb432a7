//! The loading engine: one shared state per session and the handle every
//! collaborator calls into.
//!
//! All sub-states (stage registry, loading flags, error channel, progress)
//! sit behind a single mutex so each public call observes and mutates a
//! consistent picture. No method awaits while holding the lock, and nothing
//! here returns an error: invalid requests become logged no-ops.

mod driver;
mod sweep;
mod tracker;

pub use driver::OrchestratorHandle;
pub use sweep::{Inconsistency, SweepReport};
pub use tracker::{ActivityProbe, OperationGuard, OperationTracker};

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::admission;
use crate::config::EngineConfig;
use crate::error_channel::{ErrorState, ErrorUpdate};
use crate::flags::{self, LoadingFlags, RouteClass};
use crate::phase::Phase;
use crate::progress::ProgressMeter;
use crate::signals::Signal;
use crate::stage::{PhaseEntry, StageChange, StageRegistry, TransitionDecision};

/// Read-only view of the whole engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub session: Uuid,
    pub phase: Phase,
    /// Accepted transitions so far
    pub transitions: u64,
    pub static_loading: bool,
    pub dynamic_loading: bool,
    pub active_requests: usize,
    /// Live operation guards plus whatever the activity probe reports
    pub tracked_operations: usize,
    pub error: Option<String>,
    pub progress: u8,
    pub auth_checked: bool,
    pub route: Option<String>,
    pub route_class: RouteClass,
    pub debug_override: bool,
}

struct EngineState {
    registry: StageRegistry,
    flags: LoadingFlags,
    error: ErrorState,
    progress: ProgressMeter,
    route: Option<String>,
    route_class: RouteClass,
}

impl EngineState {
    /// Request a transition. Leaving ERROR drops the error message.
    fn request(&mut self, target: Phase, auth_failure: bool) -> TransitionDecision {
        let from = self.registry.current();
        let decision = self.registry.request(target, auth_failure);
        if decision.allowed && from == Phase::Error && target != Phase::Error {
            self.error.take();
        }
        decision
    }

    fn set_dynamic_loading(&mut self, loading: bool) {
        let derived = self.flags.record_dynamic(loading);
        if let Some(target) = flags::plan_dynamic(self.registry.current(), derived) {
            self.request(target, false);
        }
    }

    fn set_error(&mut self, message: Option<String>) {
        match self.error.set(message) {
            ErrorUpdate::Raised => {
                if self.registry.current() != Phase::Error {
                    self.registry.force(Phase::Error);
                }
            }
            ErrorUpdate::Cleared => {
                if self.registry.current() == Phase::Error {
                    self.request(Phase::Authentication, false);
                }
            }
            ErrorUpdate::Unchanged => {}
        }
    }

    fn recover_from_error(&mut self) -> bool {
        if self.registry.current() != Phase::Error {
            return false;
        }
        info!(
            error = self.error.message().unwrap_or_default(),
            "Recovering from error state"
        );
        self.error.take();
        self.flags.reset();
        self.request(Phase::Authentication, false);
        true
    }
}

struct Shared {
    state: Mutex<EngineState>,
    config: EngineConfig,
    session: Uuid,
    tracker: OperationTracker,
    probe: Option<Arc<dyn ActivityProbe>>,
}

/// Handle to one session's loading state. Cheap to clone.
#[derive(Clone)]
pub struct LoadingEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LoadingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingEngine")
            .field("session", &self.shared.session)
            .field("phase", &self.current_phase())
            .finish()
    }
}

impl Default for LoadingEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl LoadingEngine {
    /// Create an engine at INITIAL. The sweep counts live operation guards.
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    /// Create an engine whose sweep also asks `probe` for in-flight
    /// operations. Guards from [`begin_operation`](Self::begin_operation)
    /// are counted on top of what the probe reports, so the probe only
    /// needs to count work tracked elsewhere.
    pub fn with_probe(config: EngineConfig, probe: Arc<dyn ActivityProbe>) -> Self {
        Self::build(config, Some(probe))
    }

    fn build(config: EngineConfig, probe: Option<Arc<dyn ActivityProbe>>) -> Self {
        let session = Uuid::new_v4();
        let (notifier, _) = broadcast::channel(config.channel_capacity.max(1));
        let registry = StageRegistry::new(
            session,
            config.policy.clone(),
            config.history_capacity,
            notifier,
        );
        info!(session = %session, "Loading session created");

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    registry,
                    flags: LoadingFlags::default(),
                    error: ErrorState::default(),
                    progress: ProgressMeter::default(),
                    route: None,
                    route_class: RouteClass::Standard,
                }),
                config,
                session,
                tracker: OperationTracker::default(),
                probe,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session
    }

    // --- stage registry ---

    pub fn request_transition(&self, target: Phase) -> TransitionDecision {
        self.request_transition_with(target, false)
    }

    /// Request a transition, optionally as an auth failure (the only way
    /// back to AUTHENTICATION once content has loaded).
    pub fn request_transition_with(&self, target: Phase, auth_failure: bool) -> TransitionDecision {
        self.lock().request(target, auth_failure)
    }

    /// Move from INITIAL into AUTHENTICATION. Returns false if the session
    /// has already started.
    pub fn begin_session(&self) -> bool {
        let mut state = self.lock();
        if state.registry.current() != Phase::Initial {
            debug!(phase = %state.registry.current(), "Session already started");
            return false;
        }
        state.request(Phase::Authentication, false).allowed
    }

    pub fn mark_auth_checked(&self) {
        self.lock().registry.mark_auth_checked();
    }

    pub fn set_debug_override(&self, enabled: bool) {
        self.lock().registry.set_debug_override(enabled);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageChange> {
        self.lock().registry.subscribe()
    }

    /// Subscribe and read the current entry under one lock, so no
    /// transition can slip between the two.
    pub(crate) fn subscribe_with_entry(&self) -> (broadcast::Receiver<StageChange>, PhaseEntry) {
        let state = self.lock();
        (state.registry.subscribe(), state.registry.entry())
    }

    pub(crate) fn phase_entry(&self) -> PhaseEntry {
        self.lock().registry.entry()
    }

    // --- loading flags ---

    pub fn set_static_loading(&self, loading: bool) {
        let mut state = self.lock();
        let plan = flags::plan_static(state.registry.current(), loading, state.route_class);
        for target in plan.requests {
            state.request(target, false);
        }
        if state.flags.store_static(plan.store) {
            info!(is_loading = plan.store, route_class = %state.route_class, "Setting static loading");
        }
    }

    pub fn set_dynamic_loading(&self, loading: bool) {
        self.lock().set_dynamic_loading(loading);
    }

    /// Drop both flags and the operation counter, then finish the pipeline
    /// unless it is already COMPLETED or in ERROR.
    pub fn reset_loading(&self) {
        let mut state = self.lock();
        state.flags.reset();
        if let Some(target) = flags::plan_reset(state.registry.current()) {
            state.request(target, false);
        }
    }

    /// Track one operation for as long as the returned guard lives.
    pub fn begin_operation(&self) -> OperationGuard {
        OperationGuard::new(self.clone(), self.shared.tracker.clone())
    }

    pub fn set_route(&self, path: impl Into<String>) {
        let path = path.into();
        let mut state = self.lock();
        let class = RouteClass::classify(&path, &self.shared.config.fast_path_prefixes);
        if class != state.route_class {
            info!(path = %path, route_class = %class, "Route class changed");
        }
        state.route_class = class;
        state.route = Some(path);
    }

    // --- error channel ---

    /// Set or clear the application error. A new message forces ERROR;
    /// clearing it restarts from AUTHENTICATION.
    pub fn set_error(&self, message: Option<String>) {
        self.lock().set_error(message);
    }

    pub fn clear_error(&self) {
        self.set_error(None);
    }

    /// Full recovery out of ERROR. Returns false if not in ERROR.
    pub fn recover_from_error(&self) -> bool {
        self.lock().recover_from_error()
    }

    pub fn set_progress(&self, value: i64) -> u8 {
        self.lock().progress.set(value)
    }

    pub fn handle_signal(&self, signal: Signal) {
        debug!(signal = signal.name(), "Handling signal");
        match signal {
            Signal::AuthCheckComplete { is_authenticated } => {
                let mut state = self.lock();
                state.registry.mark_auth_checked();
                if is_authenticated {
                    state.request(Phase::StaticContent, false);
                }
            }
            Signal::Unauthorized => {
                self.request_transition_with(Phase::Authentication, true);
            }
            Signal::LoadingError { message } => self.set_error(Some(message)),
        }
    }

    /// Run one consistency sweep now.
    pub fn sweep(&self) -> SweepReport {
        let mut state = self.lock();
        let tracked = self.tracked_operations();
        state.sweep(tracked)
    }

    /// Guards plus whatever the external probe reports. Callers hold the
    /// state lock, so no guard can start or end between this read and the
    /// flags it is compared against.
    fn tracked_operations(&self) -> usize {
        let external = self
            .shared
            .probe
            .as_ref()
            .map_or(0, |probe| probe.active_operations());
        self.shared.tracker.active_operations() + external
    }

    /// Start the background sweep and phase timers.
    pub fn spawn_orchestrator(&self) -> OrchestratorHandle {
        driver::spawn(self.clone())
    }

    pub fn admits_request(&self, url: &str) -> bool {
        admission::admits(self.current_phase(), url)
    }

    // --- reads ---

    pub fn current_phase(&self) -> Phase {
        self.lock().registry.current()
    }

    pub fn is_static_loading(&self) -> bool {
        self.lock().flags.is_static_loading()
    }

    pub fn is_dynamic_loading(&self) -> bool {
        self.lock().flags.is_dynamic_loading()
    }

    pub fn active_request_count(&self) -> usize {
        self.lock().flags.active_requests()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.message().map(str::to_string)
    }

    pub fn has_error(&self) -> bool {
        self.lock().error.has_error()
    }

    pub fn progress(&self) -> u8 {
        self.lock().progress.value()
    }

    pub fn is_auth_checked(&self) -> bool {
        self.lock().registry.is_auth_checked()
    }

    pub fn route_class(&self) -> RouteClass {
        self.lock().route_class
    }

    /// Phases entered so far, oldest first, bounded by the history capacity.
    pub fn history(&self) -> Vec<Phase> {
        self.lock().registry.history().iter().map(|r| r.phase).collect()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.lock();
        let tracked_operations = self.tracked_operations();
        EngineSnapshot {
            session: self.shared.session,
            phase: state.registry.current(),
            transitions: state.registry.entry().seq,
            static_loading: state.flags.is_static_loading(),
            dynamic_loading: state.flags.is_dynamic_loading(),
            active_requests: state.flags.active_requests(),
            tracked_operations,
            error: state.error.message().map(str::to_string),
            progress: state.progress.value(),
            auth_checked: state.registry.is_auth_checked(),
            route: state.route.clone(),
            route_class: state.route_class,
            debug_override: state.registry.debug_override(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::TransitionRule;

    fn engine() -> LoadingEngine {
        LoadingEngine::default()
    }

    fn at_dynamic() -> LoadingEngine {
        let engine = engine();
        engine.handle_signal(Signal::AuthCheckComplete {
            is_authenticated: true,
        });
        engine.request_transition(Phase::DynamicContent);
        assert_eq!(engine.current_phase(), Phase::DynamicContent);
        engine
    }

    #[tokio::test]
    async fn test_begin_session_enters_authentication() {
        let engine = engine();
        assert!(engine.begin_session());
        assert_eq!(engine.current_phase(), Phase::Authentication);
        assert!(!engine.begin_session());
    }

    #[tokio::test]
    async fn test_auth_complete_goes_to_static_content() {
        let engine = engine();
        engine.handle_signal(Signal::AuthCheckComplete {
            is_authenticated: true,
        });
        assert_eq!(engine.current_phase(), Phase::StaticContent);
        assert!(engine.is_auth_checked());
    }

    #[tokio::test]
    async fn test_failed_auth_check_only_marks_checked() {
        let engine = engine();
        engine.begin_session();
        engine.handle_signal(Signal::AuthCheckComplete {
            is_authenticated: false,
        });
        assert_eq!(engine.current_phase(), Phase::Authentication);
        assert!(engine.is_auth_checked());
    }

    #[tokio::test]
    async fn test_no_op_request_is_rejected() {
        let engine = at_dynamic();
        let decision = engine.request_transition(Phase::DynamicContent);
        assert!(!decision.allowed);
        assert_eq!(decision.rule, TransitionRule::NoOpGuard);
        assert_eq!(
            decision.reason().as_deref(),
            Some("Stage is already set to this value")
        );
    }

    #[tokio::test]
    async fn test_regression_needs_auth_failure() {
        let engine = engine();
        engine.handle_signal(Signal::AuthCheckComplete {
            is_authenticated: true,
        });
        assert!(!engine.request_transition(Phase::Authentication).allowed);
        assert_eq!(engine.current_phase(), Phase::StaticContent);

        engine.handle_signal(Signal::Unauthorized);
        assert_eq!(engine.current_phase(), Phase::Authentication);
    }

    #[tokio::test]
    async fn test_set_error_forces_error_phase() {
        let engine = at_dynamic();
        engine.set_error(Some("x".into()));
        assert_eq!(engine.current_phase(), Phase::Error);
        assert_eq!(engine.error().as_deref(), Some("x"));
        assert!(engine.has_error());
    }

    #[tokio::test]
    async fn test_clear_error_returns_to_authentication() {
        let engine = at_dynamic();
        engine.set_error(Some("x".into()));
        engine.clear_error();
        assert_eq!(engine.current_phase(), Phase::Authentication);
        assert!(engine.error().is_none());
    }

    #[tokio::test]
    async fn test_new_message_in_error_replaces_without_transition() {
        let engine = at_dynamic();
        let mut rx = engine.subscribe();
        engine.set_error(Some("first".into()));
        engine.set_error(Some("second".into()));
        assert_eq!(engine.error().as_deref(), Some("second"));

        let change = rx.try_recv().unwrap();
        assert_eq!(change.to, Phase::Error);
        assert!(change.forced);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_public_request_cannot_enter_error() {
        let engine = at_dynamic();
        assert!(!engine.request_transition(Phase::Error).allowed);
        assert_eq!(engine.current_phase(), Phase::DynamicContent);
    }

    #[tokio::test]
    async fn test_recover_from_error() {
        let engine = at_dynamic();
        assert!(!engine.recover_from_error());

        engine.set_dynamic_loading(true);
        engine.set_error(Some("boom".into()));
        assert!(engine.recover_from_error());
        assert_eq!(engine.current_phase(), Phase::Authentication);
        assert!(!engine.has_error());
        assert!(!engine.is_dynamic_loading());
        assert_eq!(engine.active_request_count(), 0);
    }

    #[tokio::test]
    async fn test_dynamic_loading_counts_and_advances() {
        let engine = engine();
        engine.handle_signal(Signal::AuthCheckComplete {
            is_authenticated: true,
        });
        for _ in 0..3 {
            engine.set_dynamic_loading(true);
        }
        assert_eq!(engine.current_phase(), Phase::DynamicContent);
        engine.set_dynamic_loading(false);
        engine.set_dynamic_loading(false);
        assert_eq!(engine.active_request_count(), 1);
        assert!(engine.is_dynamic_loading());
    }

    #[tokio::test]
    async fn test_dynamic_loading_does_not_leave_error() {
        let engine = at_dynamic();
        engine.set_error(Some("x".into()));
        engine.set_dynamic_loading(true);
        assert_eq!(engine.current_phase(), Phase::Error);
    }

    #[tokio::test]
    async fn test_static_loading_standard_route() {
        let engine = engine();
        engine.begin_session();
        engine.set_static_loading(true);
        assert_eq!(engine.current_phase(), Phase::StaticContent);
        assert!(engine.is_static_loading());
        engine.set_static_loading(false);
        assert!(!engine.is_static_loading());
        assert_eq!(engine.current_phase(), Phase::StaticContent);
    }

    #[tokio::test]
    async fn test_static_loading_fast_path_route() {
        let engine = engine();
        engine.set_route("/admin/users");
        assert_eq!(engine.route_class(), RouteClass::FastPath);
        engine.begin_session();
        engine.set_static_loading(true);
        assert_eq!(engine.current_phase(), Phase::Completed);
        assert!(!engine.is_static_loading());
        assert_eq!(
            engine.history(),
            vec![Phase::Authentication, Phase::StaticContent, Phase::Completed]
        );
    }

    #[tokio::test]
    async fn test_reset_loading_completes() {
        let engine = at_dynamic();
        engine.set_dynamic_loading(true);
        engine.reset_loading();
        assert_eq!(engine.current_phase(), Phase::Completed);
        assert_eq!(engine.active_request_count(), 0);
        assert!(!engine.is_dynamic_loading());
    }

    #[tokio::test]
    async fn test_operation_guard_brackets_dynamic_loading() {
        let engine = engine();
        engine.handle_signal(Signal::AuthCheckComplete {
            is_authenticated: true,
        });
        let guard = engine.begin_operation();
        assert_eq!(engine.current_phase(), Phase::DynamicContent);
        assert_eq!(engine.snapshot().tracked_operations, 1);
        drop(guard);
        assert_eq!(engine.active_request_count(), 0);
        assert_eq!(engine.snapshot().tracked_operations, 0);
        assert!(!engine.is_dynamic_loading());
    }

    #[tokio::test]
    async fn test_admits_request_follows_phase() {
        let engine = engine();
        engine.begin_session();
        assert!(engine.admits_request("/api/auth/session"));
        assert!(!engine.admits_request("/api/events"));
    }

    #[tokio::test]
    async fn test_progress_is_independent_of_phase() {
        let engine = engine();
        assert_eq!(engine.set_progress(250), 100);
        assert_eq!(engine.progress(), 100);
        assert_eq!(engine.current_phase(), Phase::Initial);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_state() {
        let engine = engine();
        engine.set_route("/events");
        engine.begin_session();
        engine.set_progress(40);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.session, engine.session_id());
        assert_eq!(snapshot.phase, Phase::Authentication);
        assert_eq!(snapshot.transitions, 1);
        assert_eq!(snapshot.progress, 40);
        assert_eq!(snapshot.route.as_deref(), Some("/events"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["phase"], "authentication");
        assert_eq!(json["route_class"], "standard");
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions_in_order() {
        let engine = engine();
        let mut rx = engine.subscribe();
        engine.begin_session();
        engine.handle_signal(Signal::AuthCheckComplete {
            is_authenticated: true,
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.from, first.to), (Phase::Initial, Phase::Authentication));
        assert_eq!((second.from, second.to), (Phase::Authentication, Phase::StaticContent));
        assert!(second.seq > first.seq);
        assert_eq!(first.session, engine.session_id());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let engine = engine();
        let other = engine.clone();
        other.begin_session();
        assert_eq!(engine.current_phase(), Phase::Authentication);
    }
}
