//! Loading flag aggregation.
//!
//! Many independent operations report start/end; this module folds those
//! signals into two readiness flags and decides which phase changes to ask
//! the stage registry for. It never changes the phase itself.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::phase::Phase;

/// Route classes with different static-loading behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    /// Ordinary pages: static content is its own phase
    #[default]
    Standard,
    /// Sections with no separate static phase (e.g. administration)
    FastPath,
}

impl RouteClass {
    /// Classify `path` against the configured fast-path prefixes.
    pub fn classify(path: &str, fast_path_prefixes: &[String]) -> Self {
        if fast_path_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
        {
            RouteClass::FastPath
        } else {
            RouteClass::Standard
        }
    }
}

impl std::fmt::Display for RouteClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteClass::Standard => write!(f, "standard"),
            RouteClass::FastPath => write!(f, "fast_path"),
        }
    }
}

/// The two readiness flags plus the operation counter behind the dynamic one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadingFlags {
    static_loading: bool,
    dynamic_loading: bool,
    active_requests: usize,
}

impl LoadingFlags {
    pub fn is_static_loading(&self) -> bool {
        self.static_loading
    }

    pub fn is_dynamic_loading(&self) -> bool {
        self.dynamic_loading
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests
    }

    /// Check if either flag is raised.
    pub fn any(&self) -> bool {
        self.static_loading || self.dynamic_loading
    }

    /// Store the static flag. Returns true if it changed.
    pub fn store_static(&mut self, loading: bool) -> bool {
        let changed = self.static_loading != loading;
        self.static_loading = loading;
        changed
    }

    /// Count one operation start (`true`) or end (`false`) and recompute the
    /// derived dynamic flag. Returns the new flag.
    ///
    /// An end without a matching start is clamped at zero.
    pub fn record_dynamic(&mut self, loading: bool) -> bool {
        if loading {
            self.active_requests = self.active_requests.saturating_add(1);
        } else if self.active_requests == 0 {
            warn!("Dynamic loading ended with no active requests; counter stays at 0");
        } else {
            self.active_requests -= 1;
        }

        let derived = self.active_requests > 0 || loading;
        if derived != self.dynamic_loading {
            info!(
                is_loading = derived,
                active_requests = self.active_requests,
                "Setting dynamic loading"
            );
        }
        self.dynamic_loading = derived;
        derived
    }

    /// Drop both flags and forget in-flight operations.
    pub fn reset(&mut self) {
        if self.any() || self.active_requests > 0 {
            info!(
                active_requests = self.active_requests,
                "Resetting all loading flags"
            );
        }
        self.static_loading = false;
        self.dynamic_loading = false;
        self.active_requests = 0;
    }
}

/// What a `set_static_loading` call should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticPlan {
    /// Phases to request, in order
    pub requests: Vec<Phase>,
    /// Value to store in the static flag
    pub store: bool,
}

/// Decide the phase requests and stored value for a static-loading signal.
pub fn plan_static(current: Phase, loading: bool, route: RouteClass) -> StaticPlan {
    if current.is_terminal() {
        return StaticPlan {
            requests: Vec::new(),
            store: loading && route == RouteClass::Standard,
        };
    }

    match route {
        RouteClass::Standard => StaticPlan {
            requests: if loading && current == Phase::Authentication {
                vec![Phase::StaticContent]
            } else {
                Vec::new()
            },
            store: loading,
        },
        RouteClass::FastPath => {
            let requests = if current.is_pre_content() {
                if loading {
                    vec![Phase::StaticContent, Phase::Completed]
                } else {
                    Vec::new()
                }
            } else {
                vec![Phase::Completed]
            };
            StaticPlan {
                requests,
                store: false,
            }
        }
    }
}

/// Phase to request after the dynamic flag was recomputed, if any.
pub fn plan_dynamic(current: Phase, dynamic_loading: bool) -> Option<Phase> {
    (dynamic_loading && current != Phase::Error && current.is_before(Phase::DynamicContent))
        .then_some(Phase::DynamicContent)
}

/// Phase to request after a full reset, if any.
pub fn plan_reset(current: Phase) -> Option<Phase> {
    (!current.is_terminal()).then_some(Phase::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_never_negative() {
        let mut flags = LoadingFlags::default();
        assert!(!flags.record_dynamic(false));
        assert!(!flags.record_dynamic(false));
        assert_eq!(flags.active_requests(), 0);

        flags.record_dynamic(true);
        flags.record_dynamic(false);
        flags.record_dynamic(false);
        assert_eq!(flags.active_requests(), 0);
        assert!(!flags.is_dynamic_loading());
    }

    #[test]
    fn test_three_starts_two_ends_stays_loading() {
        let mut flags = LoadingFlags::default();
        for _ in 0..3 {
            flags.record_dynamic(true);
        }
        flags.record_dynamic(false);
        flags.record_dynamic(false);
        assert_eq!(flags.active_requests(), 1);
        assert!(flags.is_dynamic_loading());
    }

    #[test]
    fn test_interleavings_stay_non_negative() {
        let orders: [&[bool]; 3] = [
            &[true, true, false, false],
            &[false, true, false, true],
            &[true, false, false, true],
        ];
        let results: Vec<usize> = orders
            .iter()
            .map(|order| {
                let mut flags = LoadingFlags::default();
                for &signal in *order {
                    flags.record_dynamic(signal);
                }
                flags.active_requests()
            })
            .collect();
        // Clamping makes early ends lossy, but the counter is never negative
        assert!(results.iter().all(|&n| n <= 2));
        assert_eq!(results[0], 0);
    }

    #[test]
    fn test_reset_clears_counter() {
        let mut flags = LoadingFlags::default();
        flags.store_static(true);
        flags.record_dynamic(true);
        flags.reset();
        assert!(!flags.any());
        assert_eq!(flags.active_requests(), 0);
    }

    #[test]
    fn test_route_classification() {
        let prefixes = vec!["/admin".to_string()];
        assert_eq!(RouteClass::classify("/admin/users", &prefixes), RouteClass::FastPath);
        assert_eq!(RouteClass::classify("/events", &prefixes), RouteClass::Standard);
        assert_eq!(RouteClass::classify("/events", &[String::new()]), RouteClass::Standard);
    }

    #[test]
    fn test_plan_static_standard_route() {
        let plan = plan_static(Phase::Authentication, true, RouteClass::Standard);
        assert_eq!(plan.requests, vec![Phase::StaticContent]);
        assert!(plan.store);

        let plan = plan_static(Phase::DynamicContent, true, RouteClass::Standard);
        assert!(plan.requests.is_empty());
        assert!(plan.store);

        let plan = plan_static(Phase::StaticContent, false, RouteClass::Standard);
        assert!(plan.requests.is_empty());
        assert!(!plan.store);
    }

    #[test]
    fn test_plan_static_fast_path_never_holds_flag() {
        let plan = plan_static(Phase::Initial, true, RouteClass::FastPath);
        assert_eq!(plan.requests, vec![Phase::StaticContent, Phase::Completed]);
        assert!(!plan.store);

        let plan = plan_static(Phase::StaticContent, true, RouteClass::FastPath);
        assert_eq!(plan.requests, vec![Phase::Completed]);

        let plan = plan_static(Phase::DataLoading, false, RouteClass::FastPath);
        assert_eq!(plan.requests, vec![Phase::Completed]);
        assert!(!plan.store);

        let plan = plan_static(Phase::Authentication, false, RouteClass::FastPath);
        assert!(plan.requests.is_empty());

        let plan = plan_static(Phase::Error, true, RouteClass::FastPath);
        assert!(plan.requests.is_empty());
        assert!(!plan.store);
    }

    #[test]
    fn test_plan_dynamic_only_below_dynamic_content() {
        assert_eq!(plan_dynamic(Phase::StaticContent, true), Some(Phase::DynamicContent));
        assert_eq!(plan_dynamic(Phase::Authentication, true), Some(Phase::DynamicContent));
        assert_eq!(plan_dynamic(Phase::DataLoading, true), None);
        assert_eq!(plan_dynamic(Phase::Error, true), None);
        assert_eq!(plan_dynamic(Phase::StaticContent, false), None);
    }

    #[test]
    fn test_plan_reset() {
        assert_eq!(plan_reset(Phase::DynamicContent), Some(Phase::Completed));
        assert_eq!(plan_reset(Phase::Completed), None);
        assert_eq!(plan_reset(Phase::Error), None);
    }
}
