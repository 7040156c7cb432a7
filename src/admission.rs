//! Request admission by loading phase.
//!
//! The fetch layer asks before issuing a relative request; early phases only
//! let through the requests that phase exists for, so user data is not
//! fetched before the auth check has settled.

use crate::phase::Phase;

/// Coarse classification of a request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Not a relative URL; never gated
    External,
    /// Auth endpoints
    Auth,
    /// Per-user data (`/user/`, `/me`, `/notifications`)
    UserSpecific,
    /// Profile pages and data
    Profile,
    /// Everything else
    General,
}

impl RequestClass {
    pub fn classify(url: &str) -> Self {
        if !url.starts_with('/') {
            return RequestClass::External;
        }
        if url.contains("/auth/") || url.contains("/login") || url.contains("/check-auth") {
            return RequestClass::Auth;
        }
        if url.contains("/user/") || url.contains("/me") || url.contains("/notifications") {
            return RequestClass::UserSpecific;
        }
        if url.contains("/profile") {
            return RequestClass::Profile;
        }
        RequestClass::General
    }
}

/// Check if a request to `url` should be issued while in `phase`.
pub fn admits(phase: Phase, url: &str) -> bool {
    let class = RequestClass::classify(url);
    if class == RequestClass::External {
        return true;
    }

    match phase {
        Phase::Authentication => class == RequestClass::Auth,
        Phase::StaticContent => {
            !matches!(class, RequestClass::UserSpecific | RequestClass::Profile)
        }
        Phase::DynamicContent => class != RequestClass::UserSpecific,
        Phase::Initial | Phase::DataLoading | Phase::Completed | Phase::Error => true,
    }
}
