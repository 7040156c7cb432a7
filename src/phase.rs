//! Loading phase definition for the stagegate pipeline.
//!
//! This module provides:
//! - `Phase` enum, ordered by pipeline position
//! - Ordinal levels used by the flag aggregator and the sweep
//! - Parsing and display helpers shared by the CLI and scripts

use serde::{Deserialize, Serialize};

/// One step of the loading pipeline.
///
/// `Error` sits outside the ordering: it is reachable from any phase and has
/// no ordinal level. `DataLoading` is a sibling of `DynamicContent` and shares
/// its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Start-only phase, before the auth check has been requested
    #[default]
    Initial,
    /// Waiting on the auth collaborator
    Authentication,
    /// Layout and non-data content
    StaticContent,
    /// Content that loads automatically once the page is up
    DynamicContent,
    /// Data fetched on user action, same level as `DynamicContent`
    DataLoading,
    /// Terminal success
    Completed,
    /// Terminal until recovered
    Error,
}

impl Phase {
    /// All phases in pipeline order, `Error` last.
    pub const ALL: [Phase; 7] = [
        Phase::Initial,
        Phase::Authentication,
        Phase::StaticContent,
        Phase::DynamicContent,
        Phase::DataLoading,
        Phase::Completed,
        Phase::Error,
    ];

    /// Ordinal level of the phase (higher is later). `None` for `Error`.
    pub fn level(self) -> Option<u8> {
        match self {
            Phase::Initial => Some(0),
            Phase::Authentication => Some(1),
            Phase::StaticContent => Some(2),
            Phase::DynamicContent | Phase::DataLoading => Some(3),
            Phase::Completed => Some(4),
            Phase::Error => None,
        }
    }

    /// Check if this phase sits strictly before `other` in the pipeline.
    ///
    /// Always false when either side is `Error`.
    pub fn is_before(self, other: Phase) -> bool {
        match (self.level(), other.level()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Check if this phase is `DynamicContent` or its `DataLoading` sibling.
    pub fn is_dynamic(self) -> bool {
        matches!(self, Phase::DynamicContent | Phase::DataLoading)
    }

    /// Check if this phase is one of the pre-content phases.
    pub fn is_pre_content(self) -> bool {
        matches!(self, Phase::Initial | Phase::Authentication)
    }

    /// Check if the phase is terminal (success or error).
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Error)
    }

    /// Stable snake_case name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Initial => "initial",
            Phase::Authentication => "authentication",
            Phase::StaticContent => "static_content",
            Phase::DynamicContent => "dynamic_content",
            Phase::DataLoading => "data_loading",
            Phase::Completed => "completed",
            Phase::Error => "error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid phase '{}'. Valid values: initial, authentication, static_content, dynamic_content, data_loading, completed, error",
                    s
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_levels_follow_pipeline_order() {
        assert_eq!(Phase::Initial.level(), Some(0));
        assert_eq!(Phase::Authentication.level(), Some(1));
        assert_eq!(Phase::StaticContent.level(), Some(2));
        assert_eq!(Phase::DynamicContent.level(), Some(3));
        assert_eq!(Phase::DataLoading.level(), Some(3));
        assert_eq!(Phase::Completed.level(), Some(4));
        assert_eq!(Phase::Error.level(), None);
    }

    #[test]
    fn test_is_before_ignores_error() {
        assert!(Phase::Authentication.is_before(Phase::DynamicContent));
        assert!(!Phase::DataLoading.is_before(Phase::DynamicContent));
        assert!(!Phase::Error.is_before(Phase::Completed));
        assert!(!Phase::Initial.is_before(Phase::Error));
    }

    #[test]
    fn test_phase_from_str_accepts_both_cases() {
        assert_eq!("static_content".parse::<Phase>().unwrap(), Phase::StaticContent);
        assert_eq!("STATIC_CONTENT".parse::<Phase>().unwrap(), Phase::StaticContent);
        assert_eq!("data-loading".parse::<Phase>().unwrap(), Phase::DataLoading);
        assert!("loading".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_display_matches_serde() {
        for phase in Phase::ALL {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase));
        }
    }

    #[test]
    fn test_phase_default_is_initial() {
        assert_eq!(Phase::default(), Phase::Initial);
    }
}
