//! Configuration: `stagegate.toml` plus environment overrides.
//!
//! Settings are resolved in order, later sources winning:
//! 1. `stagegate.toml` (missing file or sections fall back to defaults)
//! 2. Environment variables (`STAGEGATE_*`, `.env` included)
//! 3. CLI flags, applied by the binary

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::stage::TransitionPolicy;

pub const CONFIG_FILE_NAME: &str = "stagegate.toml";

pub const ENV_DEBUG_TRANSITIONS: &str = "STAGEGATE_DEBUG_TRANSITIONS";
pub const ENV_SWEEP_INTERVAL_MS: &str = "STAGEGATE_SWEEP_INTERVAL_MS";
pub const ENV_STATIC_TIMEOUT_MS: &str = "STAGEGATE_STATIC_TIMEOUT_MS";
pub const ENV_ERROR_RECOVERY_MS: &str = "STAGEGATE_ERROR_RECOVERY_MS";

/// Smallest history that can hold an A-B-C-A-B-C pattern.
const MIN_CYCLE_HISTORY: usize = 6;

/// Background timer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSection {
    /// Interval between consistency sweeps
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Time in STATIC_CONTENT before auto-advancing to DYNAMIC_CONTENT
    #[serde(default = "default_static_content_timeout_ms")]
    pub static_content_timeout_ms: u64,
    /// Time in ERROR before recovering automatically
    #[serde(default = "default_error_recovery_timeout_ms")]
    pub error_recovery_timeout_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    2000
}

fn default_static_content_timeout_ms() -> u64 {
    5000
}

fn default_error_recovery_timeout_ms() -> u64 {
    15000
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            static_content_timeout_ms: default_static_content_timeout_ms(),
            error_recovery_timeout_ms: default_error_recovery_timeout_ms(),
        }
    }
}

/// Transition validation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionsSection {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_cycle_window_ms")]
    pub cycle_window_ms: u64,
    #[serde(default = "default_repetition_window_ms")]
    pub repetition_window_ms: u64,
    #[serde(default = "default_repetition_limit")]
    pub repetition_limit: usize,
    /// Accept every transition (diagnostics only)
    #[serde(default)]
    pub debug_override: bool,
}

fn default_history_capacity() -> usize {
    crate::stage::history::DEFAULT_HISTORY_CAPACITY
}

fn default_cycle_window_ms() -> u64 {
    3000
}

fn default_repetition_window_ms() -> u64 {
    2000
}

fn default_repetition_limit() -> usize {
    crate::stage::rules::DEFAULT_REPETITION_LIMIT
}

impl Default for TransitionsSection {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            cycle_window_ms: default_cycle_window_ms(),
            repetition_window_ms: default_repetition_window_ms(),
            repetition_limit: default_repetition_limit(),
            debug_override: false,
        }
    }
}

/// Route classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutesSection {
    /// Path prefixes with no separate static phase
    #[serde(default = "default_fast_path_prefixes")]
    pub fast_path_prefixes: Vec<String>,
}

fn default_fast_path_prefixes() -> Vec<String> {
    vec!["/admin".to_string()]
}

impl Default for RoutesSection {
    fn default() -> Self {
        Self {
            fast_path_prefixes: default_fast_path_prefixes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsSection {
    /// Buffered notifications per subscriber before it starts lagging
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// The complete stagegate.toml structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StagegateToml {
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub transitions: TransitionsSection,
    #[serde(default)]
    pub routes: RoutesSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
}

impl StagegateToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `stagegate.toml` from `dir`, or defaults if there is none.
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let timing = &self.timing;
        let transitions = &self.transitions;

        for (key, value) in [
            ("timing.sweep_interval_ms", timing.sweep_interval_ms),
            ("timing.static_content_timeout_ms", timing.static_content_timeout_ms),
            ("timing.error_recovery_timeout_ms", timing.error_recovery_timeout_ms),
            ("transitions.cycle_window_ms", transitions.cycle_window_ms),
            ("transitions.repetition_window_ms", transitions.repetition_window_ms),
        ] {
            if value == 0 {
                warnings.push(format!("{key} is 0; it will be treated as 1ms"));
            }
        }

        if transitions.cycle_window_ms > timing.static_content_timeout_ms {
            warnings.push(format!(
                "transitions.cycle_window_ms {} exceeds timing.static_content_timeout_ms {}; \
                 the static content timeout will force past cycle rejections",
                transitions.cycle_window_ms, timing.static_content_timeout_ms
            ));
        }

        if transitions.history_capacity == 0 {
            warnings.push("transitions.history_capacity is 0; it will be treated as 1".to_string());
        } else if transitions.history_capacity < MIN_CYCLE_HISTORY {
            warnings.push(format!(
                "transitions.history_capacity {} is below {}; three-phase cycles cannot be detected",
                transitions.history_capacity, MIN_CYCLE_HISTORY
            ));
        }

        if transitions.repetition_limit == 0 {
            warnings.push(
                "transitions.repetition_limit is 0; every repeated transition will be rejected"
                    .to_string(),
            );
        } else if transitions.repetition_limit > transitions.history_capacity {
            warnings.push(format!(
                "transitions.repetition_limit {} exceeds history_capacity {}; the limit can never be reached",
                transitions.repetition_limit, transitions.history_capacity
            ));
        }

        if transitions.debug_override {
            warnings.push(
                "transitions.debug_override is on; all transition validation is bypassed"
                    .to_string(),
            );
        }

        for prefix in &self.routes.fast_path_prefixes {
            if !prefix.starts_with('/') {
                warnings.push(format!(
                    "Fast-path prefix '{prefix}' does not start with '/' and will never match"
                ));
            }
        }

        if self.notifications.channel_capacity == 0 {
            warnings.push(
                "notifications.channel_capacity is 0; it will be treated as 1".to_string(),
            );
        }

        warnings
    }
}

/// Resolved engine settings with durations in place of raw milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub sweep_interval: Duration,
    pub static_content_timeout: Duration,
    pub error_recovery_timeout: Duration,
    pub policy: TransitionPolicy,
    pub history_capacity: usize,
    pub fast_path_prefixes: Vec<String>,
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_toml(&StagegateToml::default())
    }
}

impl EngineConfig {
    /// Convert the file layer, clamping zero values to their minimum.
    pub fn from_toml(toml: &StagegateToml) -> Self {
        let ms = |value: u64| Duration::from_millis(value.max(1));
        Self {
            sweep_interval: ms(toml.timing.sweep_interval_ms),
            static_content_timeout: ms(toml.timing.static_content_timeout_ms),
            error_recovery_timeout: ms(toml.timing.error_recovery_timeout_ms),
            policy: TransitionPolicy {
                cycle_window: ms(toml.transitions.cycle_window_ms),
                repetition_window: ms(toml.transitions.repetition_window_ms),
                repetition_limit: toml.transitions.repetition_limit,
                debug_override: toml.transitions.debug_override,
            },
            history_capacity: toml.transitions.history_capacity.max(1),
            fast_path_prefixes: toml.routes.fast_path_prefixes.clone(),
            channel_capacity: toml.notifications.channel_capacity.max(1),
        }
    }

    /// Resolve from the file layer, then apply `STAGEGATE_*` overrides.
    pub fn resolve(toml: &StagegateToml) -> Result<Self, ConfigError> {
        Self::from_toml(toml).with_env_overrides()
    }

    /// Apply `STAGEGATE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_value(ENV_DEBUG_TRANSITIONS) {
            self.policy.debug_override = parse_bool(ENV_DEBUG_TRANSITIONS, &value)?;
        }
        if let Some(value) = env_value(ENV_SWEEP_INTERVAL_MS) {
            self.sweep_interval = parse_millis(ENV_SWEEP_INTERVAL_MS, &value)?;
        }
        if let Some(value) = env_value(ENV_STATIC_TIMEOUT_MS) {
            self.static_content_timeout = parse_millis(ENV_STATIC_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = env_value(ENV_ERROR_RECOVERY_MS) {
            self.error_recovery_timeout = parse_millis(ENV_ERROR_RECOVERY_MS, &value)?;
        }
        Ok(self)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let ms: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected milliseconds, got '{}'", value.trim()),
    })?;
    Ok(Duration::from_millis(ms.max(1)))
}

/// Where the config file for a run lives: an explicit path wins over the
/// project directory.
pub fn config_path(explicit: Option<&Path>, project_dir: &Path) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_dir.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    // Environment variables are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_ENV: [&str; 4] = [
        ENV_DEBUG_TRANSITIONS,
        ENV_SWEEP_INTERVAL_MS,
        ENV_STATIC_TIMEOUT_MS,
        ENV_ERROR_RECOVERY_MS,
    ];

    fn clear_env() {
        for key in ALL_ENV {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn test_defaults() {
        let config = StagegateToml::default();
        assert_eq!(config.timing.sweep_interval_ms, 2000);
        assert_eq!(config.timing.static_content_timeout_ms, 5000);
        assert_eq!(config.timing.error_recovery_timeout_ms, 15000);
        assert_eq!(config.transitions.history_capacity, 30);
        assert_eq!(config.transitions.repetition_limit, 3);
        assert_eq!(config.routes.fast_path_prefixes, vec!["/admin"]);
        assert_eq!(config.notifications.channel_capacity, 64);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_config() {
        let content = r#"
[timing]
sweep_interval_ms = 500

[routes]
fast_path_prefixes = ["/admin", "/ops"]
"#;
        let config = StagegateToml::parse(content).unwrap();
        assert_eq!(config.timing.sweep_interval_ms, 500);
        assert_eq!(config.timing.static_content_timeout_ms, 5000);
        assert_eq!(config.routes.fast_path_prefixes.len(), 2);
        assert_eq!(config.transitions, TransitionsSection::default());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = StagegateToml::parse("[timing\nsweep_interval_ms = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = StagegateToml::default();
        config.transitions.debug_override = true;
        config.save(&path).unwrap();

        let loaded = StagegateToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = StagegateToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, StagegateToml::default());
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = StagegateToml::default();
        config.timing.sweep_interval_ms = 0;
        config.transitions.history_capacity = 4;
        config.transitions.repetition_limit = 5;
        config.routes.fast_path_prefixes = vec!["admin".to_string()];

        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("sweep_interval_ms")));
        assert!(warnings.iter().any(|w| w.contains("three-phase cycles")));
        assert!(warnings.iter().any(|w| w.contains("can never be reached")));
        assert!(warnings.iter().any(|w| w.contains("'admin'")));
    }

    #[test]
    fn test_validate_warns_when_cycle_window_outlasts_static_timeout() {
        let mut config = StagegateToml::default();
        assert!(config.validate().is_empty());

        config.transitions.cycle_window_ms = 10_000;
        config.timing.static_content_timeout_ms = 500;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("cycle_window_ms 10000"));
        assert!(warnings[0].contains("force past cycle rejections"));
    }

    #[test]
    fn test_engine_config_clamps_zeroes() {
        let mut toml = StagegateToml::default();
        toml.timing.sweep_interval_ms = 0;
        toml.transitions.history_capacity = 0;
        toml.notifications.channel_capacity = 0;

        let config = EngineConfig::from_toml(&toml);
        assert_eq!(config.sweep_interval, Duration::from_millis(1));
        assert_eq!(config.history_capacity, 1);
        assert_eq!(config.channel_capacity, 1);
    }

    #[test]
    fn test_engine_config_matches_policy_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.policy, TransitionPolicy::default());
        assert_eq!(config.static_content_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            std::env::set_var(ENV_DEBUG_TRANSITIONS, "true");
            std::env::set_var(ENV_STATIC_TIMEOUT_MS, "250");
        }

        let config = EngineConfig::resolve(&StagegateToml::default());
        clear_env();

        let config = config.unwrap();
        assert!(config.policy.debug_override);
        assert_eq!(config.static_content_timeout, Duration::from_millis(250));
        assert_eq!(config.sweep_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { std::env::set_var(ENV_SWEEP_INTERVAL_MS, "fast") };

        let result = EngineConfig::resolve(&StagegateToml::default());
        clear_env();

        match result {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, ENV_SWEEP_INTERVAL_MS),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_config_path_prefers_explicit() {
        let project = Path::new("/project");
        assert_eq!(
            config_path(None, project),
            PathBuf::from("/project/stagegate.toml")
        );
        assert_eq!(
            config_path(Some(Path::new("/etc/sg.toml")), project),
            PathBuf::from("/etc/sg.toml")
        );
    }
}
