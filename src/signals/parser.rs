//! Script parsing.
//!
//! Scripts are YAML documents; JSON parses too since it is a YAML subset.
//! All `wait` durations are resolved up front so a bad script fails before
//! any step runs.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::types::{DurationSpec, Script, ScriptStep};
use crate::errors::ScriptError;

static DURATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*(ms|s)?\s*$").unwrap());

/// Parse a duration like `"500ms"`, `"5s"` or `"1200"` (milliseconds).
pub fn parse_duration(text: &str) -> Option<Duration> {
    let caps = DURATION_REGEX.captures(text)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    match caps.get(2).map(|m| m.as_str()) {
        Some("s") => Some(Duration::from_secs(amount)),
        _ => Some(Duration::from_millis(amount)),
    }
}

impl DurationSpec {
    pub fn resolve(&self) -> Option<Duration> {
        match self {
            DurationSpec::Millis(ms) => Some(Duration::from_millis(*ms)),
            DurationSpec::Text(text) => parse_duration(text),
        }
    }
}

/// Parse a script from YAML or JSON text.
pub fn parse_script(text: &str) -> Result<Script, ScriptError> {
    let script: Script = serde_yaml::from_str(text)?;
    if script.steps.is_empty() {
        return Err(ScriptError::Empty);
    }

    for (index, step) in script.steps.iter().enumerate() {
        if let ScriptStep::Wait { duration } = step
            && duration.resolve().is_none()
        {
            let value = match duration {
                DurationSpec::Millis(ms) => ms.to_string(),
                DurationSpec::Text(text) => text.clone(),
            };
            return Err(ScriptError::InvalidDuration {
                step: index + 1,
                value,
            });
        }
    }

    Ok(script)
}

/// Read and parse a script file.
pub fn load_script(path: &Path) -> Result<Script, ScriptError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScriptError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    parse_script(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration(" 1200 "), Some(Duration::from_millis(1200)));
        assert_eq!(parse_duration("5m"), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_parse_yaml_script() {
        let yaml = r#"
name: happy path
steps:
  - op: begin_session
  - op: auth_check_complete
    is_authenticated: true
  - op: wait
    duration: 5s
  - op: dynamic_loading
    loading: true
  - op: transition
    phase: data_loading
"#;
        let script = parse_script(yaml).unwrap();
        assert_eq!(script.name.as_deref(), Some("happy path"));
        assert_eq!(script.steps.len(), 5);
        assert_eq!(script.steps[0], ScriptStep::BeginSession);
        assert_eq!(
            script.steps[4],
            ScriptStep::Transition {
                phase: Phase::DataLoading,
                auth_failure: false
            }
        );
    }

    #[test]
    fn test_parse_json_script() {
        let json = r#"{"steps": [{"op": "set_error", "message": "net down"}, {"op": "clear_error"}]}"#;
        let script = parse_script(json).unwrap();
        assert_eq!(
            script.steps[0],
            ScriptStep::SetError {
                message: Some("net down".into())
            }
        );
        assert_eq!(script.steps[1], ScriptStep::ClearError);
    }

    #[test]
    fn test_empty_script_is_error() {
        let err = parse_script("steps: []").unwrap_err();
        assert!(matches!(err, ScriptError::Empty));
    }

    #[test]
    fn test_unknown_op_is_parse_error() {
        let err = parse_script("steps:\n  - op: teleport\n").unwrap_err();
        assert!(matches!(err, ScriptError::Parse(_)));
    }

    #[test]
    fn test_invalid_duration_reports_step() {
        let yaml = "steps:\n  - op: sweep\n  - op: wait\n    duration: forever\n";
        let err = parse_script(yaml).unwrap_err();
        match err {
            ScriptError::InvalidDuration { step, value } => {
                assert_eq!(step, 2);
                assert_eq!(value, "forever");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_script_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "steps:\n  - op: reset_loading").unwrap();
        let script = load_script(file.path()).unwrap();
        assert_eq!(script.steps, vec![ScriptStep::ResetLoading]);
    }

    #[test]
    fn test_load_missing_script() {
        let err = load_script(Path::new("/nonexistent/script.yaml")).unwrap_err();
        assert!(matches!(err, ScriptError::ReadFailed { .. }));
    }
}
