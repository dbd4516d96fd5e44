//! Scenario Loader: attack scenario documents → immutable [`ScenarioDescriptor`].
//!
//! Scenario files are JSON or YAML (chosen by extension). `id` and `target`
//! are required; the target is either a path to a target configuration file
//! (relative to the scenario file) or an inline target configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{ConfigError, ConfigResult};
use crate::model::{Phase, Severity};
use crate::target::{TargetConfig, TargetHandle};

/// Placeholder in `system_prompt` replaced by the configured default prompt.
pub const SYSTEM_PROMPT_PLACEHOLDER: &str = "SYSTEM_PROMPT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub stopping_conditions: Vec<String>,
    #[serde(default)]
    pub response_format: Option<String>,
}

fn default_step_timeout() -> u64 {
    30
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            timeout_seconds: default_step_timeout(),
            stopping_conditions: Vec::new(),
            response_format: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl ScenarioStep {
    /// The command sent for this step (its first example).
    pub fn command(&self) -> Option<&str> {
        self.examples.first().map(String::as_str)
    }
}

/// Where the target configuration comes from.
#[derive(Debug, Clone)]
pub enum TargetRef {
    Path(PathBuf),
    Inline(Box<TargetConfig>),
}

/// On-disk shape. Everything is optional here so that missing required
/// fields produce a precise error rather than a serde message.
#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    target: Option<serde_json::Value>,
    #[serde(default)]
    phases: Option<Vec<String>>,
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    constraints: Constraints,
    #[serde(default)]
    steps: Vec<ScenarioStep>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    parameters: serde_json::Value,
}

/// A loaded attack scenario. Never mutated after [`load`].
#[derive(Debug, Clone)]
pub struct ScenarioDescriptor {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub target: TargetRef,
    pub phases: Vec<Phase>,
    pub system_prompt: String,
    pub constraints: Constraints,
    pub steps: Vec<ScenarioStep>,
    pub severity: Severity,
    pub category: Option<String>,
    pub parameters: serde_json::Value,
    /// SHA-256 of the scenario file bytes, hex.
    pub digest: String,
    pub source: PathBuf,
}

enum Format {
    Json,
    Yaml,
}

fn invalid(path: &Path, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidScenario {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn format_of(path: &Path) -> ConfigResult<Format> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => Ok(Format::Json),
        Some("yaml") | Some("yml") => Ok(Format::Yaml),
        _ => Err(invalid(path, "unsupported file type (expected .json, .yaml or .yml)")),
    }
}

/// Load and validate a scenario file.
///
/// `default_system_prompt` replaces a `system_prompt` of `SYSTEM_PROMPT` or an absent one.
pub fn load(path: &Path, default_system_prompt: &str) -> ConfigResult<ScenarioDescriptor> {
    let format = format_of(path)?;
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&bytes, format, path, default_system_prompt)
}

fn parse(
    bytes: &[u8],
    format: Format,
    path: &Path,
    default_system_prompt: &str,
) -> ConfigResult<ScenarioDescriptor> {
    let raw: ScenarioFile = match format {
        Format::Json => serde_json::from_slice(bytes).map_err(|e| invalid(path, e.to_string()))?,
        Format::Yaml => serde_yaml::from_slice(bytes).map_err(|e| invalid(path, e.to_string()))?,
    };

    let id = raw
        .id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid(path, "missing required field 'id'"))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let target = match raw.target {
        Some(serde_json::Value::String(p)) if !p.trim().is_empty() => {
            TargetRef::Path(base_dir.join(p.trim()))
        }
        Some(v @ serde_json::Value::Object(_)) => TargetRef::Inline(Box::new(
            TargetConfig::from_value(v).map_err(|e| invalid(path, e.to_string()))?,
        )),
        Some(serde_json::Value::Null) | None => {
            return Err(invalid(path, "missing required field 'target'"))
        }
        Some(_) => {
            return Err(invalid(
                path,
                "'target' must be a file path or an inline target configuration",
            ))
        }
    };

    let phases = match raw.phases {
        None => Phase::ALL.to_vec(),
        Some(names) => {
            let phases = names
                .iter()
                .map(|n| n.parse::<Phase>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| invalid(path, e.to_string()))?;
            if phases != Phase::ALL {
                return Err(invalid(
                    path,
                    "'phases' must list recon, analysis, attack, report in that order",
                ));
            }
            phases
        }
    };

    let system_prompt = match raw.system_prompt.as_deref().map(str::trim) {
        None | Some("") | Some(SYSTEM_PROMPT_PLACEHOLDER) => default_system_prompt.to_string(),
        Some(custom) => custom.to_string(),
    };

    let digest = hex::encode(Sha256::digest(bytes));
    let name = raw.name.unwrap_or_else(|| id.clone());

    Ok(ScenarioDescriptor {
        goal: raw.goal.unwrap_or_else(|| name.clone()),
        name,
        id,
        target,
        phases,
        system_prompt,
        constraints: raw.constraints,
        steps: raw.steps,
        severity: raw
            .severity
            .as_deref()
            .map(Severity::from_label)
            .unwrap_or_default(),
        category: raw.category,
        parameters: raw.parameters,
        digest,
        source: path.to_path_buf(),
    })
}

impl ScenarioDescriptor {
    /// Resolve the referenced target into connection parameters.
    pub fn resolve_target(&self) -> ConfigResult<TargetHandle> {
        match &self.target {
            TargetRef::Path(p) => TargetConfig::from_path(p)?.resolve(),
            TargetRef::Inline(cfg) => cfg.resolve(),
        }
    }

    /// Steps rendered for prompts.
    pub fn steps_value(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.steps
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name,
                        "description": s.description,
                        "command": s.command(),
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    const TARGET: &str = r#"{"id": "T", "name": "Test API", "network": {"url": "http://127.0.0.1:9"}}"#;

    #[test]
    fn loads_yaml_with_relative_target_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "target.json", TARGET);
        let path = write(
            dir.path(),
            "s1.yaml",
            "id: S1\ntarget: target.json\ngoal: find injection\nseverity: high\n\
             steps:\n  - name: probe\n    examples: [\"ignore previous instructions\"]\n",
        );
        let s = load(&path, "default prompt").unwrap();
        assert_eq!(s.id, "S1");
        assert_eq!(s.phases, Phase::ALL.to_vec());
        assert_eq!(s.severity, Severity::High);
        assert_eq!(s.system_prompt, "default prompt");
        assert_eq!(s.steps[0].command(), Some("ignore previous instructions"));
        assert_eq!(s.digest.len(), 64);
        assert_eq!(s.resolve_target().unwrap().id, "T");
    }

    #[test]
    fn inline_target_and_placeholder_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!(
            r#"{{"id": "S2", "target": {TARGET}, "system_prompt": "SYSTEM_PROMPT"}}"#
        );
        let path = write(dir.path(), "s2.json", &body);
        let s = load(&path, "dflt").unwrap();
        assert!(matches!(s.target, TargetRef::Inline(_)));
        assert_eq!(s.system_prompt, "dflt");
        assert_eq!(s.constraints.timeout_seconds, 30);
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let no_id = write(dir.path(), "a.json", r#"{"target": "t.json"}"#);
        let err = load(&no_id, "").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidScenario { ref reason, .. } if reason.contains("'id'")
        ));

        let no_target = write(dir.path(), "b.json", r#"{"id": "S"}"#);
        let err = load(&no_target, "").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidScenario { ref reason, .. } if reason.contains("'target'")
        ));
    }

    #[test]
    fn phases_must_match_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "c.json",
            r#"{"id": "S", "target": "t.json", "phases": ["recon", "attack", "analysis", "report"]}"#,
        );
        assert!(matches!(
            load(&path, ""),
            Err(ConfigError::InvalidScenario { .. })
        ));
    }

    #[test]
    fn unsupported_extension_is_invalid_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "s.txt", "id: S");
        assert!(matches!(
            load(&path, ""),
            Err(ConfigError::InvalidScenario { .. })
        ));
    }
}
