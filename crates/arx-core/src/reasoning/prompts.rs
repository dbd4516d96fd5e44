//! Prompt templates as injected configuration.
//!
//! The orchestration core never inspects template text; it only names a
//! template (`agent.template`) and supplies variables.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use super::Prompt;
use crate::errors::{ConfigError, ConfigResult};

const BUILTIN: &str = include_str!("../../prompts/default.yaml");

/// Templates every agent relies on.
pub const REQUIRED_TEMPLATES: &[&str] = &[
    "recon.initial_recon",
    "recon.additional_recon",
    "recon.force_completion",
    "analysis.cot_reasoning",
    "attack.attack_evaluation",
    "attack.replan",
    "report.report_synthesis",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentPrompts {
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub prompt_templates: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct PromptCatalog {
    agents: BTreeMap<String, AgentPrompts>,
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("static regex"))
}

fn render(template: &str, vars: &serde_json::Map<String, serde_json::Value>) -> String {
    placeholder()
        .replace_all(template, |caps: &regex::Captures<'_>| match vars.get(&caps[1]) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => {
                serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
            }
            None => caps[0].to_string(),
        })
        .into_owned()
}

impl PromptCatalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> ConfigResult<Self> {
        Self::from_yaml_str(BUILTIN, "<builtin>")
    }

    pub fn from_yaml_str(text: &str, origin: &str) -> ConfigResult<Self> {
        let agents: BTreeMap<String, AgentPrompts> =
            serde_yaml::from_str(text).map_err(|e| ConfigError::InvalidSettings {
                reason: format!("prompt catalog {origin}: {e}"),
            })?;
        Ok(Self { agents })
    }

    /// Load a catalog file, or a directory of `<agent>_agent.yaml` files.
    ///
    /// Agents missing from a directory fall back to the built-in catalog.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let read = |p: &Path| {
            std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                path: p.display().to_string(),
                source,
            })
        };
        if !path.is_dir() {
            return Self::from_yaml_str(&read(path)?, &path.display().to_string());
        }
        let mut catalog = Self::builtin()?;
        let entries = std::fs::read_dir(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        for entry in entries.flatten() {
            let file = entry.path();
            let Some(agent) = file
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix("_agent.yaml"))
                .map(str::to_string)
            else {
                continue;
            };
            let prompts: AgentPrompts =
                serde_yaml::from_str(&read(&file)?).map_err(|e| ConfigError::InvalidSettings {
                    reason: format!("prompt file {}: {e}", file.display()),
                })?;
            catalog.agents.insert(agent, prompts);
        }
        Ok(catalog)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.lookup(reference).is_some()
    }

    /// Fail if any template the agents use is missing.
    pub fn validate(&self) -> ConfigResult<()> {
        let missing: Vec<&str> = REQUIRED_TEMPLATES
            .iter()
            .copied()
            .filter(|r| !self.contains(r))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidSettings {
                reason: format!("prompt catalog is missing templates: {}", missing.join(", ")),
            })
        }
    }

    fn lookup(&self, reference: &str) -> Option<(&AgentPrompts, &String)> {
        let (agent, template) = reference.split_once('.')?;
        let prompts = self.agents.get(agent)?;
        prompts.prompt_templates.get(template).map(|t| (prompts, t))
    }

    /// Render `agent.template` with `vars`. Unknown placeholders are left as-is.
    pub fn render(
        &self,
        reference: &str,
        vars: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<Prompt> {
        let (prompts, template) = self.lookup(reference)?;
        Some(Prompt {
            operation: reference.to_string(),
            system: render(&prompts.system_prompt, vars).trim().to_string(),
            user: render(template, vars).trim().to_string(),
        })
    }
}
