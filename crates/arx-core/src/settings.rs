//! Process-level settings read from the environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};
use crate::retry::RetryPolicy;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a cybersecurity expert conducting authorized \
security testing. Work through the requested steps against the configured target only, \
report what you observe, and answer strictly in the JSON shape you are asked for.";

/// Which findings sink `--export-findings` delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    DefectDojo,
    Local,
    None,
}

impl FromStr for ReporterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "defectdojo" | "dojo" => Ok(ReporterKind::DefectDojo),
            "local" => Ok(ReporterKind::Local),
            "none" | "noop" | "" => Ok(ReporterKind::None),
            other => Err(ConfigError::InvalidSettings {
                reason: format!("unknown reporter type '{other}' (defectdojo|local|none)"),
            }),
        }
    }
}

/// Settings shared by the reasoning client, target adapter, orchestrator and exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Reasoning backend API key.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Model name sent to the backend.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-attempt deadline for reasoning calls, in seconds.
    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_timeout_secs: u64,

    /// Per-probe deadline against the target, in seconds.
    #[serde(default = "default_io_timeout")]
    pub target_timeout_secs: u64,

    /// Deadline for findings sink requests, in seconds.
    #[serde(default = "default_io_timeout")]
    pub tracker_timeout_secs: u64,

    /// Attempt ceiling for transient reasoning and export failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Bounded pool size for sub-tasks within a phase.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_recon_calls")]
    pub max_recon_calls: u32,

    #[serde(default = "default_max_attack_calls")]
    pub max_attack_calls: u32,

    /// Follow-up rounds inside Analysis and Attack.
    #[serde(default = "default_cooperative_iterations")]
    pub max_cooperative_iterations: u32,

    #[serde(default = "default_reporter")]
    pub reporter: ReporterKind,

    #[serde(default)]
    pub reporter_url: Option<String>,

    #[serde(default, skip_serializing)]
    pub reporter_token: Option<String>,

    #[serde(default = "default_tracker_id")]
    pub tracker_test_id: u64,

    #[serde(default = "default_tracker_id")]
    pub tracker_user_id: u64,

    #[serde(default)]
    pub tracker_engagement_name: Option<String>,

    /// Output directory of the local sink and run reports.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Prompt catalog override; the built-in catalog is used when absent.
    #[serde(default)]
    pub prompts_path: Option<PathBuf>,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub log_prompts: bool,

    #[serde(default)]
    pub log_completions: bool,
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_reasoning_timeout() -> u64 {
    120
}

fn default_io_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    4
}

fn default_concurrency() -> usize {
    4
}

fn default_max_recon_calls() -> u32 {
    15
}

fn default_max_attack_calls() -> u32 {
    20
}

fn default_cooperative_iterations() -> u32 {
    2
}

fn default_reporter() -> ReporterKind {
    ReporterKind::Local
}

fn default_tracker_id() -> u64 {
    1
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            reasoning_timeout_secs: default_reasoning_timeout(),
            target_timeout_secs: default_io_timeout(),
            tracker_timeout_secs: default_io_timeout(),
            max_attempts: default_max_attempts(),
            concurrency: default_concurrency(),
            max_recon_calls: default_max_recon_calls(),
            max_attack_calls: default_max_attack_calls(),
            max_cooperative_iterations: default_cooperative_iterations(),
            reporter: default_reporter(),
            reporter_url: None,
            reporter_token: None,
            tracker_test_id: default_tracker_id(),
            tracker_user_id: default_tracker_id(),
            tracker_engagement_name: None,
            report_dir: default_report_dir(),
            prompts_path: None,
            system_prompt: default_system_prompt(),
            log_prompts: false,
            log_completions: false,
        }
    }
}

/// Parse a set variable; a value that does not parse is an error naming it.
fn env_parse<T>(name: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = env_nonempty(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| ConfigError::InvalidSettings {
            reason: format!("{name}={raw:?} is invalid: {e}"),
        })
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Create settings from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `OPENAI_API_KEY` | Reasoning backend key |
    /// | `OPENAI_MODEL` | Model name (default `gpt-4`) |
    /// | `OPENAI_BASE_URL` | Backend base URL |
    /// | `LLM_TEMPERATURE` | Sampling temperature |
    /// | `REQUEST_TIMEOUT_OPENAI` | Reasoning attempt timeout (s) |
    /// | `REQUEST_TIMEOUT_TARGET_SYSTEM` | Probe timeout (s) |
    /// | `REQUEST_TIMEOUT_VULNERABILITY_TRACKER` | Sink timeout (s) |
    /// | `ARX_MAX_ATTEMPTS` | Reasoning / export attempt ceiling |
    /// | `ARX_CONCURRENCY` | Sub-task pool size per phase |
    /// | `MAX_RECON_LLM_CALLS`, `MAX_ATTACK_LLM_CALLS` | Per-phase call budgets |
    /// | `MAX_COOPERATIVE_ITERATIONS` | Follow-up rounds in Analysis / Attack |
    /// | `REPORTER_TYPE` | `defectdojo`, `local` or `none` |
    /// | `REPORTER_URL`, `REPORTER_TOKEN` | DefectDojo endpoint and token |
    /// | `TRACKER_TEST_ID`, `TRACKER_USER_ID`, `TRACKER_ENGAGEMENT_NAME` | DefectDojo fields |
    /// | `ARX_REPORT_DIR` | Local report directory |
    /// | `ARX_PROMPTS` | Prompt catalog path |
    /// | `SYSTEM_PROMPT` | Default system prompt |
    /// | `ARX_LOG_PROMPTS`, `ARX_LOG_COMPLETIONS` | Log prompt / completion text |
    ///
    /// Unset variables take their defaults. A set variable that does not
    /// parse (an unknown `REPORTER_TYPE`, a non-numeric limit) fails with
    /// [`ConfigError::InvalidSettings`] naming it; call
    /// [`Settings::validate`] to reject incomplete configurations.
    pub fn from_env() -> ConfigResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_key: env_nonempty("OPENAI_API_KEY"),
            model: env_nonempty("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: env_nonempty("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            temperature: env_parse("LLM_TEMPERATURE")?.unwrap_or(defaults.temperature),
            max_tokens: env_parse("LLM_MAX_TOKENS")?.unwrap_or(defaults.max_tokens),
            reasoning_timeout_secs: env_parse("REQUEST_TIMEOUT_OPENAI")?
                .unwrap_or(defaults.reasoning_timeout_secs),
            target_timeout_secs: env_parse("REQUEST_TIMEOUT_TARGET_SYSTEM")?
                .unwrap_or(defaults.target_timeout_secs),
            tracker_timeout_secs: env_parse("REQUEST_TIMEOUT_VULNERABILITY_TRACKER")?
                .unwrap_or(defaults.tracker_timeout_secs),
            max_attempts: env_parse("ARX_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            concurrency: env_parse("ARX_CONCURRENCY")?.unwrap_or(defaults.concurrency),
            max_recon_calls: env_parse("MAX_RECON_LLM_CALLS")?
                .unwrap_or(defaults.max_recon_calls),
            max_attack_calls: env_parse("MAX_ATTACK_LLM_CALLS")?
                .unwrap_or(defaults.max_attack_calls),
            max_cooperative_iterations: env_parse("MAX_COOPERATIVE_ITERATIONS")?
                .unwrap_or(defaults.max_cooperative_iterations),
            reporter: env_parse("REPORTER_TYPE")?.unwrap_or(defaults.reporter),
            reporter_url: env_nonempty("REPORTER_URL"),
            reporter_token: env_nonempty("REPORTER_TOKEN")
                .or_else(|| env_nonempty("REPORTER_API_KEY")),
            tracker_test_id: env_parse("TRACKER_TEST_ID")?.unwrap_or(defaults.tracker_test_id),
            tracker_user_id: env_parse("TRACKER_USER_ID")?.unwrap_or(defaults.tracker_user_id),
            tracker_engagement_name: env_nonempty("TRACKER_ENGAGEMENT_NAME"),
            report_dir: env_nonempty("ARX_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.report_dir),
            prompts_path: env_nonempty("ARX_PROMPTS").map(PathBuf::from),
            system_prompt: env_nonempty("SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            log_prompts: env_flag("ARX_LOG_PROMPTS"),
            log_completions: env_flag("ARX_LOG_COMPLETIONS"),
        })
    }

    /// Check the settings needed for a run.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: &str| ConfigError::InvalidSettings {
            reason: reason.to_string(),
        };
        if self.api_key.is_none() {
            return Err(invalid("OPENAI_API_KEY environment variable is required"));
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::InvalidSettings {
                reason: format!("OPENAI_BASE_URL is not a valid URL: {}", self.base_url),
            });
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max attempts must be at least 1"));
        }
        if self.reporter == ReporterKind::DefectDojo
            && (self.reporter_url.is_none() || self.reporter_token.is_none())
        {
            return Err(invalid(
                "REPORTER_TYPE=defectdojo requires REPORTER_URL and REPORTER_TOKEN",
            ));
        }
        Ok(())
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_reporter(mut self, reporter: ReporterKind) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoning_timeout_secs)
    }

    pub fn target_timeout(&self) -> Duration {
        Duration::from_secs(self.target_timeout_secs)
    }

    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_secs)
    }

    /// Retry policy for reasoning calls.
    pub fn reasoning_retry(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_attempt_timeout(self.reasoning_timeout())
    }

    /// Retry policy for sink deliveries.
    pub fn export_retry(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_attempt_timeout(self.tracker_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "OPENAI_API_KEY",
        "OPENAI_MODEL",
        "ARX_CONCURRENCY",
        "REPORTER_TYPE",
        "REPORTER_URL",
        "REPORTER_TOKEN",
        "REQUEST_TIMEOUT_OPENAI",
    ];

    fn clear() {
        for v in VARS {
            std::env::remove_var(v);
        }
    }

    #[test]
    #[serial]
    fn from_env_applies_defaults() {
        clear();
        let s = Settings::from_env().unwrap();
        assert_eq!(s.model, "gpt-4");
        assert_eq!(s.concurrency, 4);
        assert_eq!(s.reporter, ReporterKind::Local);
        assert_eq!(s.reasoning_timeout(), Duration::from_secs(120));
        assert!(s.validate().is_err(), "missing api key must fail validation");
    }

    #[test]
    #[serial]
    fn from_env_reads_overrides() {
        clear();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("OPENAI_MODEL", "gpt-4o");
        std::env::set_var("ARX_CONCURRENCY", "8");
        std::env::set_var("REPORTER_TYPE", "none");
        std::env::set_var("REQUEST_TIMEOUT_OPENAI", "15");
        let s = Settings::from_env().unwrap();
        clear();

        assert_eq!(s.api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.model, "gpt-4o");
        assert_eq!(s.concurrency, 8);
        assert_eq!(s.reporter, ReporterKind::None);
        assert_eq!(s.reasoning_retry().attempt_timeout, Duration::from_secs(15));
        s.validate().unwrap();
    }

    #[test]
    #[serial]
    fn unparseable_values_are_rejected_by_name() {
        clear();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("REPORTER_TYPE", "defctdojo");
        let reporter = Settings::from_env();
        std::env::set_var("REPORTER_TYPE", "none");
        std::env::set_var("ARX_CONCURRENCY", "abc");
        let concurrency = Settings::from_env();
        clear();

        match reporter {
            Err(ConfigError::InvalidSettings { reason }) => {
                assert!(reason.contains("REPORTER_TYPE"), "{reason}");
                assert!(reason.contains("defctdojo"), "{reason}");
            }
            other => panic!("expected InvalidSettings, got {other:?}"),
        }
        match concurrency {
            Err(ConfigError::InvalidSettings { reason }) => {
                assert!(reason.contains("ARX_CONCURRENCY"), "{reason}");
            }
            other => panic!("expected InvalidSettings, got {other:?}"),
        }
    }

    #[test]
    fn defectdojo_requires_url_and_token() {
        let s = Settings::default()
            .with_api_key("k")
            .with_reporter(ReporterKind::DefectDojo);
        assert!(matches!(
            s.validate(),
            Err(ConfigError::InvalidSettings { .. })
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let s = Settings::default().with_api_key("k").with_concurrency(0);
        assert!(s.validate().is_err());
    }
}
