//! Core data model: phases, phase records, findings and run results.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ErrorKind, PhaseError};

/// One stage of the fixed Recon → Analysis → Attack → Report sequence.
///
/// `Ord` follows the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Recon,
    Analysis,
    Attack,
    Report,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [Phase::Recon, Phase::Analysis, Phase::Attack, Phase::Report];

    pub fn first() -> Phase {
        Self::ALL[0]
    }

    pub fn index(self) -> usize {
        match self {
            Phase::Recon => 0,
            Phase::Analysis => 1,
            Phase::Attack => 2,
            Phase::Report => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Recon => "recon",
            Phase::Analysis => "analysis",
            Phase::Attack => "attack",
            Phase::Report => "report",
        }
    }

    /// Phases strictly before `self`.
    pub fn predecessors(self) -> &'static [Phase] {
        &Self::ALL[..self.index()]
    }

    /// `self` and every phase after it.
    pub fn remaining(self) -> &'static [Phase] {
        &Self::ALL[self.index()..]
    }

    /// Validate a resume point given on the command line.
    ///
    /// Only phases after the first are accepted; anything else (including
    /// the first phase or names past the last one) is a configuration error.
    pub fn parse_start(value: &str) -> Result<Phase, ConfigError> {
        let phase: Phase = value.parse()?;
        if phase == Phase::first() {
            return Err(ConfigError::InvalidArgument {
                argument: "start-from".into(),
                reason: format!(
                    "'{value}' is the first phase; omit --start-from to run from the beginning"
                ),
            });
        }
        Ok(phase)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recon" | "reconnaissance" => Ok(Phase::Recon),
            "analysis" | "analyze" => Ok(Phase::Analysis),
            "attack" => Ok(Phase::Attack),
            "report" => Ok(Phase::Report),
            _ => Err(ConfigError::InvalidArgument {
                argument: "phase".into(),
                reason: format!(
                    "unknown phase '{s}' (expected one of: recon, analysis, attack, report)"
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhaseStatus::Pending),
            "running" => Some(PhaseStatus::Running),
            "succeeded" => Some(PhaseStatus::Succeeded),
            "failed" => Some(PhaseStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry for one attempt against the reasoning backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number within the call.
    pub attempt: u32,
    /// Prompt template the call was made for (e.g. `analysis.cot_reasoning`).
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error_kind.is_none()
    }
}

/// Why a phase failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PhaseError> for PhaseFailure {
    fn from(e: &PhaseError) -> Self {
        Self {
            kind: e.kind,
            message: e.message.clone(),
        }
    }
}

/// Persisted outcome of one phase execution for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub scenario_id: String,
    pub phase: Phase,
    /// Run that produced this record.
    pub run_id: String,
    /// Target the phase was executed against.
    pub target_id: String,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<PhaseFailure>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Backend attempts made by this execution when it succeeded; attempts of
    /// the failing call when it failed.
    pub attempt_count: u32,
    /// Audit trail, one entry per backend attempt.
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

impl PhaseRecord {
    pub fn running(
        scenario_id: impl Into<String>,
        phase: Phase,
        run_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            phase,
            run_id: run_id.into(),
            target_id: target_id.into(),
            status: PhaseStatus::Running,
            output: None,
            failure: None,
            started_at: Some(Utc::now()),
            finished_at: None,
            attempt_count: 0,
            attempts: Vec::new(),
        }
    }

    pub fn succeed(mut self, output: serde_json::Value, attempts: Vec<AttemptRecord>) -> Self {
        self.status = PhaseStatus::Succeeded;
        self.output = Some(output);
        self.failure = None;
        self.attempt_count = attempts.len() as u32;
        self.finish(attempts)
    }

    /// The count reported for a failure is that of the failing call alone;
    /// `attempts` keeps every call the phase made.
    pub fn fail(mut self, error: &PhaseError, attempts: Vec<AttemptRecord>) -> Self {
        self.status = PhaseStatus::Failed;
        self.failure = Some(error.into());
        self.attempt_count = error.attempt_count;
        self.finish(attempts)
    }

    fn finish(mut self, attempts: Vec<AttemptRecord>) -> Self {
        self.finished_at = Some(Utc::now());
        self.attempts = attempts;
        self
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == PhaseStatus::Succeeded
    }
}

/// Finding severity, ordered from most to least severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Lenient mapping from free-form labels. Unknown labels map to `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            "info" | "informational" | "none" => Severity::Info,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

/// Points at the phase output that substantiates a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub phase: Phase,
    #[serde(default)]
    pub detail: String,
}

/// A structured security issue produced by the Report phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Unique key; at most one sink entry exists per key.
    pub dedup_key: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
    /// Confirmed by a successful attack rather than inferred.
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Aborted,
}

/// How a phase took part in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseDisposition {
    /// Loaded from a checkpoint; the agent did not run.
    Resumed,
    Executed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub disposition: PhaseDisposition,
    pub status: PhaseStatus,
    pub run_id: String,
    pub attempt_count: u32,
}

/// The phase that halted a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub scenario_id: String,
    pub target_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseOutcome>,
    /// Output of every succeeded phase, resumed or executed.
    pub outputs: BTreeMap<Phase, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Findings carried by the Report output, empty unless Report succeeded.
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Recon < Phase::Analysis);
        assert!(Phase::Attack < Phase::Report);
        assert_eq!(Phase::Attack.predecessors(), &[Phase::Recon, Phase::Analysis]);
        assert_eq!(Phase::Report.remaining(), &[Phase::Report]);
        assert!(Phase::Recon.predecessors().is_empty());
    }

    #[test]
    fn start_phase_rejects_first_and_unknown() {
        assert_eq!(Phase::parse_start("attack").unwrap(), Phase::Attack);
        assert_eq!(Phase::parse_start("Analysis").unwrap(), Phase::Analysis);
        assert!(matches!(
            Phase::parse_start("recon"),
            Err(ConfigError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Phase::parse_start("export"),
            Err(ConfigError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn record_counts_attempts_on_finish() {
        let attempt = AttemptRecord {
            attempt: 1,
            operation: "recon.initial_recon".into(),
            started_at: Utc::now(),
            duration_ms: 3,
            error_kind: None,
            message: None,
        };
        let record = PhaseRecord::running("S1", Phase::Recon, "run-1", "T")
            .succeed(serde_json::json!({"ok": true}), vec![attempt.clone(), attempt]);
        assert!(record.is_succeeded());
        assert_eq!(record.attempt_count, 2);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn failed_record_reports_the_failing_call_but_keeps_all_attempts() {
        let attempt = AttemptRecord {
            attempt: 1,
            operation: "attack.attack_evaluation".into(),
            started_at: Utc::now(),
            duration_ms: 3,
            error_kind: Some(ErrorKind::BackendTimeout),
            message: None,
        };
        let error = PhaseError::new(ErrorKind::BackendTimeout, "timed out").with_attempts(2);
        let record = PhaseRecord::running("S1", Phase::Attack, "run-1", "T")
            .fail(&error, vec![attempt.clone(), attempt.clone(), attempt.clone(), attempt]);
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.attempts.len(), 4);
    }

    #[test]
    fn severity_labels_are_lenient() {
        assert_eq!(Severity::from_label("HIGH"), Severity::High);
        assert_eq!(Severity::from_label("informational"), Severity::Info);
        assert_eq!(Severity::from_label("whatever"), Severity::Medium);
    }

    #[test]
    fn outputs_serialize_with_phase_keys() {
        let mut outputs = BTreeMap::new();
        outputs.insert(Phase::Recon, serde_json::json!({"a": 1}));
        let s = serde_json::to_string(&outputs).unwrap();
        assert_eq!(s, r#"{"recon":{"a":1}}"#);
    }
}
