//! Error types for every component of the core.
//!
//! Errors fall into four groups:
//! - configuration errors (bad scenario, target config, arguments, settings), never retried
//! - transient external errors (backend timeout / rate limit, export transport), retried locally
//! - non-transient external errors (protocol, auth, sink rejection), surfaced immediately
//! - invariant violations (missing prerequisite on resume), surfaced with the offending phase

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Phase;

/// Flat error tag recorded on failed phase records and run results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidScenario,
    InvalidTarget,
    InvalidArgument,
    InvalidSettings,
    BackendTimeout,
    BackendRateLimit,
    BackendUnavailable,
    BackendProtocol,
    TargetUnreachable,
    TargetAuth,
    TargetProtocol,
    Cancelled,
    Checkpoint,
    ExportTransport,
    ExportRejected,
    MissingPrerequisite,
    CheckpointMismatch,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidScenario => "invalid_scenario",
            ErrorKind::InvalidTarget => "invalid_target",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::InvalidSettings => "invalid_settings",
            ErrorKind::BackendTimeout => "backend_timeout",
            ErrorKind::BackendRateLimit => "backend_rate_limit",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::BackendProtocol => "backend_protocol",
            ErrorKind::TargetUnreachable => "target_unreachable",
            ErrorKind::TargetAuth => "target_auth",
            ErrorKind::TargetProtocol => "target_protocol",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Checkpoint => "checkpoint",
            ErrorKind::ExportTransport => "export_transport",
            ErrorKind::ExportRejected => "export_rejected",
            ErrorKind::MissingPrerequisite => "missing_prerequisite",
            ErrorKind::CheckpointMismatch => "checkpoint_mismatch",
            ErrorKind::Internal => "internal",
        }
    }

    /// Parse a tag previously produced by [`ErrorKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "invalid_scenario" => ErrorKind::InvalidScenario,
            "invalid_target" => ErrorKind::InvalidTarget,
            "invalid_argument" => ErrorKind::InvalidArgument,
            "invalid_settings" => ErrorKind::InvalidSettings,
            "backend_timeout" => ErrorKind::BackendTimeout,
            "backend_rate_limit" => ErrorKind::BackendRateLimit,
            "backend_unavailable" => ErrorKind::BackendUnavailable,
            "backend_protocol" => ErrorKind::BackendProtocol,
            "target_unreachable" => ErrorKind::TargetUnreachable,
            "target_auth" => ErrorKind::TargetAuth,
            "target_protocol" => ErrorKind::TargetProtocol,
            "cancelled" => ErrorKind::Cancelled,
            "checkpoint" => ErrorKind::Checkpoint,
            "export_transport" => ErrorKind::ExportTransport,
            "export_rejected" => ErrorKind::ExportRejected,
            "missing_prerequisite" => ErrorKind::MissingPrerequisite,
            "checkpoint_mismatch" => ErrorKind::CheckpointMismatch,
            "internal" => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration errors. Raised before any phase executes.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid scenario {path}: {reason}")]
    InvalidScenario { path: String, reason: String },

    #[error("invalid target config: {reason}")]
    InvalidTarget { reason: String },

    #[error("invalid argument {argument}: {reason}")]
    InvalidArgument { argument: String, reason: String },

    #[error("invalid settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::InvalidScenario { .. } | ConfigError::Io { .. } => {
                ErrorKind::InvalidScenario
            }
            ConfigError::InvalidTarget { .. } => ErrorKind::InvalidTarget,
            ConfigError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            ConfigError::InvalidSettings { .. } => ErrorKind::InvalidSettings,
        }
    }
}

/// Reasoning backend errors.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    /// No response within the per-attempt deadline.
    #[error("backend timed out after {after:?}")]
    BackendTimeout { after: Duration },

    /// Backend signalled throttling.
    #[error("backend rate limited: retry after {retry_after:?}")]
    BackendRateLimit { retry_after: Option<Duration> },

    /// Connection failure or 5xx from the backend.
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// Malformed or unusable response. Not retried.
    #[error("backend protocol error: {message}")]
    BackendProtocol { message: String },

    #[error("reasoning call cancelled")]
    Cancelled,
}

impl ReasoningError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReasoningError::BackendTimeout { .. }
                | ReasoningError::BackendRateLimit { .. }
                | ReasoningError::BackendUnavailable { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReasoningError::BackendTimeout { .. } => ErrorKind::BackendTimeout,
            ReasoningError::BackendRateLimit { .. } => ErrorKind::BackendRateLimit,
            ReasoningError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            ReasoningError::BackendProtocol { .. } => ErrorKind::BackendProtocol,
            ReasoningError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ReasoningError::BackendProtocol {
            message: message.into(),
        }
    }
}

/// A reasoning call that gave up, with the attempts it made before doing so.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct FailedCall {
    pub error: ReasoningError,
    pub attempts: u32,
}

impl FailedCall {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Target adapter errors. Probes are never retried by the adapter.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("target unreachable at {url}: {message}")]
    TargetUnreachable { url: String, message: String },

    #[error("target rejected credentials (status {status})")]
    TargetAuth { status: u16 },

    #[error("target protocol error: {message}")]
    TargetProtocol { message: String },

    #[error("probe cancelled")]
    Cancelled,
}

impl TargetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TargetError::TargetUnreachable { .. } => ErrorKind::TargetUnreachable,
            TargetError::TargetAuth { .. } => ErrorKind::TargetAuth,
            TargetError::TargetProtocol { .. } => ErrorKind::TargetProtocol,
            TargetError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Checkpoint store errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("no checkpoint for {scenario_id}/{phase}")]
    NotFound { scenario_id: String, phase: Phase },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(e: rusqlite::Error) -> Self {
        CheckpointError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialization(e.to_string())
    }
}

/// Findings export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Network failure, throttling or 5xx. Retryable.
    #[error("export transport error: {message}")]
    ExportTransport { message: String },

    /// The sink refused the entry. Surfaced to the operator.
    #[error("sink rejected finding {dedup_key}: {message}")]
    ExportRejected { dedup_key: String, message: String },
}

impl ExportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExportError::ExportTransport { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::ExportTransport { .. } => ErrorKind::ExportTransport,
            ExportError::ExportRejected { .. } => ErrorKind::ExportRejected,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ExportError::ExportTransport {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(e: reqwest::Error) -> Self {
        ExportError::ExportTransport {
            message: e.to_string(),
        }
    }
}

/// Failure of a single phase execution.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PhaseError {
    pub kind: ErrorKind,
    pub message: String,
    /// Attempts of the reasoning call that failed; 0 when no call failed.
    pub attempt_count: u32,
}

impl PhaseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempt_count: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempt_count = attempts;
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "run cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl From<ReasoningError> for PhaseError {
    fn from(e: ReasoningError) -> Self {
        PhaseError::new(e.kind(), e.to_string())
    }
}

impl From<FailedCall> for PhaseError {
    fn from(e: FailedCall) -> Self {
        PhaseError::from(e.error).with_attempts(e.attempts)
    }
}

impl From<TargetError> for PhaseError {
    fn from(e: TargetError) -> Self {
        PhaseError::new(e.kind(), e.to_string())
    }
}

impl From<CheckpointError> for PhaseError {
    fn from(e: CheckpointError) -> Self {
        PhaseError::new(ErrorKind::Checkpoint, e.to_string())
    }
}

/// Errors that stop a run before or between phases.
///
/// Phase failures are not errors at this level: they end the run as
/// [`RunStatus::Aborted`](crate::model::RunStatus) inside a normal result.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("cannot start from {start}: phase {phase} has no succeeded checkpoint")]
    MissingPrerequisite { phase: Phase, start: Phase },

    #[error(
        "checkpoint for phase {phase} was produced against target {found}, current target is {expected}"
    )]
    CheckpointMismatch {
        phase: Phase,
        expected: String,
        found: String,
    },

    #[error("no agent registered for phase {phase}")]
    NoAgent { phase: Phase },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::MissingPrerequisite { .. } => ErrorKind::MissingPrerequisite,
            RunError::CheckpointMismatch { .. } => ErrorKind::CheckpointMismatch,
            RunError::NoAgent { .. } => ErrorKind::Internal,
            RunError::Config(e) => e.kind(),
            RunError::Checkpoint(_) => ErrorKind::Checkpoint,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ReasoningResult<T> = Result<T, ReasoningError>;
pub type CallResult<T> = Result<T, FailedCall>;
pub type TargetResult<T> = Result<T, TargetError>;
pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_reasoning_errors_are_retryable() {
        assert!(ReasoningError::BackendTimeout {
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ReasoningError::BackendRateLimit { retry_after: None }.is_retryable());
        assert!(!ReasoningError::protocol("bad json").is_retryable());
        assert!(!ReasoningError::Cancelled.is_retryable());
    }

    #[test]
    fn cancelled_is_distinct_from_timeout() {
        let cancelled: PhaseError = ReasoningError::Cancelled.into();
        let timeout: PhaseError = ReasoningError::BackendTimeout {
            after: Duration::from_secs(2),
        }
        .into();
        assert!(cancelled.is_cancelled());
        assert_eq!(timeout.kind, ErrorKind::BackendTimeout);
        assert!(!timeout.is_cancelled());
    }

    #[test]
    fn failed_call_keeps_its_attempt_count() {
        let failed = FailedCall {
            error: ReasoningError::BackendTimeout {
                after: Duration::from_secs(1),
            },
            attempts: 3,
        };
        let phase: PhaseError = failed.into();
        assert_eq!(phase.kind, ErrorKind::BackendTimeout);
        assert_eq!(phase.attempt_count, 3);
        assert_eq!(PhaseError::cancelled().attempt_count, 0);
    }

    #[test]
    fn export_errors_classify() {
        assert!(ExportError::transport("503").is_retryable());
        let rejected = ExportError::ExportRejected {
            dedup_key: "F1".into(),
            message: "title required".into(),
        };
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.kind(), ErrorKind::ExportRejected);
    }

    #[test]
    fn error_kind_tags_round_trip_through_parse() {
        for kind in [
            ErrorKind::BackendTimeout,
            ErrorKind::Cancelled,
            ErrorKind::MissingPrerequisite,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("nope"), None);
    }
}
