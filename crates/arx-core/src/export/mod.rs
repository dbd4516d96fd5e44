//! Findings Exporter: delivers Report findings to a tracking sink idempotently.
//!
//! Each finding's dedup key maps to a deterministic sink identifier. Sinks
//! implement find-or-create on that identifier, so exporting the same set
//! twice leaves exactly one entry per key.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::{ConfigResult, ExportError};
use crate::model::Finding;
use crate::retry::RetryPolicy;
use crate::settings::{ReporterKind, Settings};

pub mod defectdojo;
pub mod local;
pub mod memory;

pub use defectdojo::DefectDojoSink;
pub use local::LocalSink;
pub use memory::MemorySink;

pub type SinkResult<T> = Result<T, ExportError>;

/// Result of one find-or-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    /// Sink-native id of the entry.
    pub entry_id: String,
    /// `false` when the entry already existed.
    pub created: bool,
}

#[async_trait]
pub trait FindingsSink: Send + Sync {
    /// Return the entry for `sink_id`, creating it from `finding` when absent.
    async fn find_or_create(&self, sink_id: &str, finding: &Finding) -> SinkResult<SinkOutcome>;

    /// Cheap reachability / credentials check.
    async fn test_connection(&self) -> SinkResult<()> {
        Ok(())
    }

    fn sink_name(&self) -> &'static str;
}

/// Sink selected by `REPORTER_TYPE`; `None` when export is disabled.
pub fn sink_from_settings(settings: &Settings) -> ConfigResult<Option<Arc<dyn FindingsSink>>> {
    let sink: Arc<dyn FindingsSink> = match settings.reporter {
        ReporterKind::DefectDojo => Arc::new(DefectDojoSink::from_settings(settings)?),
        ReporterKind::Local => Arc::new(LocalSink::new(settings.report_dir.clone())),
        ReporterKind::None => return Ok(None),
    };
    Ok(Some(sink))
}

/// Deterministic sink identifier for a dedup key.
pub fn sink_identifier(dedup_key: &str) -> String {
    let digest = hex::encode(Sha256::digest(dedup_key.as_bytes()));
    format!("arx-{}", &digest[..32])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFinding {
    pub dedup_key: String,
    pub sink_id: String,
    pub entry_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    pub sink: String,
    /// Entries created by this call.
    pub created: Vec<ExportedFinding>,
    /// Entries that were already present.
    pub existing: Vec<ExportedFinding>,
}

impl ExportResult {
    pub fn total(&self) -> usize {
        self.created.len() + self.existing.len()
    }
}

pub struct FindingsExporter {
    sink: Arc<dyn FindingsSink>,
    policy: RetryPolicy,
}

impl FindingsExporter {
    pub fn new(sink: Arc<dyn FindingsSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.sink_name()
    }

    pub async fn test_connection(&self) -> SinkResult<()> {
        self.sink.test_connection().await
    }

    /// Export every finding, at most one sink entry per dedup key.
    ///
    /// Transport errors are retried up to the policy's attempt ceiling;
    /// a rejection stops the export at once. Entries delivered before a
    /// failure stay in the sink, and a later export finds them.
    pub async fn export(&self, findings: &[Finding]) -> SinkResult<ExportResult> {
        let mut result = ExportResult {
            sink: self.sink.sink_name().to_string(),
            ..ExportResult::default()
        };
        let mut seen = HashSet::new();

        for finding in findings {
            if !seen.insert(finding.dedup_key.as_str()) {
                debug!(dedup_key = %finding.dedup_key, "duplicate key in batch, skipped");
                continue;
            }
            let sink_id = sink_identifier(&finding.dedup_key);
            let outcome = self.deliver(&sink_id, finding).await?;
            let exported = ExportedFinding {
                dedup_key: finding.dedup_key.clone(),
                sink_id,
                entry_id: outcome.entry_id,
            };
            if outcome.created {
                result.created.push(exported);
            } else {
                result.existing.push(exported);
            }
        }

        info!(
            sink = %result.sink,
            created = result.created.len(),
            existing = result.existing.len(),
            "findings exported"
        );
        Ok(result)
    }

    async fn deliver(&self, sink_id: &str, finding: &Finding) -> SinkResult<SinkOutcome> {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.sink.find_or_create(sink_id, finding),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(ExportError::transport(format!(
                    "no response within {}s",
                    self.policy.attempt_timeout.as_secs()
                ))),
            };
            match outcome {
                Ok(o) => return Ok(o),
                Err(e) if e.is_retryable() && self.policy.allows_retry(attempt) => {
                    let backoff = self.policy.backoff(attempt, None);
                    warn!(
                        error = %e,
                        retry = attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying export"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
