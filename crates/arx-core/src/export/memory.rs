//! In-process sink for tests and embedding.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FindingsSink, SinkOutcome, SinkResult};
use crate::errors::ExportError;
use crate::model::Finding;

#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<BTreeMap<String, (String, Finding)>>,
    calls: AtomicUsize,
    transport_failures: AtomicU32,
    rejected: HashSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a transport error.
    pub fn failing_transport(self, n: u32) -> Self {
        self.transport_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Reject findings with this dedup key.
    pub fn rejecting(mut self, dedup_key: &str) -> Self {
        self.rejected.insert(dedup_key.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stored findings keyed by sink identifier.
    pub fn entries(&self) -> BTreeMap<String, Finding> {
        self.entries
            .lock()
            .map(|e| e.iter().map(|(k, (_, f))| (k.clone(), f.clone())).collect())
            .unwrap_or_default()
    }

    /// Whether an entry for `dedup_key` exists.
    pub fn contains_key(&self, dedup_key: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.values().any(|(_, f)| f.dedup_key == dedup_key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl FindingsSink for MemorySink {
    async fn find_or_create(&self, sink_id: &str, finding: &Finding) -> SinkResult<SinkOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExportError::transport("simulated outage"));
        }
        if self.rejected.contains(&finding.dedup_key) {
            return Err(ExportError::ExportRejected {
                dedup_key: finding.dedup_key.clone(),
                message: "rejected by sink".into(),
            });
        }

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ExportError::transport("sink lock poisoned"))?;
        if let Some((entry_id, _)) = entries.get(sink_id) {
            return Ok(SinkOutcome {
                entry_id: entry_id.clone(),
                created: false,
            });
        }
        let entry_id = (entries.len() + 1).to_string();
        entries.insert(sink_id.to_string(), (entry_id.clone(), finding.clone()));
        Ok(SinkOutcome {
            entry_id,
            created: true,
        })
    }

    fn sink_name(&self) -> &'static str {
        "memory"
    }
}
