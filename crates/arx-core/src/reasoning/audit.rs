use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::model::AttemptRecord;

/// Append-only attempt log for one phase execution, shared by its sub-tasks.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Arc<Mutex<Vec<AttemptRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sub-task that panicked while holding the lock leaves the entries
    /// intact, so a poisoned lock is recovered rather than losing attempts.
    fn entries(&self) -> MutexGuard<'_, Vec<AttemptRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, entry: AttemptRecord) {
        self.entries().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<AttemptRecord> {
        self.entries().clone()
    }
}
