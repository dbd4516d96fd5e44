//! Checkpoint Store: durable phase records keyed by (scenario, phase).
//!
//! Provides:
//! - Atomic saves (a reader never sees a half-written record)
//! - Append-only history: re-saving a key adds a record, it never erases earlier ones
//! - Latest-record-wins resume decisions

mod schema;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{CheckpointError, CheckpointResult, ErrorKind};
use crate::model::{AttemptRecord, Phase, PhaseFailure, PhaseRecord, PhaseStatus};
use schema::CHECKPOINT_SCHEMA;

/// SQLite-backed checkpoint store.
#[derive(Clone)]
pub struct CheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

const RECORD_COLUMNS: &str = "seq, scenario_id, phase, run_id, target_id, status, output_json, \
     failure_kind, failure_message, started_at, finished_at, attempt_count";

struct RawRecord {
    seq: i64,
    record: PhaseRecord,
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn corrupt(what: &str, value: &str) -> CheckpointError {
    CheckpointError::Serialization(format!("stored {what} '{value}' is not recognised"))
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, [Option<String>; 10], i64)> {
    Ok((
        row.get(0)?,
        [
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
        ],
        row.get(11)?,
    ))
}

fn decode(raw: (i64, [Option<String>; 10], i64)) -> CheckpointResult<RawRecord> {
    let (seq, cols, attempt_count) = raw;
    let [scenario_id, phase, run_id, target_id, status, output, fkind, fmsg, started, finished] =
        cols;
    let phase_s = phase.unwrap_or_default();
    let phase: Phase = phase_s.parse().map_err(|_| corrupt("phase", &phase_s))?;
    let status_s = status.unwrap_or_default();
    let status = PhaseStatus::parse(&status_s).ok_or_else(|| corrupt("status", &status_s))?;
    let output = output.map(|o| serde_json::from_str(&o)).transpose()?;
    let failure = match fkind {
        Some(kind) => Some(PhaseFailure {
            kind: ErrorKind::parse(&kind).ok_or_else(|| corrupt("error kind", &kind))?,
            message: fmsg.unwrap_or_default(),
        }),
        None => None,
    };
    Ok(RawRecord {
        seq,
        record: PhaseRecord {
            scenario_id: scenario_id.unwrap_or_default(),
            phase,
            run_id: run_id.unwrap_or_default(),
            target_id: target_id.unwrap_or_default(),
            status,
            output,
            failure,
            started_at: parse_time(started),
            finished_at: parse_time(finished),
            attempt_count: attempt_count as u32,
            attempts: Vec::new(),
        },
    })
}

impl CheckpointStore {
    /// Open a file-backed store, creating parent-less files as needed.
    pub fn open(path: &Path) -> CheckpointResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> CheckpointResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> CheckpointResult<()> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        // WAL mode for file-backed DBs (no-op for in-memory)
        let _ = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()));
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(CHECKPOINT_SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> CheckpointResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CheckpointError::Database("checkpoint connection poisoned".into()))
    }

    /// Persist a record atomically.
    ///
    /// The first save of a (scenario, phase, run) appends a new record; later
    /// saves of the same run update it in place and append any new attempts.
    /// Records of earlier runs are never touched.
    pub fn save(&self, record: &PhaseRecord) -> CheckpointResult<()> {
        let conn = self.lock()?;
        // BEGIN IMMEDIATE acquires write lock immediately
        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = Self::save_inner(&conn, record);
        Self::end_transaction(&conn, result)
    }

    /// Commit on success, roll back on any failure including a failed commit.
    fn end_transaction(conn: &Connection, result: CheckpointResult<()>) -> CheckpointResult<()> {
        let result = result.and_then(|()| {
            conn.execute("COMMIT", [])?;
            Ok(())
        });
        if result.is_err() && !conn.is_autocommit() {
            let _ = conn.execute("ROLLBACK", []);
        }
        result
    }

    fn save_inner(conn: &Connection, record: &PhaseRecord) -> CheckpointResult<()> {
        let output = record
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r#"
            INSERT INTO phase_records (
                scenario_id, phase, run_id, target_id, status, output_json,
                failure_kind, failure_message, started_at, finished_at, attempt_count, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(scenario_id, phase, run_id) DO UPDATE SET
                target_id = excluded.target_id,
                status = excluded.status,
                output_json = excluded.output_json,
                failure_kind = excluded.failure_kind,
                failure_message = excluded.failure_message,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                attempt_count = excluded.attempt_count,
                updated_at = excluded.updated_at
            "#,
            params![
                record.scenario_id,
                record.phase.as_str(),
                record.run_id,
                record.target_id,
                record.status.as_str(),
                output,
                record.failure.as_ref().map(|f| f.kind.as_str()),
                record.failure.as_ref().map(|f| f.message.as_str()),
                record.started_at.map(|t| t.to_rfc3339()),
                record.finished_at.map(|t| t.to_rfc3339()),
                i64::from(record.attempt_count),
                Utc::now().to_rfc3339(),
            ],
        )?;

        let seq: i64 = conn.query_row(
            "SELECT seq FROM phase_records WHERE scenario_id = ?1 AND phase = ?2 AND run_id = ?3",
            params![record.scenario_id, record.phase.as_str(), record.run_id],
            |row| row.get(0),
        )?;

        for (position, attempt) in record.attempts.iter().enumerate() {
            conn.execute(
                r#"
                INSERT INTO phase_attempts (
                    record_seq, position, attempt, operation, started_at, duration_ms,
                    error_kind, message
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(record_seq, position) DO NOTHING
                "#,
                params![
                    seq,
                    position as i64,
                    i64::from(attempt.attempt),
                    attempt.operation,
                    attempt.started_at.to_rfc3339(),
                    attempt.duration_ms as i64,
                    attempt.error_kind.map(ErrorKind::as_str),
                    attempt.message,
                ],
            )?;
        }
        Ok(())
    }

    fn attempts_for(conn: &Connection, seq: i64) -> CheckpointResult<Vec<AttemptRecord>> {
        let mut stmt = conn.prepare(
            "SELECT attempt, operation, started_at, duration_ms, error_kind, message \
             FROM phase_attempts WHERE record_seq = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map([seq], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (attempt, operation, started_at, duration_ms, kind, message) = row?;
            let error_kind = match kind {
                Some(k) => Some(ErrorKind::parse(&k).ok_or_else(|| corrupt("error kind", &k))?),
                None => None,
            };
            out.push(AttemptRecord {
                attempt: attempt as u32,
                operation,
                started_at: parse_time(Some(started_at.clone()))
                    .ok_or_else(|| corrupt("timestamp", &started_at))?,
                duration_ms: duration_ms as u64,
                error_kind,
                message,
            });
        }
        Ok(out)
    }

    fn with_attempts(conn: &Connection, raw: RawRecord) -> CheckpointResult<PhaseRecord> {
        let mut record = raw.record;
        record.attempts = Self::attempts_for(conn, raw.seq)?;
        Ok(record)
    }

    /// Latest record for a key.
    pub fn load(&self, scenario_id: &str, phase: Phase) -> CheckpointResult<PhaseRecord> {
        self.try_load(scenario_id, phase)?
            .ok_or_else(|| CheckpointError::NotFound {
                scenario_id: scenario_id.to_string(),
                phase,
            })
    }

    /// Latest record for a key, `None` when the key was never saved.
    pub fn try_load(
        &self,
        scenario_id: &str,
        phase: Phase,
    ) -> CheckpointResult<Option<PhaseRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM phase_records \
                     WHERE scenario_id = ?1 AND phase = ?2 ORDER BY seq DESC LIMIT 1"
                ),
                params![scenario_id, phase.as_str()],
                row_to_raw,
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Self::with_attempts(&conn, decode(raw)?)?)),
            None => Ok(None),
        }
    }

    /// Phases whose latest record is `succeeded`.
    pub fn list_succeeded(&self, scenario_id: &str) -> CheckpointResult<BTreeSet<Phase>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT r.phase FROM phase_records r
            WHERE r.scenario_id = ?1
              AND r.status = 'succeeded'
              AND r.seq = (
                  SELECT MAX(seq) FROM phase_records
                  WHERE scenario_id = r.scenario_id AND phase = r.phase
              )
            "#,
        )?;
        let phases = stmt.query_map([scenario_id], |row| row.get::<_, String>(0))?;
        let mut out = BTreeSet::new();
        for phase in phases {
            let phase = phase?;
            out.insert(phase.parse().map_err(|_| corrupt("phase", &phase))?);
        }
        Ok(out)
    }

    /// Every record of a key, oldest first.
    pub fn history(&self, scenario_id: &str, phase: Phase) -> CheckpointResult<Vec<PhaseRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM phase_records \
             WHERE scenario_id = ?1 AND phase = ?2 ORDER BY seq ASC"
        ))?;
        let raws = stmt
            .query_map(params![scenario_id, phase.as_str()], row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter()
            .map(|raw| Self::with_attempts(&conn, decode(raw)?))
            .collect()
    }

    /// Audit entries stored for one record.
    pub fn attempts(&self, record: &PhaseRecord) -> CheckpointResult<Vec<AttemptRecord>> {
        let conn = self.lock()?;
        let seq: Option<i64> = conn
            .query_row(
                "SELECT seq FROM phase_records \
                 WHERE scenario_id = ?1 AND phase = ?2 AND run_id = ?3",
                params![record.scenario_id, record.phase.as_str(), record.run_id],
                |row| row.get(0),
            )
            .optional()?;
        match seq {
            Some(seq) => Self::attempts_for(&conn, seq),
            None => Err(CheckpointError::NotFound {
                scenario_id: record.scenario_id.clone(),
                phase: record.phase,
            }),
        }
    }

    /// Latest record of every phase that has one, in phase order.
    pub fn latest_records(&self, scenario_id: &str) -> CheckpointResult<Vec<PhaseRecord>> {
        let mut out = Vec::new();
        for phase in Phase::ALL {
            if let Some(record) = self.try_load(scenario_id, phase)? {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PhaseError;
    use serde_json::json;

    fn attempt(n: u32, kind: Option<ErrorKind>) -> AttemptRecord {
        AttemptRecord {
            attempt: n,
            operation: "recon.initial_recon".into(),
            started_at: Utc::now(),
            duration_ms: 5,
            error_kind: kind,
            message: kind.map(|k| k.to_string()),
        }
    }

    #[test]
    fn failed_commit_leaves_connection_usable() -> anyhow::Result<()> {
        let store = CheckpointStore::memory()?;
        {
            let conn = store.lock()?;
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE parent (id INTEGER PRIMARY KEY);
                 CREATE TABLE child (
                     pid INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
                 );",
            )?;
            conn.execute("BEGIN IMMEDIATE", [])?;
            // deferred constraint makes COMMIT itself fail
            conn.execute("INSERT INTO child (pid) VALUES (7)", [])?;
            assert!(CheckpointStore::end_transaction(&conn, Ok(())).is_err());
            assert!(conn.is_autocommit());
        }
        let record = PhaseRecord::running("S1", Phase::Recon, "run-a", "T")
            .succeed(json!({}), vec![attempt(1, None)]);
        store.save(&record)?;
        assert!(store.load("S1", Phase::Recon)?.is_succeeded());
        Ok(())
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let store = CheckpointStore::memory()?;
        let record = PhaseRecord::running("S1", Phase::Recon, "run-a", "T").succeed(
            json!({"endpoints": ["/"]}),
            vec![attempt(1, Some(ErrorKind::BackendTimeout)), attempt(2, None)],
        );
        store.save(&record)?;

        let loaded = store.load("S1", Phase::Recon)?;
        assert_eq!(loaded.status, PhaseStatus::Succeeded);
        assert_eq!(loaded.output, Some(json!({"endpoints": ["/"]})));
        assert_eq!(loaded.attempt_count, 2);
        assert_eq!(loaded.attempts.len(), 2);
        assert_eq!(loaded.attempts[0].error_kind, Some(ErrorKind::BackendTimeout));
        Ok(())
    }

    #[test]
    fn load_missing_is_not_found() -> anyhow::Result<()> {
        let store = CheckpointStore::memory()?;
        assert!(matches!(
            store.load("S1", Phase::Attack),
            Err(CheckpointError::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn running_then_final_save_updates_same_record() -> anyhow::Result<()> {
        let store = CheckpointStore::memory()?;
        let running = PhaseRecord::running("S1", Phase::Analysis, "run-a", "T");
        store.save(&running)?;
        assert_eq!(store.load("S1", Phase::Analysis)?.status, PhaseStatus::Running);

        store.save(&running.succeed(json!({}), vec![attempt(1, None)]))?;
        assert_eq!(store.history("S1", Phase::Analysis)?.len(), 1);
        assert!(store.load("S1", Phase::Analysis)?.is_succeeded());
        Ok(())
    }

    #[test]
    fn retry_appends_history_and_latest_status_wins() -> anyhow::Result<()> {
        let store = CheckpointStore::memory()?;
        store.save(
            &PhaseRecord::running("S1", Phase::Recon, "run-a", "T")
                .succeed(json!({"v": 1}), vec![]),
        )?;
        store.save(
            &PhaseRecord::running("S1", Phase::Analysis, "run-a", "T").succeed(json!({}), vec![]),
        )?;
        assert_eq!(
            store.list_succeeded("S1")?,
            BTreeSet::from([Phase::Recon, Phase::Analysis])
        );

        let err = PhaseError::new(ErrorKind::BackendProtocol, "garbage");
        store.save(
            &PhaseRecord::running("S1", Phase::Analysis, "run-b", "T")
                .fail(&err, vec![attempt(1, Some(ErrorKind::BackendProtocol))]),
        )?;

        let history = store.history("S1", Phase::Analysis)?;
        assert_eq!(history.len(), 2);
        assert!(history[0].is_succeeded());
        assert_eq!(history[1].status, PhaseStatus::Failed);
        assert_eq!(
            history[1].failure.as_ref().map(|f| f.kind),
            Some(ErrorKind::BackendProtocol)
        );
        assert_eq!(store.list_succeeded("S1")?, BTreeSet::from([Phase::Recon]));
        Ok(())
    }

    #[test]
    fn scenarios_are_isolated() -> anyhow::Result<()> {
        let store = CheckpointStore::memory()?;
        store.save(&PhaseRecord::running("S1", Phase::Recon, "r", "T").succeed(json!({}), vec![]))?;
        assert!(store.list_succeeded("S2")?.is_empty());
        assert!(store.latest_records("S2")?.is_empty());
        assert_eq!(store.latest_records("S1")?.len(), 1);
        Ok(())
    }

    #[test]
    fn concurrent_readers_see_whole_records() -> anyhow::Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let writer = CheckpointStore::open(file.path())?;
        let reader = CheckpointStore::open(file.path())?;

        let handle = std::thread::spawn(move || -> anyhow::Result<()> {
            for i in 0..50 {
                let attempts = (1..=3).map(|n| attempt(n, None)).collect();
                writer.save(
                    &PhaseRecord::running("S1", Phase::Recon, format!("run-{i}"), "T")
                        .succeed(json!({"i": i}), attempts),
                )?;
            }
            Ok(())
        });

        for _ in 0..50 {
            if let Some(r) = reader.try_load("S1", Phase::Recon)? {
                assert!(r.is_succeeded());
                assert_eq!(r.attempts.len(), 3);
                assert!(r.output.is_some());
            }
        }
        handle.join().expect("writer thread")?;
        assert_eq!(reader.history("S1", Phase::Recon)?.len(), 50);
        Ok(())
    }
}
