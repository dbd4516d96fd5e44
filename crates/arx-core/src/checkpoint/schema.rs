//! SQLite schema for phase checkpoints.
//!
//! Tables:
//! - `phase_records`: one row per (scenario, phase, run); the highest `seq` per
//!   (scenario, phase) is the authoritative record
//! - `phase_attempts`: append-only audit of backend attempts per record

/// DDL for checkpoint tables.
///
/// Schema version: 1
pub const CHECKPOINT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS phase_records (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    scenario_id      TEXT NOT NULL,
    phase            TEXT NOT NULL,
    run_id           TEXT NOT NULL,
    target_id        TEXT NOT NULL,
    status           TEXT NOT NULL,
    output_json      TEXT,
    failure_kind     TEXT,
    failure_message  TEXT,
    started_at       TEXT,
    finished_at      TEXT,
    attempt_count    INTEGER NOT NULL DEFAULT 0,
    updated_at       TEXT NOT NULL,
    UNIQUE(scenario_id, phase, run_id)
);

CREATE INDEX IF NOT EXISTS idx_phase_records_key
    ON phase_records(scenario_id, phase, seq);

-- Attempt audit (append-only, immutable)
CREATE TABLE IF NOT EXISTS phase_attempts (
    record_seq       INTEGER NOT NULL REFERENCES phase_records(seq),
    position         INTEGER NOT NULL,
    attempt          INTEGER NOT NULL,
    operation        TEXT NOT NULL,
    started_at       TEXT NOT NULL,
    duration_ms      INTEGER NOT NULL,
    error_kind       TEXT,
    message          TEXT,
    PRIMARY KEY(record_seq, position)
);
"#;
