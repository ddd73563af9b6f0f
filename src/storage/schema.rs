//! Database schema definitions for RustRun.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Durable sample queue: samples awaiting confirmed remote persistence.
-- Rows are only ever appended or removed; seq gives FIFO order per session.
CREATE TABLE IF NOT EXISTS sample_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    sample_json TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sample_queue_session ON sample_queue(session_id, seq);

-- Active-session registry: a single global slot
CREATE TABLE IF NOT EXISTS active_session (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    session_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    phase TEXT NOT NULL,
    title TEXT NOT NULL,
    started_at TEXT NOT NULL,
    elapsed_s REAL NOT NULL,
    distance_m REAL NOT NULL,
    updated_at TEXT NOT NULL
);

-- Crash-recovery checkpoints, one per live session
CREATE TABLE IF NOT EXISTS session_checkpoint (
    session_id TEXT PRIMARY KEY,
    checkpoint_json TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
"#;

/// Schema version table SQL.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;
