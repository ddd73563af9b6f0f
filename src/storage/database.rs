//! Database operations using rusqlite.
//!
//! Holds the three pieces of state that must survive a process restart:
//! the durable sample queue, the active-session registry slot and the
//! crash-recovery checkpoints.

use crate::location::types::Sample;
use crate::storage::registry::{ActiveSessionEntry, SessionKind, SessionPhase};
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// A sample waiting in the durable queue, with its queue position.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSample {
    /// Queue sequence number (FIFO order)
    pub seq: i64,
    /// The queued sample
    pub sample: Sample,
}

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    // ========== Durable Sample Queue ==========

    /// Append samples to the tail of a session's queue, atomically.
    pub fn append_samples(
        &mut self,
        session_id: &Uuid,
        samples: &[Sample],
    ) -> Result<usize, DatabaseError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO sample_queue (session_id, sample_json, enqueued_at)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            let now = Utc::now().to_rfc3339();
            for sample in samples {
                let json = serde_json::to_string(sample)
                    .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
                stmt.execute(params![session_id.to_string(), json, now])
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(samples.len())
    }

    /// Read the oldest `limit` samples of a session's queue without removing them.
    pub fn peek_samples(
        &self,
        session_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<QueuedSample>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT seq, sample_json FROM sample_queue
                 WHERE session_id = ?1 ORDER BY seq ASC LIMIT ?2",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![session_id.to_string(), limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut queued = Vec::new();
        for row in rows {
            let (seq, json) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            let sample: Sample = serde_json::from_str(&json)
                .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
            queued.push(QueuedSample { seq, sample });
        }

        Ok(queued)
    }

    /// Remove acknowledged samples by sequence number, atomically.
    pub fn remove_samples(&mut self, seqs: &[i64]) -> Result<usize, DatabaseError> {
        if seqs.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let mut removed = 0;
        {
            let mut stmt = tx
                .prepare("DELETE FROM sample_queue WHERE seq = ?1")
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            for seq in seqs {
                removed += stmt
                    .execute(params![seq])
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(removed)
    }

    /// Number of samples queued for a session.
    pub fn count_samples(&self, session_id: &Uuid) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sample_queue WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(count as usize)
    }

    /// Sessions with queued samples and their queue lengths, oldest first.
    pub fn queued_sessions(&self) -> Result<Vec<(Uuid, usize)>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_id, COUNT(*), MIN(seq) FROM sample_queue
                 GROUP BY session_id ORDER BY MIN(seq) ASC",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, count) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            let id = Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
            sessions.push((id, count as usize));
        }

        Ok(sessions)
    }

    // ========== Active-Session Registry ==========

    /// Read the registry slot.
    pub fn get_active_session(&self) -> Result<Option<ActiveSessionEntry>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT session_id, kind, phase, title, started_at, elapsed_s, distance_m, updated_at
                 FROM active_session WHERE slot = 1",
                [],
                |row| {
                    Ok(ActiveSessionRow {
                        session_id: row.get(0)?,
                        kind: row.get(1)?,
                        phase: row.get(2)?,
                        title: row.get(3)?,
                        started_at: row.get(4)?,
                        elapsed_s: row.get(5)?,
                        distance_m: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        row.map(ActiveSessionRow::into_entry).transpose()
    }

    /// Claim the registry slot. Returns false if it is already occupied.
    pub fn insert_active_session(&self, entry: &ActiveSessionEntry) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO active_session
                 (slot, session_id, kind, phase, title, started_at, elapsed_s, distance_m, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(slot) DO NOTHING",
                params![
                    entry.session_id.to_string(),
                    entry.kind.as_str(),
                    entry.phase.as_str(),
                    entry.title,
                    entry.started_at.to_rfc3339(),
                    entry.elapsed_s,
                    entry.distance_m,
                    entry.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(inserted == 1)
    }

    /// Replace the registry entry for `entry.session_id` with a fresh one.
    ///
    /// The slot is never edited in place: the old row is removed and the new
    /// one inserted in a single transaction. Returns false if the slot does
    /// not name that session.
    pub fn replace_active_session(
        &mut self,
        entry: &ActiveSessionEntry,
    ) -> Result<bool, DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let removed = tx
            .execute(
                "DELETE FROM active_session WHERE slot = 1 AND session_id = ?1",
                params![entry.session_id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if removed == 0 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO active_session
             (slot, session_id, kind, phase, title, started_at, elapsed_s, distance_m, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.session_id.to_string(),
                entry.kind.as_str(),
                entry.phase.as_str(),
                entry.title,
                entry.started_at.to_rfc3339(),
                entry.elapsed_s,
                entry.distance_m,
                entry.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(true)
    }

    /// Clear the registry slot if it names `session_id`.
    pub fn delete_active_session(&self, session_id: &Uuid) -> Result<bool, DatabaseError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM active_session WHERE slot = 1 AND session_id = ?1",
                params![session_id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(removed > 0)
    }

    /// Clear the registry slot unconditionally.
    pub fn clear_active_session(&self) -> Result<bool, DatabaseError> {
        let removed = self
            .conn
            .execute("DELETE FROM active_session", [])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(removed > 0)
    }

    // ========== Crash-Recovery Checkpoints ==========

    /// Save a checkpoint for a session, replacing any previous one.
    pub fn save_checkpoint<T: serde::Serialize>(
        &self,
        session_id: &Uuid,
        checkpoint: &T,
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(checkpoint)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO session_checkpoint (session_id, checkpoint_json, saved_at)
                 VALUES (?1, ?2, datetime('now'))",
                params![session_id.to_string(), json],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Load a session's checkpoint.
    pub fn load_checkpoint<T: serde::de::DeserializeOwned>(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<T>, DatabaseError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT checkpoint_json FROM session_checkpoint WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        json.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| DatabaseError::DeserializationError(e.to_string()))
        })
        .transpose()
    }

    /// Delete a session's checkpoint.
    pub fn clear_checkpoint(&self, session_id: &Uuid) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM session_checkpoint WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }
}

/// Internal row type for the registry slot.
struct ActiveSessionRow {
    session_id: String,
    kind: String,
    phase: String,
    title: String,
    started_at: String,
    elapsed_s: f64,
    distance_m: f64,
    updated_at: String,
}

impl ActiveSessionRow {
    fn into_entry(self) -> Result<ActiveSessionEntry, DatabaseError> {
        let session_id = Uuid::parse_str(&self.session_id)
            .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
        let kind: SessionKind = self
            .kind
            .parse()
            .map_err(DatabaseError::DeserializationError)?;
        let phase: SessionPhase = self
            .phase
            .parse()
            .map_err(DatabaseError::DeserializationError)?;

        Ok(ActiveSessionEntry {
            session_id,
            kind,
            phase,
            title: self.title,
            started_at: parse_timestamp(&self.started_at)?,
            elapsed_s: self.elapsed_s,
            distance_m: self.distance_m,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::DeserializationError(e.to_string()))
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
