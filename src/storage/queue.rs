//! Durable, session-scoped sample queue.

use crate::location::types::Sample;
use crate::storage::database::{Database, DatabaseError, QueuedSample};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// FIFO queue of samples awaiting confirmed remote persistence.
///
/// Shared between the foreground sync engine and the background location
/// handler; entries are only appended or removed.
#[derive(Clone)]
pub struct DurableQueue {
    database: Arc<Mutex<Database>>,
}

impl DurableQueue {
    pub fn new(database: Arc<Mutex<Database>>) -> Self {
        Self { database }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Database>, DatabaseError> {
        self.database
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))
    }

    /// Append a batch to the tail of its session's queue.
    pub fn enqueue(&self, session_id: &Uuid, samples: &[Sample]) -> Result<usize, DatabaseError> {
        let appended = self.lock()?.append_samples(session_id, samples)?;
        tracing::debug!("Queued {} samples for session {}", appended, session_id);
        Ok(appended)
    }

    /// Oldest `limit` entries of a session's queue, left in place.
    pub fn peek(&self, session_id: &Uuid, limit: usize) -> Result<Vec<QueuedSample>, DatabaseError> {
        self.lock()?.peek_samples(session_id, limit)
    }

    /// Remove entries that were confirmed by the remote store.
    pub fn acknowledge(&self, batch: &[QueuedSample]) -> Result<usize, DatabaseError> {
        let seqs: Vec<i64> = batch.iter().map(|q| q.seq).collect();
        self.lock()?.remove_samples(&seqs)
    }

    pub fn len(&self, session_id: &Uuid) -> Result<usize, DatabaseError> {
        self.lock()?.count_samples(session_id)
    }

    pub fn is_empty(&self, session_id: &Uuid) -> Result<bool, DatabaseError> {
        Ok(self.len(session_id)? == 0)
    }

    /// Every session that still has undelivered samples, oldest first.
    pub fn pending_sessions(&self) -> Result<Vec<(Uuid, usize)>, DatabaseError> {
        self.lock()?.queued_sessions()
    }
}
