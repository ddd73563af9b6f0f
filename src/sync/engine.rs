//! Sample delivery: batched flushes with a durable fallback queue.
//!
//! Flushes run on spawned tasks so recording never waits on the network.
//! Each flush awaits the one before it, so failed batches reach the durable
//! queue in capture order, and a batch never overtakes samples already
//! queued for its session. Drains read the oldest queued samples, write them
//! and only then remove them, so a failed write leaves the queue untouched.
//!
//! Periodic drains still attempt one write while connectivity reads offline;
//! a successful write marks the store reachable again.

use super::buffer::SampleBuffer;
use super::connectivity::Connectivity;
use super::remote::RemoteStore;
use crate::location::types::Sample;
use crate::recording::types::SessionEvent;
use crate::storage::config::SyncSettings;
use crate::storage::database::DatabaseError;
use crate::storage::queue::DurableQueue;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Where a flushed batch ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to flush
    Empty,
    /// Written to the remote store
    Delivered(usize),
    /// Remote write failed; batch stored in the durable queue
    Queued(usize),
}

/// Result of a drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Samples confirmed by the remote store
    pub delivered: usize,
    /// Samples still queued afterwards
    pub remaining: usize,
    /// The pass stopped early (offline or a failed write)
    pub aborted: bool,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.delivered += other.delivered;
        self.remaining += other.remaining;
        self.aborted |= other.aborted;
    }
}

/// Result of the last flush before a session leaves `saving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalFlushReport {
    pub buffered: FlushOutcome,
    pub drain: DrainReport,
}

struct Shared<R> {
    remote: Arc<R>,
    queue: DurableQueue,
    connectivity: Connectivity,
    drain_batch_size: usize,
    events: Option<broadcast::Sender<SessionEvent>>,
}

impl<R: RemoteStore> Shared<R> {
    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    async fn flush_batch(
        &self,
        session_id: Uuid,
        batch: Vec<Sample>,
    ) -> Result<FlushOutcome, DatabaseError> {
        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let count = batch.len();
        if !self.queue.is_empty(&session_id)? {
            // Older samples are still queued; delivering now would overtake them.
            self.queue.enqueue(&session_id, &batch)?;
            tracing::debug!("Queued {} samples behind pending backlog", count);
            self.emit(SessionEvent::SamplesQueued { session_id, count });
            return Ok(FlushOutcome::Queued(count));
        }

        match self.remote.insert_samples(session_id, &batch).await {
            Ok(()) => {
                tracing::debug!("Flushed {} samples for session {}", count, session_id);
                self.emit(SessionEvent::SamplesDelivered { session_id, count });
                Ok(FlushOutcome::Delivered(count))
            }
            Err(e) => {
                tracing::warn!(
                    "Flush of {} samples failed ({}), moving to durable queue",
                    count,
                    e
                );
                self.queue.enqueue(&session_id, &batch)?;
                self.emit(SessionEvent::SamplesQueued { session_id, count });
                Ok(FlushOutcome::Queued(count))
            }
        }
    }

    /// Drain one session. The caller holds the drain guard.
    ///
    /// With `attempt_offline`, one batch is attempted even while offline.
    async fn drain_locked(
        &self,
        session_id: Uuid,
        attempt_offline: bool,
    ) -> Result<DrainReport, DatabaseError> {
        let mut report = DrainReport::default();

        loop {
            let online = self.connectivity.is_online();
            if !online && !attempt_offline {
                tracing::debug!("Offline, postponing drain of session {}", session_id);
                report.aborted = true;
                break;
            }

            let batch = self.queue.peek(&session_id, self.drain_batch_size)?;
            if batch.is_empty() {
                break;
            }

            let samples: Vec<Sample> = batch.iter().map(|q| q.sample.clone()).collect();
            match self.remote.insert_samples(session_id, &samples).await {
                Ok(()) => {
                    if !online {
                        tracing::info!("Remote store reachable again");
                        self.connectivity.set_online(true);
                    }
                    let removed = self.queue.acknowledge(&batch)?;
                    report.delivered += removed;
                    self.emit(SessionEvent::SamplesDelivered {
                        session_id,
                        count: removed,
                    });
                }
                Err(e) => {
                    tracing::warn!("Drain of session {} aborted: {}", session_id, e);
                    report.aborted = true;
                    break;
                }
            }
        }

        report.remaining = self.queue.len(&session_id)?;
        if report.delivered > 0 {
            tracing::info!(
                "Drained {} queued samples for session {} ({} remaining)",
                report.delivered,
                session_id,
                report.remaining
            );
        }
        Ok(report)
    }

    /// Drain every session with queued samples, oldest first.
    async fn drain_all_locked(&self, attempt_offline: bool) -> Result<DrainReport, DatabaseError> {
        let mut report = DrainReport::default();
        for (session_id, _) in self.queue.pending_sessions()? {
            let session_report = self.drain_locked(session_id, attempt_offline).await?;
            let aborted = session_report.aborted;
            report.merge(session_report);
            if aborted {
                break;
            }
        }
        Ok(report)
    }
}

/// Buffers samples and delivers them to the remote store.
pub struct SyncEngine<R: RemoteStore> {
    shared: Arc<Shared<R>>,
    buffer: SampleBuffer,
    drain_guard: Arc<TokioMutex<()>>,
    last_flush: Option<JoinHandle<()>>,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(
        remote: Arc<R>,
        queue: DurableQueue,
        connectivity: Connectivity,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote,
                queue,
                connectivity,
                drain_batch_size: settings.drain_batch_size.max(1),
                events: None,
            }),
            buffer: SampleBuffer::new(settings.batch_size),
            drain_guard: Arc::new(TokioMutex::new(())),
            last_flush: None,
        }
    }

    /// Publish delivery events on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<SessionEvent>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.events = Some(events);
        }
        self
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.shared.remote
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.shared.queue
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.shared.connectivity
    }

    /// Samples waiting in memory.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Samples waiting in the durable queue for a session.
    pub fn queued(&self, session_id: &Uuid) -> Result<usize, DatabaseError> {
        self.shared.queue.len(session_id)
    }

    /// Whether a spawned flush has not finished yet.
    pub fn flush_in_flight(&self) -> bool {
        self.last_flush.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Whether a drain currently holds the guard.
    pub fn drain_in_progress(&self) -> bool {
        self.drain_guard.try_lock().is_err()
    }

    /// Buffer a sample, spawning a flush when the batch is full.
    ///
    /// A batch only ever holds one session's samples; leftovers from another
    /// session are flushed under their own id first.
    pub fn push(&mut self, sample: Sample) {
        let session_id = sample.session_id;
        if let Some(previous) = self.buffer.session_id().filter(|id| *id != session_id) {
            let leftover = self.buffer.take();
            tracing::warn!(
                "Flushing {} leftover samples of session {} before session {}",
                leftover.len(),
                previous,
                session_id
            );
            self.spawn_flush(previous, leftover);
        }
        if let Some(batch) = self.buffer.push(sample) {
            self.spawn_flush(session_id, batch);
        }
    }

    fn spawn_flush(&mut self, session_id: Uuid, batch: Vec<Sample>) {
        let shared = Arc::clone(&self.shared);
        let previous = self.last_flush.take();

        self.last_flush = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = shared.flush_batch(session_id, batch).await {
                // The batch is lost only if local storage itself fails.
                tracing::error!("Failed to queue samples for session {}: {}", session_id, e);
            }
        }));
    }

    /// Start a background drain of every pending session.
    ///
    /// While offline this still writes one batch, so a store that came back
    /// without a connectivity change is noticed. Returns `None` without doing
    /// anything if a drain is already running.
    pub fn trigger_drain(&self) -> Option<JoinHandle<Result<DrainReport, DatabaseError>>> {
        let Ok(guard) = Arc::clone(&self.drain_guard).try_lock_owned() else {
            tracing::debug!("Drain already in progress, skipping trigger");
            return None;
        };

        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move {
            let report = shared.drain_all_locked(true).await;
            drop(guard);
            report
        }))
    }

    /// Drain one session, waiting for any running drain first.
    pub async fn drain(&self, session_id: Uuid) -> Result<DrainReport, DatabaseError> {
        let _guard = self.drain_guard.lock().await;
        self.shared.drain_locked(session_id, false).await
    }

    /// Drain every session that still has queued samples, including
    /// sessions finished earlier or left behind by a previous process.
    pub async fn drain_pending_sessions(&self) -> Result<DrainReport, DatabaseError> {
        let _guard = self.drain_guard.lock().await;
        self.shared.drain_all_locked(false).await
    }

    /// Wait for spawned flushes to finish.
    pub async fn wait_idle(&mut self) {
        if let Some(handle) = self.last_flush.take() {
            if let Err(e) = handle.await {
                tracing::error!("Flush task failed: {}", e);
            }
        }
    }

    /// Last delivery attempt for a session before it leaves `saving`.
    ///
    /// Waits for in-flight flushes, flushes the buffer, then drains the
    /// session's queue. Network failures leave samples queued and are not
    /// errors; only a failure to store samples locally is.
    pub async fn final_flush(&mut self, session_id: Uuid) -> Result<FinalFlushReport, DatabaseError> {
        self.wait_idle().await;

        let batch = self.buffer.take();
        let owner = batch.first().map_or(session_id, |s| s.session_id);
        let buffered = match self.shared.flush_batch(owner, batch.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Keep the samples in memory so a retried finish can store them.
                self.buffer.restore(batch);
                return Err(e);
            }
        };

        let drain = self.drain(session_id).await?;
        tracing::info!(
            "Final flush for session {}: {:?}, {} delivered from queue, {} still queued",
            session_id,
            buffered,
            drain.delivered,
            drain.remaining
        );

        Ok(FinalFlushReport { buffered, drain })
    }
}
