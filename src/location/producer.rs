//! Foreground location producer interface and a replay implementation.

use super::types::{Fix, FixSource, LocationError, LocationRequest, PermissionState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A fix tagged with the producer that delivered it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationEvent {
    pub source: FixSource,
    pub fix: Fix,
}

/// Delivery end of a location subscription.
///
/// Every fix pushed through a sink is tagged with the sink's source, so the
/// consumer sees one normalized event shape regardless of producer.
#[derive(Debug, Clone)]
pub struct FixSink {
    tx: mpsc::UnboundedSender<LocationEvent>,
    source: FixSource,
}

impl FixSink {
    pub fn new(tx: mpsc::UnboundedSender<LocationEvent>, source: FixSource) -> Self {
        Self { tx, source }
    }

    /// Deliver a fix. Returns false once the consumer is gone.
    pub fn deliver(&self, fix: Fix) -> bool {
        self.tx
            .send(LocationEvent {
                source: self.source,
                fix,
            })
            .is_ok()
    }

    pub fn source(&self) -> FixSource {
        self.source
    }
}

/// Foreground location capability.
///
/// `stop()` must be synchronous: once it returns, the producer delivers no
/// further fixes.
pub trait LocationProducer: Send + Sync {
    /// Current permission state for foreground location.
    fn permission(&self) -> PermissionState;

    /// Begin delivering fixes into `sink` until stopped.
    fn start(&self, request: &LocationRequest, sink: FixSink) -> Result<(), LocationError>;

    /// Stop delivering fixes.
    fn stop(&self);

    /// Whether a subscription is active.
    fn is_running(&self) -> bool;
}

/// Shared replay loop used by the replay producers.
///
/// The cursor survives stop/start so a paused replay continues where it left off.
pub(crate) struct ReplayTask {
    fixes: Arc<Vec<Fix>>,
    cursor: Arc<AtomicUsize>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayTask {
    pub(crate) fn new(fixes: Vec<Fix>, interval: Duration) -> Self {
        Self {
            fixes: Arc::new(fixes),
            cursor: Arc::new(AtomicUsize::new(0)),
            interval,
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn spawn<F>(&self, mut deliver: F) -> Result<(), LocationError>
    where
        F: FnMut(Fix) -> bool + Send + 'static,
    {
        let mut guard = self
            .handle
            .lock()
            .map_err(|e| LocationError::ProducerFailed(format!("Replay lock failed: {}", e)))?;

        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return Ok(());
            }
        }

        let fixes = Arc::clone(&self.fixes);
        let cursor = Arc::clone(&self.cursor);
        let interval = self.interval;

        *guard = Some(tokio::spawn(async move {
            loop {
                let index = cursor.load(Ordering::SeqCst);
                let Some(fix) = fixes.get(index) else {
                    tracing::debug!("Replay exhausted after {} fixes", index);
                    break;
                };
                cursor.store(index + 1, Ordering::SeqCst);
                if !deliver(fix.clone()) {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        }));

        Ok(())
    }

    pub(crate) fn abort(&self) {
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.fixes
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

/// Plays back a recorded list of fixes as a foreground producer.
pub struct ReplayLocationProducer {
    task: ReplayTask,
    permission: PermissionState,
}

impl ReplayLocationProducer {
    /// Create a producer that emits one fix per `interval`.
    pub fn new(fixes: Vec<Fix>, interval: Duration) -> Self {
        Self {
            task: ReplayTask::new(fixes, interval),
            permission: PermissionState::Granted,
        }
    }

    /// Override the reported permission state.
    pub fn with_permission(mut self, permission: PermissionState) -> Self {
        self.permission = permission;
        self
    }

    /// Number of fixes not yet delivered.
    pub fn remaining(&self) -> usize {
        self.task.remaining()
    }
}

impl LocationProducer for ReplayLocationProducer {
    fn permission(&self) -> PermissionState {
        self.permission
    }

    fn start(&self, request: &LocationRequest, sink: FixSink) -> Result<(), LocationError> {
        if !self.permission.is_granted() {
            return Err(LocationError::PermissionDenied);
        }
        tracing::debug!(
            "Starting {} replay producer ({}ms requested)",
            sink.source(),
            request.interval_ms
        );
        self.task.spawn(move |fix| sink.deliver(fix))
    }

    fn stop(&self) {
        self.task.abort();
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
