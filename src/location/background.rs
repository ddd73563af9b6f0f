//! Background location capability.
//!
//! The background producer outlives any in-memory session, so its fixes are
//! routed through the persisted registry. While the session is resident the
//! fix is handed to it and enters the same ordered sample stream as
//! foreground fixes; otherwise it is appended straight to the durable queue.
//! Runtimes without the capability get [`NullBackgroundLocation`], chosen
//! once at startup.

use super::producer::{LocationEvent, ReplayTask};
use super::types::{Fix, FixSource, LocationError, LocationRequest, PermissionState, Sample};
use crate::storage::database::Database;
use crate::storage::queue::DurableQueue;
use crate::storage::registry::{ActiveSessionRegistry, RegistryError, SessionKind, SessionPhase};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Background location capability.
pub trait BackgroundLocation: Send + Sync {
    /// Whether the runtime offers background location at all.
    fn is_available(&self) -> bool;

    /// Current permission state for the background tier.
    fn permission(&self) -> PermissionState;

    /// Begin delivering fixes to `handler` until stopped.
    fn start(
        &self,
        request: &LocationRequest,
        handler: BackgroundFixHandler,
    ) -> Result<(), LocationError>;

    /// Stop delivering fixes. Fixes already in flight may still arrive.
    fn stop(&self);

    fn is_running(&self) -> bool;
}

/// What happened to a background fix.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundOutcome {
    /// Handed to the resident session, which records the sample
    Forwarded(Uuid),
    /// Stored in the named session's durable queue
    Queued(Uuid),
    /// Registry is empty
    NoActiveSession,
    /// Registry names a session kind that does not track location
    NotTrackable(SessionKind),
}

/// Receives background fixes and routes them by registry lookup.
///
/// Holds only the shared database, never a session reference.
#[derive(Clone)]
pub struct BackgroundFixHandler {
    registry: ActiveSessionRegistry,
    queue: DurableQueue,
    observer: Option<mpsc::UnboundedSender<LocationEvent>>,
}

impl BackgroundFixHandler {
    pub fn new(database: Arc<Mutex<Database>>) -> Self {
        Self {
            registry: ActiveSessionRegistry::new(Arc::clone(&database)),
            queue: DurableQueue::new(database),
            observer: None,
        }
    }

    /// Hand fixes to a resident session instead of queueing them.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<LocationEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Route one background fix.
    pub fn handle(&self, fix: Fix) -> Result<BackgroundOutcome, RegistryError> {
        let Some(entry) = self.registry.current()? else {
            tracing::debug!("Discarding background fix: no active session");
            return Ok(BackgroundOutcome::NoActiveSession);
        };

        if entry.kind != SessionKind::Outdoor {
            tracing::debug!("Discarding background fix: active session is {}", entry.kind);
            return Ok(BackgroundOutcome::NotTrackable(entry.kind));
        }

        let fix = match &self.observer {
            Some(observer) => match observer.send(LocationEvent {
                source: FixSource::Background,
                fix,
            }) {
                Ok(()) => return Ok(BackgroundOutcome::Forwarded(entry.session_id)),
                // Closed: the session is no longer resident.
                Err(mpsc::error::SendError(event)) => event.fix,
            },
            None => fix,
        };

        let mut sample = Sample::from_fix(
            entry.session_id,
            &fix,
            entry.elapsed_at(fix.timestamp),
            FixSource::Background,
        );
        sample.is_moving = entry.phase == SessionPhase::Recording;

        self.queue
            .enqueue(&entry.session_id, std::slice::from_ref(&sample))?;

        Ok(BackgroundOutcome::Queued(entry.session_id))
    }
}

/// Stand-in for runtimes without background location.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackgroundLocation;

impl BackgroundLocation for NullBackgroundLocation {
    fn is_available(&self) -> bool {
        false
    }

    fn permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    fn start(
        &self,
        _request: &LocationRequest,
        _handler: BackgroundFixHandler,
    ) -> Result<(), LocationError> {
        Err(LocationError::BackgroundCapabilityUnavailable)
    }

    fn stop(&self) {}

    fn is_running(&self) -> bool {
        false
    }
}

/// Plays back recorded fixes as the background producer.
pub struct ReplayBackgroundLocation {
    task: ReplayTask,
    permission: PermissionState,
}

impl ReplayBackgroundLocation {
    pub fn new(fixes: Vec<Fix>, interval: Duration) -> Self {
        Self {
            task: ReplayTask::new(fixes, interval),
            permission: PermissionState::Granted,
        }
    }

    pub fn with_permission(mut self, permission: PermissionState) -> Self {
        self.permission = permission;
        self
    }
}

impl BackgroundLocation for ReplayBackgroundLocation {
    fn is_available(&self) -> bool {
        true
    }

    fn permission(&self) -> PermissionState {
        self.permission
    }

    fn start(
        &self,
        request: &LocationRequest,
        handler: BackgroundFixHandler,
    ) -> Result<(), LocationError> {
        if !self.permission.is_granted() {
            return Err(LocationError::PermissionDenied);
        }
        tracing::debug!(
            "Starting background replay producer ({}ms requested)",
            request.interval_ms
        );
        self.task.spawn(move |fix| {
            if let Err(e) = handler.handle(fix) {
                tracing::warn!("Failed to store background fix: {}", e);
            }
            true
        })
    }

    fn stop(&self) {
        self.task.abort();
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
