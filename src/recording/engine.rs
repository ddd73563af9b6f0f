//! Outdoor session state machine.
//!
//! `SessionEngine` owns the one live session record. Fixes, timer ticks and
//! control calls all mutate it from a single task (see
//! [`crate::recording::driver`]); the only state shared with other execution
//! contexts is the durable queue and the active-session registry.

use crate::geo::{average_pace, average_speed};
use crate::location::background::{BackgroundFixHandler, BackgroundLocation};
use crate::location::producer::{FixSink, LocationEvent, LocationProducer};
use crate::location::types::{Fix, FixSource, Sample};
use crate::recording::auto_pause::{AutoPauseAction, AutoPauseDetector};
use crate::recording::integrator::MetricIntegrator;
use crate::recording::splits::SplitTracker;
use crate::recording::types::{
    LiveSummary, PauseReason, RecorderError, Session, SessionCheckpoint, SessionEvent,
    SessionStatus, Split, StartRequest,
};
use crate::storage::config::{AppConfig, LocationSettings, RecordingSettings};
use crate::storage::database::{Database, DatabaseError};
use crate::storage::disk::{DiskStorageGuard, StorageGuard, StorageStatus};
use crate::storage::queue::DurableQueue;
use crate::storage::registry::{ActiveSessionEntry, ActiveSessionRegistry, SessionKind, SessionPhase};
use crate::sync::connectivity::Connectivity;
use crate::sync::engine::{DrainReport, SyncEngine};
use crate::sync::remote::{NewSession, RemoteStore, SessionFlags, SessionUpdate};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

/// Capacity of the UI event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Monotonic timekeeping for one session.
///
/// `elapsed` is wall time minus paused time; moving time only advances
/// while recording. Base values carry time over from a restored checkpoint.
#[derive(Debug, Default)]
struct SessionClock {
    origin: Option<Instant>,
    base_elapsed_s: f64,
    base_paused_s: f64,
    paused_total: Duration,
    pause_started: Option<Instant>,
    last_advance: Option<Instant>,
    moving_time_s: f64,
}

impl SessionClock {
    fn started(now: Instant) -> Self {
        Self {
            origin: Some(now),
            last_advance: Some(now),
            ..Self::default()
        }
    }

    fn restored(now: Instant, elapsed_s: f64, paused_s: f64, moving_time_s: f64) -> Self {
        Self {
            origin: Some(now),
            base_elapsed_s: elapsed_s,
            base_paused_s: paused_s,
            pause_started: Some(now),
            last_advance: Some(now),
            moving_time_s,
            ..Self::default()
        }
    }

    fn current_pause(&self, now: Instant) -> Duration {
        self.pause_started
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    fn elapsed_s(&self, now: Instant) -> f64 {
        let Some(origin) = self.origin else {
            return 0.0;
        };
        let running = now
            .saturating_duration_since(origin)
            .saturating_sub(self.paused_total)
            .saturating_sub(self.current_pause(now));
        self.base_elapsed_s + running.as_secs_f64()
    }

    fn paused_s(&self, now: Instant) -> f64 {
        self.base_paused_s + (self.paused_total + self.current_pause(now)).as_secs_f64()
    }

    /// Credit moving time up to `now`.
    fn advance(&mut self, now: Instant, recording: bool) {
        if let Some(last) = self.last_advance {
            if recording {
                self.moving_time_s += now.saturating_duration_since(last).as_secs_f64();
            }
        }
        self.last_advance = Some(now);
    }

    fn begin_pause(&mut self, now: Instant) {
        if self.pause_started.is_none() {
            self.pause_started = Some(now);
        }
    }

    fn end_pause(&mut self, now: Instant) {
        if let Some(start) = self.pause_started.take() {
            self.paused_total += now.saturating_duration_since(start);
        }
    }
}

/// Drives one outdoor session at a time.
pub struct SessionEngine<R: RemoteStore> {
    settings: RecordingSettings,
    location: LocationSettings,
    status: SessionStatus,
    session: Option<Session>,
    pause_reason: Option<PauseReason>,
    integrator: MetricIntegrator,
    auto_pause: AutoPauseDetector,
    splits: SplitTracker,
    clock: SessionClock,
    sample_count: u64,
    last_sample_elapsed_s: f64,
    used_auto_pause: bool,
    restored: bool,

    foreground: Arc<dyn LocationProducer>,
    background: Arc<dyn BackgroundLocation>,
    background_active: bool,
    foreground_tx: mpsc::UnboundedSender<LocationEvent>,
    foreground_rx: mpsc::UnboundedReceiver<LocationEvent>,
    observer_tx: mpsc::UnboundedSender<LocationEvent>,
    observer_rx: mpsc::UnboundedReceiver<LocationEvent>,

    database: Arc<Mutex<Database>>,
    registry: ActiveSessionRegistry,
    storage_guard: Arc<dyn StorageGuard>,
    sync: SyncEngine<R>,
    events: broadcast::Sender<SessionEvent>,
}

impl<R: RemoteStore> SessionEngine<R> {
    pub fn new(
        config: &AppConfig,
        database: Arc<Mutex<Database>>,
        remote: Arc<R>,
        foreground: Arc<dyn LocationProducer>,
        background: Arc<dyn BackgroundLocation>,
        connectivity: Connectivity,
    ) -> Self {
        if let Err(e) = config.validate() {
            tracing::warn!("Session engine built from invalid configuration: {}", e);
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (foreground_tx, foreground_rx) = mpsc::unbounded_channel();
        let (observer_tx, observer_rx) = mpsc::unbounded_channel();

        let sync = SyncEngine::new(
            remote,
            DurableQueue::new(Arc::clone(&database)),
            connectivity,
            &config.sync,
        )
        .with_events(events.clone());

        Self {
            settings: config.recording.clone(),
            location: config.location.clone(),
            status: SessionStatus::Idle,
            session: None,
            pause_reason: None,
            integrator: MetricIntegrator::new(&config.recording),
            auto_pause: AutoPauseDetector::from_settings(&config.recording),
            splits: SplitTracker::new(config.recording.auto_split_distance_m),
            clock: SessionClock::default(),
            sample_count: 0,
            last_sample_elapsed_s: 0.0,
            used_auto_pause: false,
            restored: false,
            foreground,
            background,
            background_active: false,
            foreground_tx,
            foreground_rx,
            observer_tx,
            observer_rx,
            registry: ActiveSessionRegistry::new(Arc::clone(&database)),
            database,
            storage_guard: Arc::new(DiskStorageGuard::new(config.data_dir.clone())),
            sync,
            events,
        }
    }

    /// Replace the disk-space check consulted by `start()`.
    pub fn with_storage_guard(mut self, guard: Arc<dyn StorageGuard>) -> Self {
        self.storage_guard = guard;
        self
    }

    // ========== Queries ==========

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pause_reason
    }

    pub fn background_active(&self) -> bool {
        self.background_active
    }

    pub fn splits(&self) -> &[Split] {
        self.splits.splits()
    }

    pub fn sync(&self) -> &SyncEngine<R> {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncEngine<R> {
        &mut self.sync
    }

    pub fn registry(&self) -> &ActiveSessionRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Live values at the current instant.
    pub fn live(&self) -> LiveSummary {
        let now = Instant::now();
        let mut moving_time_s = self.clock.moving_time_s;
        if self.status == SessionStatus::Recording {
            if let Some(last) = self.clock.last_advance {
                moving_time_s += now.saturating_duration_since(last).as_secs_f64();
            }
        }

        LiveSummary {
            status: self.status,
            session_id: self.session_id(),
            elapsed_s: self.clock.elapsed_s(now),
            moving_time_s,
            paused_time_s: self.clock.paused_s(now),
            distance_m: self.integrator.distance_m(),
            elev_gain_m: self.integrator.elev_gain_m(),
            max_speed_mps: self.integrator.max_speed_mps(),
            current_speed_mps: self.integrator.current_speed_mps(),
            current_pace_s_per_km: self.integrator.current_pace_s_per_km(),
            sample_count: self.sample_count,
            auto_paused: self.pause_reason == Some(PauseReason::Auto),
        }
    }

    // ========== Controls ==========

    /// Start a new outdoor session.
    pub async fn start(&mut self, request: StartRequest) -> Result<Uuid, RecorderError> {
        if !self.status.can_start() {
            return Err(self.invalid("start"));
        }
        if !self.foreground.permission().is_granted() {
            tracing::warn!("Cannot start session: location permission not granted");
            return Err(RecorderError::PermissionDenied);
        }
        if let Some(existing) = self.registry.current()? {
            tracing::warn!(
                "Cannot start session: {} session {} is active",
                existing.kind,
                existing.session_id
            );
            return Err(RecorderError::ConflictingActiveSession {
                kind: existing.kind,
                session_id: existing.session_id,
            });
        }
        match self.storage_guard.status() {
            StorageStatus::Critical => {
                tracing::error!("Storage is critically low - cannot start recording");
                return Err(RecorderError::StorageFull);
            }
            StorageStatus::Low => tracing::warn!("Storage is running low"),
            _ => {}
        }

        let started_at = Utc::now();
        let title = request
            .title
            .clone()
            .unwrap_or_else(|| request.activity_type.label().to_string());
        let new_session = NewSession {
            activity_type: request.activity_type,
            started_at,
            timezone: request.timezone.clone(),
            privacy: request.privacy,
            title,
        };
        let session_id = self
            .sync
            .remote()
            .create_session(&new_session)
            .await
            .map_err(|e| RecorderError::StartFailed(e.to_string()))?;

        let session = Session::new(session_id, &request, started_at);
        let entry = ActiveSessionEntry::new(session_id, SessionKind::Outdoor, &session.title, started_at);
        if let Err(e) = self.registry.claim(&entry) {
            self.abandon_remote(session_id, &session).await;
            return Err(e.into());
        }

        self.reset();
        self.session = Some(session);
        self.clock = SessionClock::started(Instant::now());

        if let Err(e) = self.start_foreground() {
            tracing::error!("Foreground location failed to start: {}", e);
            if let Err(release) = self.registry.release(&session_id) {
                tracing::error!("Failed to release registry after start failure: {}", release);
            }
            if let Some(session) = self.session.take() {
                self.abandon_remote(session_id, &session).await;
            }
            self.clock = SessionClock::default();
            return Err(RecorderError::StartFailed(e.to_string()));
        }
        self.start_background();

        self.set_status(SessionStatus::Recording);
        tracing::info!("Started {} session {}", request.activity_type.label(), session_id);
        self.save_checkpoint_logged();
        Ok(session_id)
    }

    /// Pause manually. Converts an automatic pause into a manual one.
    pub fn pause(&mut self) -> Result<(), RecorderError> {
        match (self.status, self.pause_reason) {
            (SessionStatus::Recording, _) => {
                self.enter_pause(PauseReason::Manual);
                Ok(())
            }
            (SessionStatus::Paused, Some(PauseReason::Auto)) => {
                self.stop_foreground();
                self.pause_reason = Some(PauseReason::Manual);
                tracing::info!("Auto-pause converted to manual pause");
                self.save_checkpoint_logged();
                Ok(())
            }
            _ => Err(self.invalid("pause")),
        }
    }

    pub fn resume(&mut self) -> Result<(), RecorderError> {
        if self.status != SessionStatus::Paused {
            return Err(self.invalid("resume"));
        }
        self.exit_pause()
    }

    /// Close a manual lap at the current position.
    pub fn lap(&mut self) -> Result<Split, RecorderError> {
        if !self.status.is_live() {
            return Err(self.invalid("lap"));
        }

        let now = Instant::now();
        self.clock
            .advance(now, self.status == SessionStatus::Recording);
        let elapsed = self.clock.elapsed_s(now);
        let split = self.splits.lap(self.integrator.distance_m(), elapsed);

        tracing::info!("Lap {} recorded ({:.0} m)", split.index, split.distance_m);
        self.emit(SessionEvent::SplitRecorded(split.clone()));
        self.save_checkpoint_logged();
        Ok(split)
    }

    /// Stop recording, deliver everything and mark the session completed.
    ///
    /// On failure the session goes back to `Paused` with all samples kept,
    /// and `finish()` may be called again.
    pub async fn finish(&mut self) -> Result<Session, RecorderError> {
        if !self.status.is_live() {
            return Err(self.invalid("finish"));
        }
        let Some(session_id) = self.session_id() else {
            return Err(self.invalid("finish"));
        };

        let now = self.enter_saving();

        if let Err(e) = self.sync.final_flush(session_id).await {
            return Err(self.fail_finish(format!("samples could not be stored locally: {}", e)));
        }

        let update = self.build_update(SessionStatus::Completed, now);
        if let Err(e) = self
            .sync
            .remote()
            .update_session(session_id, &update)
            .await
        {
            return Err(self.fail_finish(format!("final aggregates not written: {}", e)));
        }

        if let Err(e) = self.registry.release(&session_id) {
            return Err(self.fail_finish(format!("registry not released: {}", e)));
        }
        self.clear_checkpoint_logged(&session_id);

        let Some(session) = self.apply_update(&update) else {
            return Err(self.invalid("finish"));
        };
        self.set_status(SessionStatus::Completed);
        tracing::info!(
            "Completed session {}: {:.0} m in {:.0} s, {} splits",
            session_id,
            session.distance_m,
            session.duration_s,
            session.splits.len()
        );
        Ok(session)
    }

    /// Stop recording and mark the session canceled.
    ///
    /// Captured samples are still delivered; the remote status update is
    /// best effort. If the samples cannot even be stored locally the session
    /// goes back to `Paused` and `cancel()` may be called again.
    pub async fn cancel(&mut self) -> Result<(), RecorderError> {
        if !self.status.is_live() {
            return Err(self.invalid("cancel"));
        }
        let Some(session_id) = self.session_id() else {
            return Err(self.invalid("cancel"));
        };

        let now = self.enter_saving();

        if let Err(e) = self.sync.final_flush(session_id).await {
            tracing::error!("Cancel failed, samples could not be stored locally: {}", e);
            self.return_to_paused();
            return Err(e.into());
        }

        let update = self.build_update(SessionStatus::Canceled, now);
        if let Err(e) = self
            .sync
            .remote()
            .update_session(session_id, &update)
            .await
        {
            tracing::warn!("Failed to mark session {} canceled remotely: {}", session_id, e);
        }

        if let Err(e) = self.registry.release(&session_id) {
            self.return_to_paused();
            return Err(e.into());
        }
        self.clear_checkpoint_logged(&session_id);

        self.apply_update(&update);
        self.set_status(SessionStatus::Canceled);
        tracing::info!("Canceled session {}", session_id);
        Ok(())
    }

    /// Rebuild a paused session from the registry after a process restart.
    pub fn restore(&mut self, entry: &ActiveSessionEntry) -> Result<(), RecorderError> {
        if !self.status.can_start() {
            return Err(self.invalid("restore"));
        }
        if entry.kind != SessionKind::Outdoor {
            return Err(RecorderError::RecoveryFailed(format!(
                "registry names a {} session",
                entry.kind
            )));
        }

        let checkpoint: Option<SessionCheckpoint> = self
            .database
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))?
            .load_checkpoint(&entry.session_id)?;

        self.reset();
        let now = Instant::now();

        match checkpoint {
            Some(checkpoint) => {
                let elapsed_s = checkpoint.elapsed_s.max(entry.elapsed_s);
                self.integrator = MetricIntegrator::new(&self.settings).with_state(checkpoint.integrator);
                self.splits = checkpoint.splits;
                self.sample_count = checkpoint.sample_count;
                self.last_sample_elapsed_s = checkpoint.last_sample_elapsed_s;
                self.used_auto_pause = checkpoint.used_auto_pause;
                self.clock = SessionClock::restored(
                    now,
                    elapsed_s,
                    checkpoint.paused_time_s,
                    checkpoint.moving_time_s,
                );
                self.session = Some(checkpoint.session);
            }
            None => {
                tracing::warn!(
                    "No checkpoint for session {}, restoring from registry snapshot",
                    entry.session_id
                );
                let request = StartRequest::new(Default::default()).with_title(entry.title.clone());
                let mut state = self.integrator.state().clone();
                state.distance_m = entry.distance_m;
                self.integrator = MetricIntegrator::new(&self.settings).with_state(state);
                self.clock = SessionClock::restored(now, entry.elapsed_s, 0.0, entry.elapsed_s);
                self.last_sample_elapsed_s = entry.elapsed_s;
                self.session = Some(Session::new(entry.session_id, &request, entry.started_at));
            }
        }

        self.restored = true;
        self.pause_reason = Some(PauseReason::Manual);
        self.set_status(SessionStatus::Paused);
        self.refresh_registry(SessionPhase::Paused, now);
        self.start_background();

        tracing::info!(
            "Restored session {} at {:.0} s, {:.0} m",
            entry.session_id,
            self.clock.elapsed_s(now),
            self.integrator.distance_m()
        );
        Ok(())
    }

    /// Drop the governing session after the user confirmed discarding it.
    ///
    /// Queued samples are kept for delivery. Returns the discarded id.
    pub async fn discard(&mut self) -> Result<Option<Uuid>, RecorderError> {
        if self.status.is_live() {
            let Some(session_id) = self.session_id() else {
                return Err(self.invalid("discard"));
            };
            self.enter_saving();
            if let Err(e) = self.sync.final_flush(session_id).await {
                tracing::error!("Discard failed, samples could not be stored locally: {}", e);
                self.return_to_paused();
                return Err(e.into());
            }
            if let Err(e) = self.registry.release(&session_id) {
                self.return_to_paused();
                return Err(e.into());
            }
            self.clear_checkpoint_logged(&session_id);
            self.pause_reason = None;
            self.set_status(SessionStatus::Idle);
            self.session = None;
            tracing::warn!("Discarded session {}", session_id);
            return Ok(Some(session_id));
        }

        if self.status == SessionStatus::Saving {
            return Err(self.invalid("discard"));
        }

        let discarded = self.registry.discard()?;
        if let Some(entry) = &discarded {
            self.clear_checkpoint_logged(&entry.session_id);
        }
        Ok(discarded.map(|e| e.session_id))
    }

    // ========== Timers ==========

    /// One-second housekeeping: advance clocks and refresh the registry.
    pub fn tick(&mut self) {
        if !self.status.is_live() {
            return;
        }
        let now = Instant::now();
        self.clock
            .advance(now, self.status == SessionStatus::Recording);
        let phase = match self.status {
            SessionStatus::Recording => SessionPhase::Recording,
            _ => SessionPhase::Paused,
        };
        self.refresh_registry(phase, now);
    }

    /// Persist a crash-recovery checkpoint for the live session.
    pub fn checkpoint(&self) -> Result<(), RecorderError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        if !self.status.is_live() {
            return Ok(());
        }

        let now = Instant::now();
        let checkpoint = SessionCheckpoint {
            session: session.clone(),
            integrator: self.integrator.state().clone(),
            splits: self.splits.clone(),
            elapsed_s: self.clock.elapsed_s(now),
            moving_time_s: self.clock.moving_time_s,
            paused_time_s: self.clock.paused_s(now),
            last_sample_elapsed_s: self.last_sample_elapsed_s,
            sample_count: self.sample_count,
            used_auto_pause: self.used_auto_pause,
            saved_at: Utc::now(),
        };

        self.database
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))?
            .save_checkpoint(&session.id, &checkpoint)?;
        tracing::debug!("Checkpointed session {}", session.id);
        Ok(())
    }

    /// Kick off a background drain of all queued samples.
    pub fn trigger_drain(&self) -> bool {
        self.sync.trigger_drain().is_some()
    }

    /// Drain all queued samples and wait for the result.
    pub async fn drain_pending(&self) -> Result<DrainReport, RecorderError> {
        Ok(self.sync.drain_pending_sessions().await?)
    }

    // ========== Fix ingestion ==========

    /// Next fix from either producer.
    pub async fn next_location_event(&mut self) -> Option<LocationEvent> {
        tokio::select! {
            Some(event) = self.foreground_rx.recv() => Some(event),
            Some(event) = self.observer_rx.recv() => Some(event),
            else => None,
        }
    }

    pub fn handle_location_event(&mut self, event: LocationEvent) {
        match event.source {
            FixSource::Foreground => self.handle_foreground_fix(event.fix),
            FixSource::Background => self.observe_background_fix(&event.fix),
        }
    }

    /// Integrate one foreground fix.
    pub fn handle_foreground_fix(&mut self, fix: Fix) {
        match (self.status, self.pause_reason) {
            (SessionStatus::Recording, _) => {}
            // Without background fixes the producer keeps running through an
            // auto-pause and only feeds the detector.
            (SessionStatus::Paused, Some(PauseReason::Auto)) if !self.background_active => {
                self.evaluate_resume(&fix);
                return;
            }
            _ => {
                tracing::trace!("Dropping foreground fix while {}", self.status);
                return;
            }
        }
        let Some(session_id) = self.session_id() else {
            return;
        };

        let now = Instant::now();
        self.clock.advance(now, true);
        let elapsed = self.clock.elapsed_s(now).max(self.last_sample_elapsed_s);
        self.last_sample_elapsed_s = elapsed;

        let previous_distance = self.integrator.distance_m();
        let integration = self.integrator.ingest(&fix);

        let action = if integration.is_accurate() {
            fix.speed_mps
                .and_then(|speed| self.auto_pause.evaluate(SessionStatus::Recording, speed))
        } else {
            None
        };

        let mut sample = Sample::from_fix(session_id, &fix, elapsed, FixSource::Foreground);
        sample.grade_pct = integration.grade_pct;
        sample.is_moving = action != Some(AutoPauseAction::Pause);
        self.sync.push(sample);
        self.sample_count += 1;

        let distance = self.integrator.distance_m();
        if distance > previous_distance {
            for split in self.splits.record_progress(distance, elapsed) {
                self.emit(SessionEvent::SplitRecorded(split));
            }
        }

        if action == Some(AutoPauseAction::Pause) {
            tracing::info!("Auto-pausing session {}", session_id);
            self.used_auto_pause = true;
            self.enter_pause(PauseReason::Auto);
            self.emit(SessionEvent::AutoPaused(session_id));
        }
    }

    /// Record a background fix as an audit sample and feed it to the
    /// auto-pause detector.
    ///
    /// The sample joins the same buffer as foreground samples, so elapsed
    /// order holds across sources. It never counts toward distance or
    /// elevation.
    pub fn observe_background_fix(&mut self, fix: &Fix) {
        if !self.status.is_live() {
            tracing::trace!("Dropping background fix while {}", self.status);
            return;
        }
        let Some(session_id) = self.session_id() else {
            return;
        };

        let now = Instant::now();
        let recording = self.status == SessionStatus::Recording;
        self.clock.advance(now, recording);
        let elapsed = self.clock.elapsed_s(now).max(self.last_sample_elapsed_s);
        self.last_sample_elapsed_s = elapsed;

        let mut sample = Sample::from_fix(session_id, fix, elapsed, FixSource::Background);
        sample.is_moving = recording;
        self.sync.push(sample);

        if self.pause_reason == Some(PauseReason::Auto) {
            self.evaluate_resume(fix);
        }
    }

    fn evaluate_resume(&mut self, fix: &Fix) {
        if !self.integrator.is_accurate(fix) {
            return;
        }
        let Some(speed) = fix.speed_mps else {
            return;
        };
        if self.auto_pause.evaluate(SessionStatus::Paused, speed) != Some(AutoPauseAction::Resume) {
            return;
        }

        match self.exit_pause() {
            Ok(()) => {
                if let Some(session_id) = self.session_id() {
                    tracing::info!("Auto-resuming session {} at {:.1} m/s", session_id, speed);
                    self.emit(SessionEvent::AutoResumed(session_id));
                }
            }
            Err(e) => tracing::warn!("Auto-resume failed: {}", e),
        }
    }

    // ========== Internals ==========

    fn invalid(&self, action: &'static str) -> RecorderError {
        RecorderError::InvalidTransition {
            from: self.status,
            action,
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_status(&mut self, to: SessionStatus) {
        let from = self.status;
        self.status = to;
        if let Some(session) = self.session.as_mut() {
            session.status = to;
            if from != to {
                tracing::debug!("Session {} {} -> {}", session.id, from, to);
                let session_id = session.id;
                self.emit(SessionEvent::StatusChanged { session_id, from, to });
            }
        }
    }

    fn reset(&mut self) {
        self.integrator.reset();
        self.splits.reset();
        self.clock = SessionClock::default();
        self.session = None;
        self.pause_reason = None;
        self.sample_count = 0;
        self.last_sample_elapsed_s = 0.0;
        self.used_auto_pause = false;
        self.restored = false;
        while self.foreground_rx.try_recv().is_ok() {}
        while self.observer_rx.try_recv().is_ok() {}
    }

    fn enter_pause(&mut self, reason: PauseReason) {
        let now = Instant::now();
        self.clock.advance(now, true);
        self.clock.begin_pause(now);

        if reason == PauseReason::Manual || self.background_active {
            self.stop_foreground();
        }
        self.pause_reason = Some(reason);
        self.set_status(SessionStatus::Paused);
        self.refresh_registry(SessionPhase::Paused, now);
        self.save_checkpoint_logged();
    }

    fn exit_pause(&mut self) -> Result<(), RecorderError> {
        if !self.foreground.is_running() {
            self.start_foreground()?;
        }

        let now = Instant::now();
        self.clock.advance(now, false);
        self.clock.end_pause(now);
        self.pause_reason = None;
        self.set_status(SessionStatus::Recording);
        self.refresh_registry(SessionPhase::Recording, now);
        self.save_checkpoint_logged();
        Ok(())
    }

    /// Freeze the clock, stop producers and move to `Saving`.
    fn enter_saving(&mut self) -> Instant {
        let now = Instant::now();
        self.clock
            .advance(now, self.status == SessionStatus::Recording);
        self.clock.begin_pause(now);

        self.set_status(SessionStatus::Saving);
        self.refresh_registry(SessionPhase::Saving, now);
        self.stop_foreground();
        self.stop_background();
        now
    }

    fn return_to_paused(&mut self) {
        self.pause_reason = Some(PauseReason::Manual);
        self.set_status(SessionStatus::Paused);
        self.refresh_registry(SessionPhase::Paused, Instant::now());
        self.start_background();
        self.save_checkpoint_logged();
    }

    fn fail_finish(&mut self, reason: String) -> RecorderError {
        tracing::error!("Finish failed, session kept paused: {}", reason);
        self.return_to_paused();
        if let Some(session_id) = self.session_id() {
            self.emit(SessionEvent::FinishFailed {
                session_id,
                reason: reason.clone(),
            });
        }
        RecorderError::FinishPersistFailure(reason)
    }

    fn build_update(&self, status: SessionStatus, now: Instant) -> SessionUpdate {
        let elapsed_s = self.clock.elapsed_s(now);
        let paused_time_s = self.clock.paused_s(now);
        let moving_time_s = self.clock.moving_time_s;
        let distance_m = self.integrator.distance_m();

        let mut splits = self.splits.splits().to_vec();
        if let Some(closing) = self.splits.closing_split(distance_m, elapsed_s) {
            splits.push(closing);
        }

        SessionUpdate {
            ended_at: Utc::now(),
            duration_s: elapsed_s + paused_time_s,
            moving_time_s,
            paused_time_s,
            distance_m,
            elev_gain_m: self.integrator.elev_gain_m(),
            max_speed_mps: self.integrator.max_speed_mps(),
            avg_speed_mps: average_speed(distance_m, moving_time_s),
            avg_pace_s_per_km: average_pace(distance_m, moving_time_s),
            splits,
            status,
            flags: SessionFlags {
                auto_paused: self.used_auto_pause,
                background_location: self.background.is_available(),
                restored: self.restored,
            },
        }
    }

    fn apply_update(&mut self, update: &SessionUpdate) -> Option<Session> {
        let session = self.session.as_mut()?;
        session.ended_at = Some(update.ended_at);
        session.duration_s = update.duration_s;
        session.moving_time_s = update.moving_time_s;
        session.paused_time_s = update.paused_time_s;
        session.distance_m = update.distance_m;
        session.elev_gain_m = update.elev_gain_m;
        session.max_speed_mps = update.max_speed_mps;
        session.avg_speed_mps = update.avg_speed_mps;
        session.avg_pace_s_per_km = update.avg_pace_s_per_km;
        session.splits = update.splits.clone();
        Some(session.clone())
    }

    fn refresh_registry(&self, phase: SessionPhase, now: Instant) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        if let Err(e) = self.registry.update_progress(
            &session_id,
            phase,
            self.clock.elapsed_s(now),
            self.integrator.distance_m(),
        ) {
            tracing::warn!("Failed to refresh active session registry: {}", e);
        }
    }

    fn start_foreground(&self) -> Result<(), RecorderError> {
        let sink = FixSink::new(self.foreground_tx.clone(), FixSource::Foreground);
        self.foreground
            .start(&self.location.foreground_request(), sink)?;
        Ok(())
    }

    /// Stop the foreground producer and drop fixes already in flight.
    fn stop_foreground(&mut self) {
        self.foreground.stop();
        let mut dropped = 0;
        while self.foreground_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!("Dropped {} in-flight foreground fixes", dropped);
        }
    }

    fn start_background(&mut self) {
        if self.background_active {
            return;
        }
        if !self.location.background_enabled || !self.background.is_available() {
            tracing::info!("Background location unavailable, continuing foreground-only");
            return;
        }
        if !self.background.permission().is_granted() {
            tracing::info!("Background location not permitted, continuing foreground-only");
            return;
        }

        let handler =
            BackgroundFixHandler::new(Arc::clone(&self.database)).with_observer(self.observer_tx.clone());
        match self
            .background
            .start(&self.location.background_request(), handler)
        {
            Ok(()) => self.background_active = true,
            Err(e) => tracing::warn!("Background location failed to start: {}", e),
        }
    }

    fn stop_background(&mut self) {
        if self.background_active {
            self.background.stop();
            self.background_active = false;
        }
        while self.observer_rx.try_recv().is_ok() {}
    }

    async fn abandon_remote(&self, session_id: Uuid, session: &Session) {
        let update = SessionUpdate {
            ended_at: Utc::now(),
            duration_s: 0.0,
            moving_time_s: 0.0,
            paused_time_s: 0.0,
            distance_m: 0.0,
            elev_gain_m: 0.0,
            max_speed_mps: 0.0,
            avg_speed_mps: 0.0,
            avg_pace_s_per_km: None,
            splits: Vec::new(),
            status: SessionStatus::Canceled,
            flags: SessionFlags::default(),
        };
        if let Err(e) = self.sync.remote().update_session(session_id, &update).await {
            tracing::warn!("Failed to cancel remote session {} ({}): {}", session_id, session.title, e);
        }
    }

    fn save_checkpoint_logged(&self) {
        if let Err(e) = self.checkpoint() {
            tracing::warn!("Failed to save checkpoint: {}", e);
        }
    }

    fn clear_checkpoint_logged(&self, session_id: &Uuid) {
        let result = self
            .database
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))
            .and_then(|db| db.clear_checkpoint(session_id));
        if let Err(e) = result {
            tracing::warn!("Failed to clear checkpoint for {}: {}", session_id, e);
        }
    }
}

impl<R: RemoteStore> Drop for SessionEngine<R> {
    fn drop(&mut self) {
        self.foreground.stop();
        self.background.stop();
    }
}
