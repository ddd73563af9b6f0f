//! Single-task driver for the session engine.
//!
//! Location fixes, the 1 Hz tick, the flush and checkpoint timers,
//! connectivity changes and user commands are all serialized through one
//! `select!` loop, so the engine never needs a lock.

use crate::recording::engine::SessionEngine;
use crate::recording::types::{
    LiveSummary, RecorderError, Session, SessionEvent, Split, StartRequest,
};
use crate::storage::config::AppConfig;
use crate::storage::registry::ActiveSessionEntry;
use crate::sync::remote::RemoteStore;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, RecorderError>>;

/// Requests sent from a [`SessionHandle`] to the driver.
pub enum SessionCommand {
    Start(StartRequest, Reply<Uuid>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Lap(Reply<Split>),
    Finish(Reply<Session>),
    Cancel(Reply<()>),
    Restore(ActiveSessionEntry, Reply<()>),
    Discard(Reply<Option<Uuid>>),
    Live(oneshot::Sender<LiveSummary>),
    Splits(oneshot::Sender<Vec<Split>>),
    Shutdown,
}

/// Cloneable control surface for a running driver.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn start(&self, request: StartRequest) -> Result<Uuid, RecorderError> {
        self.request(|reply| SessionCommand::Start(request, reply)).await
    }

    pub async fn pause(&self) -> Result<(), RecorderError> {
        self.request(SessionCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), RecorderError> {
        self.request(SessionCommand::Resume).await
    }

    pub async fn lap(&self) -> Result<Split, RecorderError> {
        self.request(SessionCommand::Lap).await
    }

    pub async fn finish(&self) -> Result<Session, RecorderError> {
        self.request(SessionCommand::Finish).await
    }

    pub async fn cancel(&self) -> Result<(), RecorderError> {
        self.request(SessionCommand::Cancel).await
    }

    pub async fn restore(&self, entry: ActiveSessionEntry) -> Result<(), RecorderError> {
        self.request(|reply| SessionCommand::Restore(entry, reply)).await
    }

    pub async fn discard(&self) -> Result<Option<Uuid>, RecorderError> {
        self.request(SessionCommand::Discard).await
    }

    pub async fn live(&self) -> Result<LiveSummary, RecorderError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Live(tx)).await?;
        rx.await.map_err(|_| RecorderError::DriverStopped)
    }

    pub async fn splits(&self) -> Result<Vec<Split>, RecorderError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Splits(tx)).await?;
        rx.await.map_err(|_| RecorderError::DriverStopped)
    }

    /// Stop the driver loop. The engine is handed back by the join handle.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, RecorderError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| RecorderError::DriverStopped)?
    }

    async fn send(&self, command: SessionCommand) -> Result<(), RecorderError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RecorderError::DriverStopped)
    }
}

/// Owns a [`SessionEngine`] and runs its event loop.
pub struct SessionDriver<R: RemoteStore> {
    engine: SessionEngine<R>,
    commands: mpsc::Receiver<SessionCommand>,
    connectivity: watch::Receiver<bool>,
    tick_period: Duration,
    flush_period: Duration,
    checkpoint_period: Duration,
}

impl<R: RemoteStore> SessionDriver<R> {
    pub fn new(engine: SessionEngine<R>, config: &AppConfig) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = SessionHandle {
            commands: tx,
            events: engine.event_sender(),
        };
        let driver = Self {
            connectivity: engine.sync().connectivity().subscribe(),
            engine,
            commands: rx,
            tick_period: Duration::from_millis(config.recording.tick_interval_ms.max(1)),
            flush_period: Duration::from_secs(config.sync.flush_interval_secs.max(1)),
            checkpoint_period: Duration::from_secs(config.recording.checkpoint_interval_secs.max(1)),
        };
        (driver, handle)
    }

    /// Run the loop on a new task.
    pub fn spawn(self) -> JoinHandle<SessionEngine<R>> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(mut self) -> SessionEngine<R> {
        let mut tick = interval(self.tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush = interval_at(Instant::now() + self.flush_period, self.flush_period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut checkpoint =
            interval_at(Instant::now() + self.checkpoint_period, self.checkpoint_period);
        checkpoint.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching_connectivity = true;

        // Samples left queued by an earlier run.
        self.engine.trigger_drain();
        tracing::info!("Session driver started");

        loop {
            tokio::select! {
                Some(event) = self.engine.next_location_event() => {
                    self.engine.handle_location_event(event);
                }
                _ = tick.tick() => {
                    self.engine.tick();
                }
                _ = flush.tick() => {
                    self.engine.trigger_drain();
                }
                _ = checkpoint.tick(), if self.engine.status().is_live() => {
                    if let Err(e) = self.engine.checkpoint() {
                        tracing::warn!("Periodic checkpoint failed: {}", e);
                    }
                }
                changed = self.connectivity.changed(), if watching_connectivity => {
                    match changed {
                        Ok(()) => {
                            if *self.connectivity.borrow_and_update() {
                                self.engine.trigger_drain();
                            }
                        }
                        Err(_) => watching_connectivity = false,
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
            }
        }

        tracing::info!("Session driver stopped ({})", self.engine.status());
        self.engine
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start(request, reply) => {
                let _ = reply.send(self.engine.start(request).await);
            }
            SessionCommand::Pause(reply) => {
                let _ = reply.send(self.engine.pause());
            }
            SessionCommand::Resume(reply) => {
                let _ = reply.send(self.engine.resume());
            }
            SessionCommand::Lap(reply) => {
                let _ = reply.send(self.engine.lap());
            }
            SessionCommand::Finish(reply) => {
                let _ = reply.send(self.engine.finish().await);
            }
            SessionCommand::Cancel(reply) => {
                let _ = reply.send(self.engine.cancel().await);
            }
            SessionCommand::Restore(entry, reply) => {
                let _ = reply.send(self.engine.restore(&entry));
            }
            SessionCommand::Discard(reply) => {
                let _ = reply.send(self.engine.discard().await);
            }
            SessionCommand::Live(reply) => {
                let _ = reply.send(self.engine.live());
            }
            SessionCommand::Splits(reply) => {
                let _ = reply.send(self.engine.splits().to_vec());
            }
            SessionCommand::Shutdown => {}
        }
    }
}
