//! Storage module: local database, durable queue, registry and configuration.

pub mod config;
pub mod database;
pub mod disk;
pub mod queue;
pub mod registry;
pub mod schema;

pub use config::{AppConfig, LocationSettings, RecordingSettings, SyncSettings};
pub use database::{Database, DatabaseError, QueuedSample};
pub use disk::{DiskStorageGuard, StorageGuard, StorageStatus};
pub use queue::DurableQueue;
pub use registry::{ActiveSessionEntry, ActiveSessionRegistry, RegistryError, SessionKind, SessionPhase};
