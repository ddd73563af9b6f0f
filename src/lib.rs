//! RustRun - Outdoor Activity Recording Engine
//!
//! Records GPS-tracked runs, walks and hikes. Fixes are integrated into
//! distance, elevation gain and pace, split per kilometer, and streamed to a
//! remote session store in batches. Batches that cannot be delivered are kept
//! in a local SQLite queue and drained once connectivity returns, so a
//! session survives dead zones and process restarts without losing samples.

pub mod geo;
pub mod location;
pub mod recording;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use location::producer::{LocationProducer, ReplayLocationProducer};
pub use recording::driver::{SessionDriver, SessionHandle};
pub use recording::engine::SessionEngine;
pub use recording::types::{RecorderError, Session, SessionStatus, StartRequest};
pub use storage::config::AppConfig;
pub use storage::database::Database;
pub use sync::remote::{MemoryRemoteStore, RemoteStore};
