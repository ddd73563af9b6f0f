//! Sample buffer, remote store and sync engine.

pub mod buffer;
pub mod connectivity;
pub mod engine;
pub mod http;
pub mod remote;

pub use buffer::SampleBuffer;
pub use connectivity::Connectivity;
pub use engine::{DrainReport, FinalFlushReport, FlushOutcome, SyncEngine};
pub use http::HttpRemoteStore;
pub use remote::{
    MemoryRemoteStore, NewSession, RemoteError, RemoteStore, SessionFlags, SessionUpdate,
    StoredSession,
};
