//! Integration test modules.

mod background_test;
mod offline_sync_test;
mod session_lifecycle_test;
mod session_mock;
