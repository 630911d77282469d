//! Persistence subsystem
//!
//! - `kv`: the asynchronous key/value substrate trait and an in-memory backend.
//! - `file`: a JSON-file backend for the host process.
//! - `gateway`: typed operations (sessions, capture flag, caches, settings)
//!   over whichever substrate is injected.

mod file;
mod gateway;
mod kv;

pub use file::FileStore;
pub use gateway::{AnalyticsCache, StorageGateway};
pub use kv::{KvStore, MemoryStore};
