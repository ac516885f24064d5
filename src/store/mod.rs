//! Coordination-store access: the engine contract, the embedded memory
//! engine, the client wrapper every component holds, and key derivation.

pub mod client;
pub mod engine;
pub mod keys;
pub mod memory;

pub use client::Coordinator;
pub use engine::{EventKind, KeyValue, KvEngine, LeaseId, WatchEvent, NO_PRIOR_REVISION};
pub use keys::{Keyspace, ProcKey};
pub use memory::MemoryEngine;
