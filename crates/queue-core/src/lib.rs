//! Core types for edgequeue: the job record and its scheduling helpers,
//! the error taxonomy, and the storage adapter contract every backing
//! store must honour. Ships the in-memory adapter used as the default
//! backing store.

mod adapter;
mod error;
mod job;
mod memory;

pub use adapter::StorageAdapter;
pub use error::{QueueError, StorageError, WorkerError};
pub use job::{Job, JobId, JobOptions, DEFAULT_TIMEOUT_MS, DEFAULT_TTL_MS};
pub use memory::MemoryAdapter;
