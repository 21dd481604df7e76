//! Persistent, adapter-backed job queue for mobile/edge environments.
//!
//! Producers enqueue jobs tagged with a name; a processing loop claims
//! jobs from durable storage and hands each to a registered worker
//! callback, with bounded concurrency, priority ordering, crash
//! recovery, exponential-backoff retry with jitter, a hard time-to-live,
//! opt-in network gating, a dead-letter channel for terminal failures
//! and per-name pause/resume.
//!
//! Storage is pluggable behind [`StorageAdapter`]; the built-in
//! [`MemoryAdapter`] is the default and doubles as the reference
//! implementation of the claim contract.
//!
//! # Quick start
//!
//! ```no_run
//! use edgequeue::{JobOptions, Queue, WorkerOptions};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Queue::builder().concurrency(2).build();
//!
//! queue.add_worker(
//!     "send-report",
//!     |_id, payload| async move {
//!         println!("sending {payload}");
//!         Ok::<(), std::convert::Infallible>(())
//!     },
//!     WorkerOptions::default(),
//! );
//!
//! queue
//!     .enqueue("send-report", json!({"day": "monday"}), JobOptions::default())
//!     .await?;
//! queue.start().await?;
//! # Ok(())
//! # }
//! ```

mod events;
mod executor;
pub mod metrics;
mod network;
mod processor;
mod queue;
mod registry;

pub use edgequeue_core::{
    Job, JobId, JobOptions, MemoryAdapter, QueueError, StorageAdapter, StorageError, WorkerError,
    DEFAULT_TIMEOUT_MS, DEFAULT_TTL_MS,
};

pub use events::{EventKind, QueueEvent};
pub use network::{NetworkMonitor, NetworkState};
pub use queue::{Queue, QueueBuilder};
pub use registry::{FailureCallback, JobCallback, WorkerFn, WorkerOptions};
