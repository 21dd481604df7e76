use thiserror::Error;

/// Transient failure signalled by a storage adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("operation not supported by this adapter")]
    Unsupported,
}

/// Failure of a single worker invocation.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Failed(String),

    #[error("worker timed out after {0} ms")]
    Timeout(u64),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced through the queue facade.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Storage refused to persist a new job.
    #[error("failed to enqueue job: {0}")]
    Enqueue(#[source] StorageError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("no worker registered for '{0}'")]
    MissingWorker(String),
}
