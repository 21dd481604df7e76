use async_trait::async_trait;

use crate::{Job, JobId, StorageError};

/// Contract every backing store must honour.
///
/// Everything here is plain CRUD except `claim_concurrent_jobs`, which
/// carries the queue's one non-local correctness requirement: mutual
/// exclusion on claim. `recover` and `move_to_dlq` are optional
/// capabilities that callers feature-detect through the `supports_*`
/// probes.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Persist a new record. An existing record with the same id is replaced.
    async fn add_job(&self, job: &Job) -> Result<(), StorageError>;

    /// Persist state for an existing id. Absent ids are a no-op.
    async fn update_job(&self, job: &Job) -> Result<(), StorageError>;

    /// Delete by id.
    async fn remove_job(&self, id: JobId) -> Result<(), StorageError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StorageError>;

    /// Enumerate all records. No ordering contract.
    async fn get_jobs(&self) -> Result<Vec<Job>, StorageError>;

    /// Wipe all records in the namespace.
    async fn delete_all(&self) -> Result<(), StorageError>;

    /// Atomically claim up to `limit` pending jobs.
    ///
    /// Selects records where `active == false && attempts < max_attempts`,
    /// ordered by priority descending then creation ascending, marks them
    /// active in the same exclusive step, and returns copies. The
    /// select-and-mark must be serialised against concurrent claims so
    /// that no record is ever returned twice.
    async fn claim_concurrent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError>;

    /// Whether [`recover`](Self::recover) is available.
    fn supports_recover(&self) -> bool {
        false
    }

    /// Reset every `active` record. Called once at startup to clear
    /// ghosts left behind by a crashed process.
    async fn recover(&self) -> Result<(), StorageError> {
        Err(StorageError::Unsupported)
    }

    /// Whether [`move_to_dlq`](Self::move_to_dlq) is available.
    fn supports_dead_letter(&self) -> bool {
        false
    }

    /// Move a terminally failed job to the dead-letter sink and drop it
    /// from the live set. The sink must preserve id, name, payload,
    /// attempts, the failure instant and `metaData.lastError`.
    async fn move_to_dlq(&self, _job: &Job) -> Result<(), StorageError> {
        Err(StorageError::Unsupported)
    }
}
