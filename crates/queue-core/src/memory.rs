//! In-memory adapter: the default backing store, and the reference
//! implementation of the claim contract.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Job, JobId, StorageAdapter, StorageError};

/// In-memory job store.
///
/// A single mutex serialises every operation, so `claim_concurrent_jobs`
/// is trivially exclusive. Supports both optional capabilities: `recover`
/// and a dead-letter sink (inspect it with [`dead_letter_jobs`]).
///
/// [`dead_letter_jobs`]: MemoryAdapter::dead_letter_jobs
#[derive(Default)]
pub struct MemoryAdapter {
    inner: Mutex<State>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    dead_letter: Vec<Job>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs routed to the dead-letter sink, oldest first.
    pub async fn dead_letter_jobs(&self) -> Vec<Job> {
        self.inner.lock().await.dead_letter.clone()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn add_job(&self, job: &Job) -> Result<(), StorageError> {
        self.inner.lock().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StorageError> {
        let mut state = self.inner.lock().await;
        if let Some(slot) = state.jobs.get_mut(&job.id) {
            *slot = job.clone();
        }
        Ok(())
    }

    async fn remove_job(&self, id: JobId) -> Result<(), StorageError> {
        self.inner.lock().await.jobs.remove(&id);
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StorageError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn get_jobs(&self) -> Result<Vec<Job>, StorageError> {
        Ok(self.inner.lock().await.jobs.values().cloned().collect())
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        self.inner.lock().await.jobs.clear();
        Ok(())
    }

    async fn claim_concurrent_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let mut state = self.inner.lock().await;

        let mut eligible: Vec<(JobId, i32, chrono::DateTime<chrono::Utc>)> = state
            .jobs
            .values()
            .filter(|j| !j.active && j.attempts < j.max_attempts)
            .map(|j| (j.id, j.priority, j.created))
            .collect();

        // priority desc, then created asc (FIFO within priority)
        eligible.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for (id, _, _) in eligible {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.active = true;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    fn supports_recover(&self) -> bool {
        true
    }

    async fn recover(&self) -> Result<(), StorageError> {
        let mut state = self.inner.lock().await;
        for job in state.jobs.values_mut() {
            job.active = false;
        }
        Ok(())
    }

    fn supports_dead_letter(&self) -> bool {
        true
    }

    async fn move_to_dlq(&self, job: &Job) -> Result<(), StorageError> {
        let mut state = self.inner.lock().await;
        state.jobs.remove(&job.id);
        state.dead_letter.push(job.clone());
        Ok(())
    }
}
