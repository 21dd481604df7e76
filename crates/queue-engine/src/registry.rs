use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use edgequeue_core::{Job, JobId, WorkerError};

/// Type-erased worker callback: `(job id, payload) -> result`.
pub type WorkerFn =
    Arc<dyn Fn(JobId, Value) -> BoxFuture<'static, Result<(), WorkerError>> + Send + Sync>;

/// Callback invoked with the job snapshot at a lifecycle edge.
pub type JobCallback = Arc<dyn Fn(&Job) + Send + Sync>;

/// Callback invoked with the job snapshot and the error that stopped it.
pub type FailureCallback = Arc<dyn Fn(&Job, &WorkerError) + Send + Sync>;

/// Lifecycle callbacks attached to a worker registration. All optional.
#[derive(Clone, Default)]
pub struct WorkerOptions {
    pub(crate) on_start: Option<JobCallback>,
    pub(crate) on_success: Option<JobCallback>,
    pub(crate) on_failure: Option<FailureCallback>,
    pub(crate) on_failed: Option<FailureCallback>,
    pub(crate) on_complete: Option<JobCallback>,
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl Fn(&Job) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&Job) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Invoked on each non-terminal failure.
    pub fn on_failure(mut self, f: impl Fn(&Job, &WorkerError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(f));
        self
    }

    /// Invoked once when the job exhausts its attempts.
    pub fn on_failed(mut self, f: impl Fn(&Job, &WorkerError) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Arc::new(f));
        self
    }

    /// Invoked after every run, regardless of outcome.
    pub fn on_complete(mut self, f: impl Fn(&Job) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }
}

/// A registered worker: the erased callback plus its options.
#[derive(Clone)]
pub(crate) struct Worker {
    pub(crate) run: WorkerFn,
    pub(crate) options: WorkerOptions,
}

/// Name → worker mapping. Lookup only; owns no jobs.
#[derive(Default)]
pub(crate) struct Registry {
    workers: RwLock<HashMap<String, Worker>>,
}

impl Registry {
    /// Register `f` under `name`, replacing any previous registration.
    pub(crate) fn add_worker<F, Fut, E>(&self, name: &str, f: F, options: WorkerOptions)
    where
        F: Fn(JobId, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let run: WorkerFn = Arc::new(move |id, payload| {
            f(id, payload)
                .map(|result| result.map_err(|e| WorkerError::Failed(e.to_string())))
                .boxed()
        });

        let mut map = self.workers.write().unwrap_or_else(|e| e.into_inner());
        map.insert(name.to_string(), Worker { run, options });
    }

    pub(crate) fn remove_worker(&self, name: &str) {
        let mut map = self.workers.write().unwrap_or_else(|e| e.into_inner());
        map.remove(name);
    }

    pub(crate) fn get(&self, name: &str) -> Option<Worker> {
        let map = self.workers.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned()
    }

    pub(crate) fn has_worker(&self, name: &str) -> bool {
        let map = self.workers.read().unwrap_or_else(|e| e.into_inner());
        map.contains_key(name)
    }
}
