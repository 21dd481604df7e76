use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use edgequeue_core::{
    Job, JobId, JobOptions, MemoryAdapter, QueueError, StorageAdapter,
};

use crate::events::{EventKind, EventSink, QueueEvent};
use crate::executor::Executor;
use crate::metrics;
use crate::network::NetworkMonitor;
use crate::processor::Processor;
use crate::registry::{Registry, WorkerOptions};

/// Builder for [`Queue`].
///
/// Defaults: in-memory adapter, concurrency 1, no network monitor
/// (connectivity fixed to online).
pub struct QueueBuilder {
    adapter: Option<Arc<dyn StorageAdapter>>,
    concurrency: usize,
    network: Option<Arc<dyn NetworkMonitor>>,
}

impl QueueBuilder {
    pub fn adapter(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Upper bound on concurrently running worker invocations.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Enable online-only gating against this connectivity source.
    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(monitor);
        self
    }

    pub fn build(self) -> Queue {
        metrics::init_metrics();

        let adapter = self
            .adapter
            .unwrap_or_else(|| Arc::new(MemoryAdapter::new()));
        let registry = Arc::new(Registry::default());
        let events = Arc::new(EventSink::default());
        let executor = Arc::new(Executor::new(adapter.clone(), events.clone()));
        let processor = Arc::new(Processor::new(
            adapter.clone(),
            registry.clone(),
            executor,
            self.concurrency,
            self.network,
        ));

        Queue {
            adapter,
            registry,
            events,
            processor,
            stopping: Arc::new(AtomicBool::new(false)),
            start_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Facade over the queue: producer API, worker registration, lifecycle
/// control and the event sink. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Queue {
    adapter: Arc<dyn StorageAdapter>,
    registry: Arc<Registry>,
    events: Arc<EventSink>,
    processor: Arc<Processor>,
    stopping: Arc<AtomicBool>,
    start_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Queue {
    pub fn builder() -> QueueBuilder {
        QueueBuilder {
            adapter: None,
            concurrency: 1,
            network: None,
        }
    }

    /// Queue over the in-memory adapter with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Register a worker under `name`, replacing any previous
    /// registration for that name.
    pub fn add_worker<F, Fut, E>(&self, name: &str, f: F, options: WorkerOptions)
    where
        F: Fn(JobId, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display,
    {
        self.registry.add_worker(name, f, options);
    }

    pub fn remove_worker(&self, name: &str) {
        self.registry.remove_worker(name);
    }

    pub fn has_worker(&self, name: &str) -> bool {
        self.registry.has_worker(name)
    }

    /// Subscribe to queue events. Listeners run synchronously in
    /// registration order.
    pub fn on(&self, kind: EventKind, listener: impl Fn(&QueueEvent) + Send + Sync + 'static) {
        self.events.on(kind, listener);
    }

    /// Persist a new job and, unless `options.auto_start` is false,
    /// nudge the processor.
    pub async fn enqueue(
        &self,
        name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobId, QueueError> {
        let job = Job::new(name, payload, &options);
        let id = job.id;

        self.adapter
            .add_job(&job)
            .await
            .map_err(QueueError::Enqueue)?;
        metrics::JOBS_ENQUEUED.inc();
        debug!(job_id = %id, name = %name, "job enqueued");

        if options.auto_start {
            self.nudge();
        }
        Ok(id)
    }

    /// Start processing. Idempotent; resets ghost-active records through
    /// the adapter's `recover` capability before the first claim.
    pub async fn start(&self) -> Result<(), QueueError> {
        let _guard = self.start_lock.lock().await;

        if self.processor.is_active() {
            return Ok(());
        }
        self.stopping.store(false, Ordering::SeqCst);

        if self.adapter.supports_recover() {
            self.adapter.recover().await?;
        }
        // stop() may have raced the recovery pass.
        if self.stopping.load(Ordering::SeqCst) {
            return Ok(());
        }

        Processor::start(&self.processor).await;
        Ok(())
    }

    /// Stop claiming new work. In-flight executions finish.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.processor.stop();
    }

    /// Keep jobs named `name` out of dispatch until resumed. Takes
    /// effect at the next tick boundary; already-running jobs finish.
    pub fn pause_job(&self, name: &str) {
        self.processor.pause_job(name);
    }

    /// Takes effect immediately: a drained processor is woken in place
    /// so jobs that queued up while paused get dispatched.
    pub fn resume_job(&self, name: &str) {
        Processor::resume_job(&self.processor, name);
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.adapter.get_job(id).await?)
    }

    pub async fn get_jobs(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.adapter.get_jobs().await?)
    }

    /// Drop every live record in the namespace.
    pub async fn flush(&self) -> Result<(), QueueError> {
        Ok(self.adapter.delete_all().await?)
    }

    pub fn is_active(&self) -> bool {
        self.processor.is_active()
    }

    /// Worker invocations currently in flight.
    pub fn running_jobs(&self) -> usize {
        self.processor.running_jobs()
    }

    /// Tick an active processor, or fire-and-forget a full start for an
    /// inactive one.
    fn nudge(&self) {
        if self.processor.is_active() {
            Processor::schedule_tick(&self.processor);
        } else {
            let queue = self.clone();
            tokio::spawn(async move {
                if let Err(e) = queue.start().await {
                    warn!(error = %e, "deferred start failed");
                }
            });
        }
    }
}
