use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use edgequeue_core::{Job, QueueError, StorageAdapter};

use crate::executor::Executor;
use crate::metrics;
use crate::network::NetworkMonitor;
use crate::registry::Registry;

/// Delay before retrying a tick whose claim hit a storage error.
const STORAGE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The scheduling loop.
///
/// Claims work under the concurrency budget, filters it (pause, ttl,
/// backoff, connectivity), dispatches to the executor, and re-arms
/// itself: each completed execution ticks again, a batch that only hit
/// backoff schedules a one-shot wake, and a drained loop goes inactive
/// until the facade nudges it.
pub(crate) struct Processor {
    adapter: Arc<dyn StorageAdapter>,
    registry: Arc<Registry>,
    executor: Arc<Executor>,
    concurrency: usize,
    network: Option<Arc<dyn NetworkMonitor>>,

    active: AtomicBool,
    /// True until the first `start()` and after every `stop()`.
    /// Distinguishes a loop that must not run from one that merely
    /// drained and may be woken in place.
    stopped: AtomicBool,
    running_jobs: AtomicUsize,
    connected: AtomicBool,
    paused: Mutex<HashSet<String>>,
    net_task: Mutex<Option<JoinHandle<()>>>,

    // Single in-flight tick guard plus a pending flag; see tick().
    tick_active: AtomicBool,
    tick_pending: AtomicBool,
}

impl Processor {
    pub(crate) fn new(
        adapter: Arc<dyn StorageAdapter>,
        registry: Arc<Registry>,
        executor: Arc<Executor>,
        concurrency: usize,
        network: Option<Arc<dyn NetworkMonitor>>,
    ) -> Self {
        Self {
            adapter,
            registry,
            executor,
            concurrency: concurrency.max(1),
            network,
            active: AtomicBool::new(false),
            stopped: AtomicBool::new(true),
            running_jobs: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            paused: Mutex::new(HashSet::new()),
            net_task: Mutex::new(None),
            tick_active: AtomicBool::new(false),
            tick_pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn running_jobs(&self) -> usize {
        self.running_jobs.load(Ordering::SeqCst)
    }

    /// Idempotent: a second start while active is a no-op.
    pub(crate) async fn start(proc: &Arc<Processor>) {
        if proc.active.swap(true, Ordering::SeqCst) {
            return;
        }
        proc.stopped.store(false, Ordering::SeqCst);
        Processor::install_network_subscription(proc);
        Arc::clone(proc).tick().await;
    }

    /// Cooperative: in-flight executions finish, no new work is claimed.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);

        let mut task = self.net_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = task.take() {
            task.abort();
        }
    }

    pub(crate) fn pause_job(&self, name: &str) {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        paused.insert(name.to_string());
    }

    /// Takes effect at the next tick boundary.
    pub(crate) fn resume_job(proc: &Arc<Processor>, name: &str) {
        {
            let mut paused = proc.paused.lock().unwrap_or_else(|e| e.into_inner());
            paused.remove(name);
        }
        Processor::wake(proc);
    }

    fn is_paused(&self, name: &str) -> bool {
        let paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        paused.contains(name)
    }

    /// Re-arm a drained loop and tick. Never overrides an explicit stop.
    pub(crate) fn wake(proc: &Arc<Processor>) {
        if proc.stopped.load(Ordering::SeqCst) {
            return;
        }
        proc.active.store(true, Ordering::SeqCst);
        Processor::schedule_tick(proc);
    }

    /// Arrange for a tick without awaiting it.
    pub(crate) fn schedule_tick(proc: &Arc<Processor>) {
        let proc = Arc::clone(proc);
        tokio::spawn(async move {
            proc.tick().await;
        });
    }

    fn schedule_wake(proc: &Arc<Processor>, delay: Duration) {
        let proc = Arc::clone(proc);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            proc.tick().await;
        });
    }

    fn install_network_subscription(proc: &Arc<Processor>) {
        let Some(monitor) = &proc.network else {
            // No source available: treat the process as online.
            proc.connected.store(true, Ordering::SeqCst);
            return;
        };
        // Seed from the receiver, not the monitor: a transition landing
        // between a direct read and the subscription would be lost.
        let mut rx = monitor.subscribe();
        proc.connected.store(*rx.borrow(), Ordering::SeqCst);

        let watcher = Arc::clone(proc);
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let now_connected = *rx.borrow_and_update();
                let was_connected = watcher.connected.swap(now_connected, Ordering::SeqCst);
                if !was_connected && now_connected {
                    debug!("connectivity restored, waking processor");
                    Processor::wake(&watcher);
                }
            }
        });

        let mut slot = proc.net_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    /// One scheduling pass.
    ///
    /// Safe to call from any task at any time: a single body runs at a
    /// time, and late callers leave a pending flag the running body
    /// consumes before the guard is released.
    pub(crate) fn tick(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            if self.tick_active.swap(true, Ordering::SeqCst) {
                self.tick_pending.store(true, Ordering::SeqCst);
                return;
            }
            loop {
                loop {
                    run_tick(&self).await;
                    if !self.tick_pending.swap(false, Ordering::SeqCst) {
                        break;
                    }
                }
                self.tick_active.store(false, Ordering::SeqCst);
                // A caller may have flagged pending between the last check
                // and the release; reclaim the guard rather than lose the
                // wakeup.
                if self.tick_pending.swap(false, Ordering::SeqCst) {
                    if self.tick_active.swap(true, Ordering::SeqCst) {
                        break;
                    }
                    continue;
                }
                break;
            }
        })
    }

    async fn unclaim(&self, mut job: Job) {
        job.active = false;
        if let Err(e) = self.adapter.update_job(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to release claimed job");
        }
    }
}

async fn run_tick(proc: &Arc<Processor>) {
    if !proc.is_active() {
        return;
    }
    let running = proc.running_jobs.load(Ordering::SeqCst);
    if running >= proc.concurrency {
        return;
    }
    let slots = proc.concurrency - running;

    let jobs = match proc.adapter.claim_concurrent_jobs(slots).await {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(error = %e, "claim failed, retrying shortly");
            Processor::schedule_wake(proc, STORAGE_RETRY_DELAY);
            return;
        }
    };
    metrics::JOBS_CLAIMED.inc_by(jobs.len() as u64);

    if jobs.is_empty() && proc.running_jobs.load(Ordering::SeqCst) == 0 {
        proc.active.store(false, Ordering::SeqCst);
        return;
    }

    let now = Utc::now();
    let mut started = 0usize;
    let mut expired = 0usize;
    let mut next_wake: Option<Duration> = None;

    for mut job in jobs {
        let over_budget = proc.running_jobs.load(Ordering::SeqCst) >= proc.concurrency;
        if !proc.is_active() || over_budget || proc.is_paused(&job.name) {
            proc.unclaim(job).await;
            continue;
        }

        if job.is_expired(now) {
            debug!(job_id = %job.id, name = %job.name, "dropping expired job");
            metrics::JOBS_EXPIRED.inc();
            expired += 1;
            if let Err(e) = proc.adapter.remove_job(job.id).await {
                warn!(job_id = %job.id, error = %e, "failed to remove expired job");
            }
            continue;
        }

        if let Some(remaining) = job.backoff_remaining(now) {
            next_wake = Some(next_wake.map_or(remaining, |wake| wake.min(remaining)));
            proc.unclaim(job).await;
            continue;
        }

        if job.online_only && !proc.connected.load(Ordering::SeqCst) {
            proc.unclaim(job).await;
            continue;
        }

        // Safety net: the adapter should not have returned a terminal record.
        if job.is_terminal() {
            proc.unclaim(job).await;
            continue;
        }

        let Some(worker) = proc.registry.get(&job.name) else {
            // Recorded on the job without consuming an attempt.
            let err = QueueError::MissingWorker(job.name.clone());
            warn!(job_id = %job.id, error = %err, "skipping job");
            job.active = false;
            job.failed = Some(now);
            job.meta_data.insert(
                "lastError".to_string(),
                serde_json::Value::String(err.to_string()),
            );
            if let Err(e) = proc.adapter.update_job(&job).await {
                warn!(job_id = %job.id, error = %e, "failed to record missing worker");
            }
            continue;
        };

        proc.running_jobs.fetch_add(1, Ordering::SeqCst);
        started += 1;

        let owner = Arc::clone(proc);
        let executor = Arc::clone(&proc.executor);
        tokio::spawn(async move {
            executor.execute(job, worker).await;
            owner.running_jobs.fetch_sub(1, Ordering::SeqCst);
            owner.tick().await;
        });
    }

    if started > 0 || expired > 0 {
        // Fill whatever capacity the filters left unused. A batch of
        // expired jobs may also have been hiding claimable work behind
        // it; they are gone from the store, so sweeping again cannot
        // spin.
        proc.tick_pending.store(true, Ordering::SeqCst);
    } else if let Some(delay) = next_wake {
        // Everything eligible is backing off; stay active and wake when
        // the earliest retry is due.
        debug!(delay_ms = delay.as_millis() as u64, "sleeping until next retry");
        Processor::schedule_wake(proc, delay);
    } else if proc.running_jobs.load(Ordering::SeqCst) == 0 {
        proc.active.store(false, Ordering::SeqCst);
    }
    // Otherwise an in-flight completion will re-tick.
}
