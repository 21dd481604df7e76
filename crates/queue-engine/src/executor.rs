use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use edgequeue_core::{Job, StorageAdapter, WorkerError};

use crate::events::{EventSink, QueueEvent};
use crate::metrics;
use crate::registry::Worker;

/// Runs one claimed job through its full lifecycle and persists the
/// outcome. Per run, exactly one of `{success, failed}` is emitted,
/// preceded by at most one `failure`, and the `on_complete` callback
/// fires exactly once.
pub(crate) struct Executor {
    adapter: Arc<dyn StorageAdapter>,
    events: Arc<EventSink>,
}

impl Executor {
    pub(crate) fn new(adapter: Arc<dyn StorageAdapter>, events: Arc<EventSink>) -> Self {
        Self { adapter, events }
    }

    pub(crate) async fn execute(&self, mut job: Job, worker: Worker) {
        job.active = true;
        job.failed = None;
        job.worker_name = Some(job.name.clone());
        if let Err(e) = self.adapter.update_job(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist active state");
        }

        self.events.emit(QueueEvent::Start(job.clone()));
        if let Some(cb) = &worker.options.on_start {
            cb(&job);
        }

        metrics::INFLIGHT_JOBS.inc();
        let result = self.run_worker(&job, &worker).await;
        metrics::INFLIGHT_JOBS.dec();

        match result {
            Ok(()) => self.finish_success(job, &worker).await,
            Err(err) => self.finish_failure(job, &worker, err).await,
        }
    }

    /// Race the callback against the job's time budget. The budget
    /// elapsing or the task panicking both count as worker failures; an
    /// over-budget worker keeps running detached, so workers holding
    /// scarce resources must be cancellation-aware.
    async fn run_worker(&self, job: &Job, worker: &Worker) -> Result<(), WorkerError> {
        let handle = tokio::spawn((worker.run)(job.id, job.payload.clone()));

        if job.timeout_ms == 0 {
            return match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(WorkerError::Panicked(join_err.to_string())),
            };
        }

        match tokio::time::timeout(Duration::from_millis(job.timeout_ms), handle).await {
            Err(_) => Err(WorkerError::Timeout(job.timeout_ms)),
            Ok(Err(join_err)) => Err(WorkerError::Panicked(join_err.to_string())),
            Ok(Ok(result)) => result,
        }
    }

    async fn finish_success(&self, job: Job, worker: &Worker) {
        if let Err(e) = self.adapter.remove_job(job.id).await {
            error!(job_id = %job.id, error = %e, "failed to delete finished job");
        }
        metrics::JOBS_SUCCEEDED.inc();
        debug!(job_id = %job.id, name = %job.name, "job finished");

        self.events.emit(QueueEvent::Success(job.clone()));
        if let Some(cb) = &worker.options.on_success {
            cb(&job);
        }
        if let Some(cb) = &worker.options.on_complete {
            cb(&job);
        }
    }

    async fn finish_failure(&self, mut job: Job, worker: &Worker, err: WorkerError) {
        job.record_failure(&err, Utc::now());

        if job.is_terminal() {
            warn!(job_id = %job.id, name = %job.name, error = %err, "job exhausted its attempts");
            metrics::JOBS_DEAD_LETTERED.inc();

            self.events.emit(QueueEvent::Failed(job.clone(), err.to_string()));
            if let Some(cb) = &worker.options.on_failed {
                cb(&job, &err);
            }
            if let Some(cb) = &worker.options.on_complete {
                cb(&job);
            }

            if self.adapter.supports_dead_letter() {
                if let Err(e) = self.adapter.move_to_dlq(&job).await {
                    error!(job_id = %job.id, error = %e, "failed to dead-letter job");
                }
            } else if let Err(e) = self.adapter.update_job(&job).await {
                // The spent record stays in place; attempts == max_attempts
                // keeps it invisible to claim.
                error!(job_id = %job.id, error = %e, "failed to persist terminal failure");
            }
        } else {
            debug!(job_id = %job.id, name = %job.name, error = %err, "job failed, will retry");
            metrics::JOBS_RETRIED.inc();

            self.events.emit(QueueEvent::Failure(job.clone(), err.to_string()));
            if let Some(cb) = &worker.options.on_failure {
                cb(&job, &err);
            }
            if let Some(cb) = &worker.options.on_complete {
                cb(&job);
            }

            if let Err(e) = self.adapter.update_job(&job).await {
                error!(job_id = %job.id, error = %e, "failed to persist retryable failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::events::EventKind;
    use crate::registry::{Registry, WorkerOptions};
    use edgequeue_core::{JobOptions, MemoryAdapter};

    struct Harness {
        adapter: Arc<MemoryAdapter>,
        registry: Registry,
        executor: Executor,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    fn harness() -> Harness {
        let adapter = Arc::new(MemoryAdapter::new());
        let events = Arc::new(EventSink::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        for (kind, tag) in [
            (EventKind::Start, "start"),
            (EventKind::Success, "success"),
            (EventKind::Failure, "failure"),
            (EventKind::Failed, "failed"),
        ] {
            let log = log.clone();
            events.on(kind, move |_| log.lock().unwrap().push(tag));
        }

        Harness {
            adapter: adapter.clone(),
            registry: Registry::default(),
            executor: Executor::new(adapter, events),
            log,
        }
    }

    #[tokio::test]
    async fn success_deletes_and_emits() -> anyhow::Result<()> {
        let h = harness();
        h.registry.add_worker(
            "ok",
            |_id, _payload| async move { Ok::<(), Infallible>(()) },
            WorkerOptions::default(),
        );

        let job = Job::new("ok", json!(null), &JobOptions::default());
        h.adapter.add_job(&job).await?;
        let worker = h.registry.get("ok").expect("registered");

        h.executor.execute(job.clone(), worker).await;

        assert!(h.adapter.get_job(job.id).await?.is_none());
        assert_eq!(*h.log.lock().unwrap(), vec!["start", "success"]);
        Ok(())
    }

    #[tokio::test]
    async fn retryable_failure_persists_the_transition() -> anyhow::Result<()> {
        let h = harness();
        h.registry.add_worker(
            "flaky",
            |_id, _payload| async move { Err::<(), &str>("boom") },
            WorkerOptions::default(),
        );

        let job = Job::new(
            "flaky",
            json!(null),
            &JobOptions {
                attempts: Some(3),
                ..JobOptions::default()
            },
        );
        h.adapter.add_job(&job).await?;
        let worker = h.registry.get("flaky").expect("registered");

        h.executor.execute(job.clone(), worker).await;

        let stored = h.adapter.get_job(job.id).await?.expect("retained");
        assert_eq!(stored.attempts, 1);
        assert!(!stored.active);
        assert!(stored.failed.is_some());
        assert_eq!(stored.last_error(), Some("boom"));
        assert_eq!(*h.log.lock().unwrap(), vec!["start", "failure"]);
        Ok(())
    }

    #[tokio::test]
    async fn terminal_failure_routes_to_dead_letter() -> anyhow::Result<()> {
        let h = harness();
        h.registry.add_worker(
            "doomed",
            |_id, _payload| async move { Err::<(), &str>("boom") },
            WorkerOptions::default(),
        );

        let job = Job::new("doomed", json!({"k": 1}), &JobOptions::default());
        h.adapter.add_job(&job).await?;
        let worker = h.registry.get("doomed").expect("registered");

        h.executor.execute(job.clone(), worker).await;

        assert!(h.adapter.get_job(job.id).await?.is_none());
        let dead = h.adapter.dead_letter_jobs().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);
        assert_eq!(dead[0].last_error(), Some("boom"));
        assert_eq!(*h.log.lock().unwrap(), vec!["start", "failed"]);
        Ok(())
    }

    #[tokio::test]
    async fn overrunning_worker_times_out() -> anyhow::Result<()> {
        let h = harness();
        h.registry.add_worker(
            "slow",
            |_id, _payload| async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<(), Infallible>(())
            },
            WorkerOptions::default(),
        );

        let job = Job::new(
            "slow",
            json!(null),
            &JobOptions {
                timeout_ms: 20,
                attempts: Some(2),
                ..JobOptions::default()
            },
        );
        h.adapter.add_job(&job).await?;
        let worker = h.registry.get("slow").expect("registered");

        h.executor.execute(job.clone(), worker).await;

        let stored = h.adapter.get_job(job.id).await?.expect("retained for retry");
        assert_eq!(stored.last_error(), Some("worker timed out after 20 ms"));
        Ok(())
    }

    async fn explode(
        _id: edgequeue_core::JobId,
        _payload: serde_json::Value,
    ) -> Result<(), Infallible> {
        panic!("worker bug")
    }

    #[tokio::test]
    async fn panicking_worker_counts_as_failure() -> anyhow::Result<()> {
        let h = harness();
        h.registry
            .add_worker("bad", explode, WorkerOptions::default());

        let job = Job::new(
            "bad",
            json!(null),
            &JobOptions {
                attempts: Some(2),
                ..JobOptions::default()
            },
        );
        h.adapter.add_job(&job).await?;
        let worker = h.registry.get("bad").expect("registered");

        h.executor.execute(job.clone(), worker).await;

        let stored = h.adapter.get_job(job.id).await?.expect("retained for retry");
        assert!(stored
            .last_error()
            .expect("error recorded")
            .starts_with("worker panicked"));
        assert_eq!(*h.log.lock().unwrap(), vec!["start", "failure"]);
        Ok(())
    }

    #[tokio::test]
    async fn lifecycle_callbacks_fire_in_order() -> anyhow::Result<()> {
        let h = harness();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let push = |tag: &'static str, calls: &Arc<Mutex<Vec<&'static str>>>| {
            let calls = calls.clone();
            move |_job: &Job| calls.lock().unwrap().push(tag)
        };
        let options = WorkerOptions::new()
            .on_start(push("on_start", &calls))
            .on_success(push("on_success", &calls))
            .on_complete(push("on_complete", &calls));

        h.registry.add_worker(
            "ok",
            |_id, _payload| async move { Ok::<(), Infallible>(()) },
            options,
        );

        let job = Job::new("ok", json!(null), &JobOptions::default());
        h.adapter.add_job(&job).await?;
        let worker = h.registry.get("ok").expect("registered");

        h.executor.execute(job, worker).await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["on_start", "on_success", "on_complete"]
        );
        Ok(())
    }
}
