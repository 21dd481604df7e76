use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static JOBS_ENQUEUED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_enqueued_total", "Total jobs enqueued").unwrap());

pub static JOBS_CLAIMED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_claimed_total", "Total jobs claimed for dispatch").unwrap());

pub static JOBS_SUCCEEDED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_succeeded_total", "Total jobs completed").unwrap());

pub static JOBS_RETRIED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_retried_total", "Total non-terminal job failures").unwrap());

pub static JOBS_DEAD_LETTERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "jobs_dead_lettered_total",
        "Total jobs that exhausted their attempts",
    )
    .unwrap()
});

pub static JOBS_EXPIRED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("jobs_expired_total", "Total jobs dropped by ttl").unwrap());

pub static INFLIGHT_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("inflight_jobs", "Worker invocations currently running").unwrap()
});

pub fn init_metrics() {
    let collectors: [Box<dyn Collector>; 7] = [
        Box::new(JOBS_ENQUEUED.clone()),
        Box::new(JOBS_CLAIMED.clone()),
        Box::new(JOBS_SUCCEEDED.clone()),
        Box::new(JOBS_RETRIED.clone()),
        Box::new(JOBS_DEAD_LETTERED.clone()),
        Box::new(JOBS_EXPIRED.clone()),
        Box::new(INFLIGHT_JOBS.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            // Every Queue::builder() call lands here; only the first
            // registration per process sticks.
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => tracing::error!(error = %e, "failed to register metric"),
        }
    }
}

/// Text exposition of every queue metric, for the host to export.
pub fn gather() -> String {
    let mut out = String::new();
    if let Err(e) = TextEncoder::new().encode_utf8(&REGISTRY.gather(), &mut out) {
        tracing::error!(error = %e, "failed to encode metrics");
    }
    out
}
