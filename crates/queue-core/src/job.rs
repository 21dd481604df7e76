use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type JobId = Uuid;

/// Default time-to-live for new jobs: 7 days.
pub const DEFAULT_TTL_MS: u64 = 604_800_000;

/// Default per-run budget for a worker invocation.
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;

/// A durable work item: an immutable descriptor plus a small mutable
/// state block (`attempts`, `active`, `failed`, `meta_data.lastError`),
/// stored as one record keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Selects a registered worker.
    pub name: String,
    /// Producer-defined, stored verbatim.
    pub payload: Value,
    /// Diagnostic map; the core writes `lastError` here.
    pub meta_data: Map<String, Value>,
    /// Higher runs earlier.
    pub priority: i32,
    /// Failed runs so far. Zero at creation.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Base retry delay in milliseconds.
    pub time_interval_ms: u64,
    /// 0 means never expire.
    pub ttl_ms: u64,
    /// Requires connectivity to run.
    pub online_only: bool,
    /// True while claimed or running in this process.
    pub active: bool,
    /// Per-run budget in milliseconds. 0 disables the budget.
    pub timeout_ms: u64,
    pub created: DateTime<Utc>,
    /// Last failure instant, cleared when a new attempt starts.
    pub failed: Option<DateTime<Utc>>,
    pub worker_name: Option<String>,
}

/// Producer-facing knobs accepted by `enqueue`.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub priority: i32,
    /// Total runs allowed. Defaults to 1 when neither this nor `retries` is set.
    pub attempts: Option<u32>,
    /// Alias: when set and `attempts` is not, `attempts = retries + 1`.
    pub retries: Option<u32>,
    pub time_interval_ms: u64,
    pub ttl_ms: u64,
    pub online_only: bool,
    pub timeout_ms: u64,
    pub meta_data: Map<String, Value>,
    /// Nudge the processor after persisting. Defaults to true.
    pub auto_start: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            attempts: None,
            retries: None,
            time_interval_ms: 0,
            ttl_ms: DEFAULT_TTL_MS,
            online_only: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            meta_data: Map::new(),
            auto_start: true,
        }
    }
}

impl Job {
    pub fn new(name: impl Into<String>, payload: Value, opts: &JobOptions) -> Self {
        let max_attempts = opts
            .attempts
            .or_else(|| opts.retries.map(|r| r.saturating_add(1)))
            .unwrap_or(1)
            .max(1);

        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            meta_data: opts.meta_data.clone(),
            priority: opts.priority,
            attempts: 0,
            max_attempts,
            time_interval_ms: opts.time_interval_ms,
            ttl_ms: opts.ttl_ms,
            online_only: opts.online_only,
            active: false,
            timeout_ms: opts.timeout_ms,
            created: Utc::now(),
            failed: None,
            worker_name: None,
        }
    }

    /// A job is expired iff it has a ttl and its age exceeds it.
    /// Expired jobs are removed on sight without running.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl_ms > 0 && now - self.created > Duration::milliseconds(self.ttl_ms as i64)
    }

    /// Terminal jobs must not be visible to the claim path.
    pub fn is_terminal(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Remaining backoff delay before this job may run again, if any.
    ///
    /// The delay after attempt `k` is `time_interval * 2^k` plus a jitter
    /// drawn uniformly from `[0, time_interval)`.
    pub fn backoff_remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let failed = self.failed?;
        if self.is_terminal() {
            return None;
        }

        let factor = 1u64.checked_shl(self.attempts).unwrap_or(u64::MAX);
        let mut delay = self.time_interval_ms.saturating_mul(factor);
        if self.time_interval_ms > 0 {
            delay = delay.saturating_add(rand::thread_rng().gen_range(0..self.time_interval_ms));
        }

        let elapsed = (now - failed).num_milliseconds().max(0) as u64;
        if elapsed < delay {
            Some(std::time::Duration::from_millis(delay - elapsed))
        } else {
            None
        }
    }

    /// Non-terminal failure transition: consume one attempt, release the
    /// claim, stamp the failure instant and record the error message.
    pub fn record_failure(&mut self, error: impl std::fmt::Display, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.active = false;
        self.failed = Some(now);
        self.meta_data
            .insert("lastError".to_string(), Value::String(error.to_string()));
    }

    pub fn last_error(&self) -> Option<&str> {
        self.meta_data.get("lastError").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn factory_applies_defaults() {
        let job = Job::new("sync", json!({"k": "v"}), &JobOptions::default());
        assert_eq!(job.priority, 0);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 1);
        assert_eq!(job.time_interval_ms, 0);
        assert_eq!(job.ttl_ms, DEFAULT_TTL_MS);
        assert_eq!(job.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(!job.online_only);
        assert!(!job.active);
        assert!(job.failed.is_none());
    }

    #[test]
    fn retries_alias_maps_to_attempts() {
        let opts = JobOptions {
            retries: Some(2),
            ..JobOptions::default()
        };
        let job = Job::new("sync", json!(null), &opts);
        assert_eq!(job.max_attempts, 3);

        // Explicit attempts wins over the alias.
        let opts = JobOptions {
            attempts: Some(5),
            retries: Some(2),
            ..JobOptions::default()
        };
        let job = Job::new("sync", json!(null), &opts);
        assert_eq!(job.max_attempts, 5);
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        let opts = JobOptions {
            attempts: Some(0),
            ..JobOptions::default()
        };
        let job = Job::new("sync", json!(null), &opts);
        assert_eq!(job.max_attempts, 1);
    }

    #[test]
    fn ttl_zero_never_expires() {
        let opts = JobOptions {
            ttl_ms: 0,
            ..JobOptions::default()
        };
        let job = Job::new("sync", json!(null), &opts);
        let far_future = job.created + Duration::days(365 * 10);
        assert!(!job.is_expired(far_future));
    }

    #[test]
    fn expiry_uses_creation_instant() {
        let opts = JobOptions {
            ttl_ms: 50,
            ..JobOptions::default()
        };
        let job = Job::new("sync", json!(null), &opts);
        assert!(!job.is_expired(job.created + Duration::milliseconds(50)));
        assert!(job.is_expired(job.created + Duration::milliseconds(51)));
    }

    #[test]
    fn backoff_skips_unfailed_and_terminal_jobs() {
        let opts = JobOptions {
            attempts: Some(2),
            time_interval_ms: 100,
            ..JobOptions::default()
        };
        let mut job = Job::new("sync", json!(null), &opts);
        let now = Utc::now();
        assert!(job.backoff_remaining(now).is_none());

        job.record_failure("boom", now);
        job.record_failure("boom", now);
        assert!(job.is_terminal());
        assert!(job.backoff_remaining(now).is_none());
    }

    #[test]
    fn backoff_delay_is_bounded_by_interval_and_attempt() {
        let opts = JobOptions {
            attempts: Some(5),
            time_interval_ms: 100,
            ..JobOptions::default()
        };
        let mut job = Job::new("sync", json!(null), &opts);
        let now = Utc::now();
        job.record_failure("boom", now);
        job.record_failure("boom", now);
        assert_eq!(job.attempts, 2);

        // With no elapsed time, delay is in [T*2^k, T*2^k + T).
        for _ in 0..50 {
            let remaining = job.backoff_remaining(now).expect("should back off");
            let ms = remaining.as_millis() as u64;
            assert!(ms >= 400, "delay {ms} below exponential floor");
            assert!(ms < 500, "delay {ms} above jitter ceiling");
        }
    }

    #[test]
    fn backoff_elapses() {
        let opts = JobOptions {
            attempts: Some(3),
            time_interval_ms: 10,
            ..JobOptions::default()
        };
        let mut job = Job::new("sync", json!(null), &opts);
        let failed_at = Utc::now();
        job.record_failure("boom", failed_at);

        // delay after one attempt is at most 10·2 + 10 = 30 ms
        let later = failed_at + Duration::milliseconds(30);
        assert!(job.backoff_remaining(later).is_none());
    }

    #[test]
    fn zero_interval_means_no_backoff() {
        let mut job = Job::new(
            "sync",
            json!(null),
            &JobOptions {
                attempts: Some(3),
                ..JobOptions::default()
            },
        );
        let now = Utc::now();
        job.record_failure("boom", now);
        assert!(job.backoff_remaining(now).is_none());
    }

    #[test]
    fn record_failure_transitions_state() {
        let mut job = Job::new(
            "sync",
            json!(null),
            &JobOptions {
                attempts: Some(2),
                ..JobOptions::default()
            },
        );
        job.active = true;
        let now = Utc::now();
        job.record_failure("connection reset", now);

        assert_eq!(job.attempts, 1);
        assert!(!job.active);
        assert_eq!(job.failed, Some(now));
        assert_eq!(job.last_error(), Some("connection reset"));
        assert!(!job.is_terminal());

        job.record_failure("connection reset", now);
        assert!(job.is_terminal());
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut job = Job::new("sync", json!({"file": "a.bin"}), &JobOptions::default());
        job.record_failure("boom", Utc::now());

        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.name, job.name);
        assert_eq!(decoded.payload, job.payload);
        assert_eq!(decoded.attempts, job.attempts);
        assert_eq!(decoded.failed, job.failed);
        assert_eq!(decoded.last_error(), Some("boom"));
    }
}
