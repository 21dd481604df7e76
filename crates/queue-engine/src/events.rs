use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use edgequeue_core::Job;

/// Event kinds subscribers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A worker invocation began.
    Start,
    /// The run succeeded and the record was deleted.
    Success,
    /// A non-terminal failure; the job will be retried.
    Failure,
    /// A terminal failure; the job was dead-lettered or retained spent.
    Failed,
}

/// Snapshot handed to listeners. The failure kinds carry the error text.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Start(Job),
    Success(Job),
    Failure(Job, String),
    Failed(Job, String),
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::Start(_) => EventKind::Start,
            QueueEvent::Success(_) => EventKind::Success,
            QueueEvent::Failure(_, _) => EventKind::Failure,
            QueueEvent::Failed(_, _) => EventKind::Failed,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            QueueEvent::Start(job)
            | QueueEvent::Success(job)
            | QueueEvent::Failure(job, _)
            | QueueEvent::Failed(job, _) => job,
        }
    }
}

type Listener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Fan-out sink for queue events.
///
/// Listeners run synchronously in registration order. A panicking
/// listener is caught and logged so it can never take down the executor.
#[derive(Default)]
pub struct EventSink {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
}

impl EventSink {
    pub fn on(&self, kind: EventKind, listener: impl Fn(&QueueEvent) + Send + Sync + 'static) {
        let mut map = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(kind).or_default().push(Arc::new(listener));
    }

    pub fn emit(&self, event: QueueEvent) {
        // Snapshot outside the lock so listeners may register new ones.
        let snapshot = {
            let map = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            map.get(&event.kind()).cloned().unwrap_or_default()
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!(kind = ?event.kind(), "event listener panicked");
            }
        }
    }
}
