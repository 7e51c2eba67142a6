//! Durable jobs: the queue, its scheduler and the delivery handlers.

pub(crate) mod handlers;
mod queue;
mod scheduler;

use std::fmt::Display;
use std::time::Duration;

use jiff::Timestamp;
use minicbor::{Decode, Encode};

use crate::store::RecordId;

pub(crate) use queue::JobQueue;
pub(crate) use scheduler::{JobScheduler, JobSchedulerInit, JobSchedulerMsg, Scheduler};

pub(crate) const ACTIVITYPUB_HTTP: &str = "activitypub-http";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum JobState {
    #[n(0)]
    Pending,
    #[n(1)]
    Running,
    #[n(2)]
    Succeeded,
    #[n(3)]
    Expired,
}

impl JobState {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub(crate) enum HandlerName {
    #[n(0)]
    Broadcast,
    #[n(1)]
    Unicast,
    #[n(2)]
    Fetch,
}

impl Display for HandlerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandlerName::Broadcast => "broadcast",
            HandlerName::Unicast => "unicast",
            HandlerName::Fetch => "fetch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct Payload {
    #[n(0)]
    pub(crate) uris: Vec<String>,
    /// Local actor signing the deliveries, unsigned when absent.
    #[n(1)]
    pub(crate) signature_actor: Option<String>,
    /// JSON body to post.
    #[n(2)]
    pub(crate) body: Option<String>,
    /// Starts at 1.
    #[n(3)]
    pub(crate) attempt_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct Job {
    #[n(0)]
    pub(crate) id: RecordId,
    #[n(1)]
    pub(crate) category: String,
    #[n(2)]
    pub(crate) handler: HandlerName,
    #[n(3)]
    pub(crate) payload: Payload,
    #[n(4)]
    pub(crate) state: JobState,
    /// Milliseconds since the epoch, like the other timestamps.
    #[n(5)]
    pub(crate) created_at: i64,
    #[n(6)]
    pub(crate) last_attempt_at: Option<i64>,
    /// Due time of the next attempt.
    #[n(7)]
    pub(crate) run_at: i64,
    #[n(8)]
    pub(crate) last_error: Option<String>,
}

impl Job {
    pub(crate) fn new(
        category: &str,
        handler: HandlerName,
        payload: Payload,
        now: Timestamp,
    ) -> Job {
        let now = now.as_millisecond();
        Job {
            id: RecordId::new(),
            category: category.to_string(),
            handler,
            payload,
            state: JobState::Pending,
            created_at: now,
            last_attempt_at: None,
            run_at: now,
            last_error: None,
        }
    }
    /// Pushes the due time `delay` further out.
    pub(crate) fn delayed(mut self, delay: Duration) -> Job {
        let delay = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        self.run_at = self.run_at.saturating_add(delay);
        self
    }
    pub(crate) fn is_due(&self, now: Timestamp) -> bool {
        self.state == JobState::Pending && self.run_at <= now.as_millisecond()
    }
}
