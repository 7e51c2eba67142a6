use anyhow::Result;
use async_trait::async_trait;
use jiff::Timestamp;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::jobs::{HandlerName, Job, JobQueue, Payload};

use super::{Delivery, JobHandler, Outcome};

/// Posts one body to many uris. Each failed uri is retried on its own through
/// a unicast job, the broadcast itself always succeeds once delivered.
pub(crate) struct BroadcastHandler {
    delivery: Delivery,
    queue: JobQueue,
    config: SchedulerConfig,
}

impl BroadcastHandler {
    pub(crate) fn new(
        delivery: Delivery,
        queue: JobQueue,
        config: SchedulerConfig,
    ) -> BroadcastHandler {
        BroadcastHandler {
            delivery,
            queue,
            config,
        }
    }
}

#[async_trait]
impl JobHandler for BroadcastHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        let attempt = job.payload.attempt_number;
        let outcomes = self.delivery.deliver_all(&job.payload).await?;
        let now = Timestamp::now();
        let backoff = self.config.backoff(attempt);
        let mut retries = vec![];
        for Outcome { uri, result } in outcomes {
            let Err(error) = result else {
                continue;
            };
            warn!(target: "jobs", %uri, %error, "cannot deliver broadcast");
            if attempt < self.config.max_attempts {
                let payload = Payload {
                    uris: vec![uri],
                    attempt_number: attempt + 1,
                    ..job.payload.clone()
                };
                let retry = Job::new(&job.category, HandlerName::Unicast, payload, now);
                retries.push(retry.delayed(backoff));
            }
        }
        if retries.is_empty() {
            return Ok(());
        }
        debug!(target: "jobs", id = %job.id, retries = retries.len(), ?backoff, "scheduling unicast retries");
        let queue = self.queue.clone();
        spawn_blocking(move || queue.enqueue_all(&retries)).await??;
        Ok(())
    }
}
