use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::jobs::Job;

use super::{Delivery, JobHandler};

/// Posts to exactly one uri; failures go back to the scheduler.
pub(crate) struct UnicastHandler {
    delivery: Delivery,
}

impl UnicastHandler {
    pub(crate) fn new(delivery: Delivery) -> UnicastHandler {
        UnicastHandler { delivery }
    }
}

#[async_trait]
impl JobHandler for UnicastHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        if job.payload.uris.len() != 1 {
            bail!("unicast job {} has {} uris", job.id, job.payload.uris.len());
        }
        for outcome in self.delivery.deliver_all(&job.payload).await? {
            outcome.result?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use jiff::Timestamp;

    use super::UnicastHandler;
    use crate::activity_pub::mailman::tests::FakeTransport;
    use crate::config::DeliveryConfig;
    use crate::jobs::handlers::tests::{payload, with_signer};
    use crate::jobs::handlers::{Delivery, JobHandler};
    use crate::jobs::{ACTIVITYPUB_HTTP, HandlerName, Job};
    use crate::store::temp_store;

    #[tokio::test]
    async fn failure_is_returned() -> Result<()> {
        let (_dir, store) = temp_store()?;
        with_signer(&store)?;
        let transport = Arc::new(FakeTransport::default());
        transport.fail("https://b.example/inbox");
        let handler =
            UnicastHandler::new(Delivery::new(store, transport.clone(), DeliveryConfig::default()));

        let ok = Job::new(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload(&["https://a.example/inbox"], 2), Timestamp::now());
        handler.handle(&ok).await?;
        let failing = Job::new(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload(&["https://b.example/inbox"], 2), Timestamp::now());
        assert!(handler.handle(&failing).await.is_err());
        assert_eq!(transport.posted().len(), 2);
        Ok(())
    }
}
