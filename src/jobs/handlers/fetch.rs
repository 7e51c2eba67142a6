use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::activity_pub::dispatcher::Dispatcher;
use crate::activity_pub::mailman::Transport;
use crate::activity_pub::model::{Envelope, Object};
use crate::jobs::Job;

use super::JobHandler;

/// Fetches every uri and applies the documents that are activities or videos.
/// A failed fetch fails the job; documents that cannot be applied are dropped.
pub(crate) struct FetchHandler {
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
}

impl FetchHandler {
    pub(crate) fn new(transport: Arc<dyn Transport>, dispatcher: Dispatcher) -> FetchHandler {
        FetchHandler {
            transport,
            dispatcher,
        }
    }
}

#[async_trait]
impl JobHandler for FetchHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        for uri in &job.payload.uris {
            let document = self
                .transport
                .fetch(uri)
                .await
                .with_context(|| format!("cannot fetch {uri}"))?;
            let object = Object::from(&document);
            if object.type_is("Video") {
                if let Err(error) = self.dispatcher.apply_video(&object).await {
                    warn!(target: "jobs", %uri, %error, "cannot apply fetched video");
                }
                continue;
            }
            let envelope = match Envelope::try_from(document) {
                Ok(envelope) => envelope,
                Err(error) => {
                    debug!(target: "jobs", %uri, %error, "fetched document is not an activity");
                    continue;
                }
            };
            if let Err(error) = self.dispatcher.dispatch(envelope).await {
                warn!(target: "jobs", %uri, %error, "cannot apply fetched activity");
            }
        }
        Ok(())
    }
}
