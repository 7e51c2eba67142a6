//! Handlers of `activitypub-http` jobs.

mod broadcast;
mod fetch;
mod unicast;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_lc_rs::rsa::KeyPair;
use reqwest::header::HeaderMap;
use tokio::sync::Semaphore;
use tokio::task::{JoinSet, spawn_blocking};

use crate::activity_pub::hs2019::{post_headers, sign_activity};
use crate::activity_pub::mailman::Transport;
use crate::activity_pub::repo::CryptoRepo;
use crate::config::DeliveryConfig;
use crate::store::Store;

use super::{Job, Payload};

pub(crate) use broadcast::BroadcastHandler;
pub(crate) use fetch::FetchHandler;
pub(crate) use unicast::UnicastHandler;

#[async_trait]
pub(crate) trait JobHandler: Send + Sync {
    /// An error fails the attempt and hands the job back to the scheduler.
    async fn handle(&self, job: &Job) -> Result<()>;
}

/// Result of posting to one uri.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub(crate) uri: String,
    pub(crate) result: Result<()>,
}

struct Signer {
    actor: String,
    key_pair: KeyPair,
}

/// Signs and posts payload bodies, shared by the broadcast and unicast
/// handlers.
#[derive(Clone)]
pub(crate) struct Delivery {
    store: Store,
    transport: Arc<dyn Transport>,
    config: DeliveryConfig,
}

impl Delivery {
    pub(crate) fn new(store: Store, transport: Arc<dyn Transport>, config: DeliveryConfig) -> Delivery {
        Delivery {
            store,
            transport,
            config,
        }
    }

    /// Posts the payload body to every uri, at most `concurrency` at a time.
    /// Outcomes are sorted by uri.
    pub(crate) async fn deliver_all(&self, payload: &Payload) -> Result<Vec<Outcome>> {
        let (body, signer) = self.compute_body(payload).await?;
        let body = Arc::new(body);
        let signer = signer.map(Arc::new);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let mut join_set = JoinSet::new();
        for uri in payload.uris.clone() {
            let body = body.clone();
            let signer = signer.clone();
            let semaphore = semaphore.clone();
            let transport = self.transport.clone();
            join_set.spawn(async move {
                let result = async {
                    let _permit = semaphore.acquire_owned().await?;
                    let headers = match &signer {
                        Some(signer) => post_headers(&signer.actor, &uri, &body, &signer.key_pair)?,
                        None => HeaderMap::new(),
                    };
                    transport.post(&uri, headers, &body).await
                }
                .await;
                Outcome { uri, result }
            });
        }
        let mut outcomes = join_set.join_all().await;
        outcomes.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(outcomes)
    }

    /// The body to post, wrapped with a signature when the payload names a
    /// signing actor.
    async fn compute_body(&self, payload: &Payload) -> Result<(String, Option<Signer>)> {
        let body = payload
            .body
            .clone()
            .ok_or_else(|| anyhow!("delivery payload has no body"))?;
        let Some(actor) = payload.signature_actor.clone() else {
            return Ok((body, None));
        };
        let store = self.store.clone();
        let key_actor = actor.clone();
        let key_pair = spawn_blocking(move || CryptoRepo::load(&store, &key_actor))
            .await??
            .with_context(|| format!("unknown signature actor {actor}"))?;
        let activity = serde_json::from_str(&body).context("delivery body is not JSON")?;
        let signed = sign_activity(&actor, &key_pair, &activity)?;
        Ok((signed.to_string(), Some(Signer { actor, key_pair })))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use serde_json::{Value, json};

    use super::Delivery;
    use crate::activity_pub::hs2019::tests::test_key_pair_der;
    use crate::activity_pub::mailman::tests::FakeTransport;
    use crate::activity_pub::repo::CryptoRepo;
    use crate::config::DeliveryConfig;
    use crate::jobs::Payload;
    use crate::store::{Store, temp_store};

    pub(crate) const SIGNER: &str = "https://node.example/accounts/peertube";

    pub(crate) fn with_signer(store: &Store) -> Result<()> {
        let mut tx = store.begin()?;
        CryptoRepo::insert(&mut tx, SIGNER, &test_key_pair_der());
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn payload(uris: &[&str], attempt_number: u32) -> Payload {
        Payload {
            uris: uris.iter().map(|uri| uri.to_string()).collect(),
            signature_actor: Some(SIGNER.to_string()),
            body: Some(json!({"type": "Create", "actor": "https://peer-a.example/actor/x"}).to_string()),
            attempt_number,
        }
    }

    #[tokio::test]
    async fn signed_deliveries_carry_both_signatures() -> Result<()> {
        let (_dir, store) = temp_store()?;
        with_signer(&store)?;
        let transport = Arc::new(FakeTransport::default());
        transport.fail("https://b.example/inbox");
        let delivery = Delivery::new(store, transport.clone(), DeliveryConfig::default());

        let outcomes = delivery
            .deliver_all(&payload(&["https://b.example/inbox", "https://a.example/inbox"], 1))
            .await?;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].uri, "https://a.example/inbox");
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());

        let posted = transport.posted();
        assert!(posted.iter().all(|post| post.signed));
        let body: Value = serde_json::from_str(&posted[0].body)?;
        assert_eq!(body["signature"]["type"], "RsaSignature2017");
        assert_eq!(body["actor"], "https://peer-a.example/actor/x");
        Ok(())
    }

    #[tokio::test]
    async fn unsigned_without_signature_actor() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let transport = Arc::new(FakeTransport::default());
        let delivery = Delivery::new(store, transport.clone(), DeliveryConfig::default());
        let mut payload = payload(&["https://a.example/inbox"], 1);
        payload.signature_actor = None;
        delivery.deliver_all(&payload).await?;
        let posted = transport.posted();
        assert!(!posted[0].signed);
        assert_eq!(Some(posted[0].body.clone()), payload.body);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_signer_fails_before_posting() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let transport = Arc::new(FakeTransport::default());
        let delivery = Delivery::new(store, transport.clone(), DeliveryConfig::default());
        let result = delivery.deliver_all(&payload(&["https://a.example/inbox"], 1)).await;
        assert!(result.is_err());
        assert!(transport.posted().is_empty());
        Ok(())
    }
}
