//! Actors known to this node, local or remote.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use aws_lc_rs::encoding::AsDer;
use aws_lc_rs::rsa::{KeySize, PrivateDecryptingKey};
use minicbor::{Decode, Encode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ActivityPubConfig;
use crate::store::{Part, Store, apply_blocking, apply_with_retry};

use super::mailman::Transport;
use super::model::Object;
use super::repo::{ActorRepo, CryptoRepo};

const ACCOUNT_TYPES: [&str; 3] = ["Person", "Application", "Service"];

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct Actor {
    #[n(0)]
    pub(crate) url: String,
    #[n(1)]
    pub(crate) public_key_pem: String,
    #[n(2)]
    pub(crate) inbox: String,
    #[n(3)]
    pub(crate) shared_inbox: Option<String>,
    #[n(4)]
    pub(crate) followers: Option<String>,
    /// Account name, absent for groups and other non-account actors.
    #[n(5)]
    pub(crate) account: Option<String>,
    #[n(6)]
    pub(crate) local: bool,
}

impl Actor {
    /// Builds a remote actor from its fetched document.
    pub(crate) fn from_document(value: Value) -> Result<Actor> {
        let object = Object::from(value);
        let Some(url) = object.id() else {
            bail!("actor should have id property");
        };
        let inbox = object
            .get_str("inbox")
            .context("actor should have inbox property")?;
        let public_key_pem = object
            .get_node_object("publicKey")
            .and_then(|key| key.get_str("publicKeyPem").map(str::to_string))
            .context("actor should have a public key")?;
        let account = object
            .get_first_type()
            .filter(|ty| ACCOUNT_TYPES.contains(ty))
            .and_then(|_| object.get_str("preferredUsername"))
            .map(str::to_string);
        Ok(Actor {
            url: url.to_string(),
            public_key_pem,
            inbox: inbox.to_string(),
            shared_inbox: object.get_endpoint("sharedInbox").map(str::to_string),
            followers: object.get_str("followers").map(str::to_string),
            account,
            local: false,
        })
    }

    /// Endpoint used for deliveries, the shared inbox when the actor has one.
    pub(crate) fn delivery_inbox(&self) -> &str {
        self.shared_inbox.as_deref().unwrap_or(&self.inbox)
    }
}

#[derive(Debug, Error)]
#[error("unable to resolve actor {url}: {reason}")]
pub(crate) struct UnresolvedActorError {
    pub(crate) url: String,
    pub(crate) reason: String,
}

impl UnresolvedActorError {
    fn new(url: &str, reason: impl ToString) -> UnresolvedActorError {
        UnresolvedActorError {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub(crate) trait ActorResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<Actor, UnresolvedActorError>;
}

/// Resolves actors from the store, fetching and caching unknown ones.
pub(crate) struct StoreActorResolver {
    store: Store,
    transport: Arc<dyn Transport>,
    max_attempts: u32,
}

impl StoreActorResolver {
    pub(crate) fn new(
        store: Store,
        transport: Arc<dyn Transport>,
        max_attempts: u32,
    ) -> StoreActorResolver {
        StoreActorResolver {
            store,
            transport,
            max_attempts,
        }
    }
}

#[async_trait]
impl ActorResolver for StoreActorResolver {
    async fn resolve(&self, url: &str) -> Result<Actor, UnresolvedActorError> {
        let key = url.to_string();
        let cached = apply_blocking(&self.store, self.max_attempts, move |tx| {
            Ok(ActorRepo::find_one(tx, &key)?)
        })
        .await
        .map_err(|error| UnresolvedActorError::new(url, error))?;
        if let Some(actor) = cached {
            return Ok(actor);
        }

        debug!(target: "apub", url, "fetching unknown actor");
        let document = self
            .transport
            .fetch(url)
            .await
            .map_err(|error| UnresolvedActorError::new(url, error))?;
        let actor =
            Actor::from_document(document).map_err(|error| UnresolvedActorError::new(url, error))?;
        if actor.url != url {
            return Err(UnresolvedActorError::new(
                url,
                format!("document is for actor {}", actor.url),
            ));
        }

        apply_blocking(&self.store, self.max_attempts, move |tx| {
            if let Some(existing) = ActorRepo::find_one(tx, &actor.url)? {
                return Ok(existing);
            }
            ActorRepo::insert(tx, &actor)?;
            Ok(actor.clone())
        })
        .await
        .map_err(|error| UnresolvedActorError::new(url, error))
    }
}

/// Creates the application actor and the configured accounts, with their key
/// pairs, when they do not exist yet.
pub(crate) fn ensure_local_actors(
    store: &Store,
    apub: &ActivityPubConfig,
    max_attempts: u32,
) -> Result<()> {
    let mut urls = vec![apub.application_actor()];
    urls.extend(apub.accounts.iter().map(|name| apub.account_url(name)));
    urls.dedup();

    for url in urls {
        if store.get_record::<Actor>(Part::Actors, &url)?.is_some() {
            continue;
        }
        let pri_key = PrivateDecryptingKey::generate(KeySize::Rsa2048)?;
        let pri_key_der = pri_key.as_der()?;
        let pub_key_der = pri_key.public_key().as_der()?;
        let public_key_pem = pem_rfc7468::encode_string(
            "PUBLIC KEY",
            pem_rfc7468::LineEnding::LF,
            pub_key_der.as_ref(),
        )
        .map_err(|error| anyhow!("unable to encode public key: {error}"))?;
        let name = url.rsplit('/').next().unwrap_or_default().to_string();
        let actor = Actor {
            inbox: format!("{url}/inbox"),
            shared_inbox: Some(format!("{}/inbox", apub.base_url)),
            followers: Some(format!("{url}/followers")),
            account: Some(name),
            local: true,
            public_key_pem,
            url,
        };
        let created = apply_with_retry(store, max_attempts, |tx| {
            if ActorRepo::find_one(tx, &actor.url)?.is_some() {
                return Ok(false);
            }
            ActorRepo::insert(tx, &actor)?;
            CryptoRepo::insert(tx, &actor.url, pri_key_der.as_ref());
            Ok(true)
        })?;
        if created {
            info!(target: "apub", url = %actor.url, "created local actor");
        }
    }
    Ok(())
}
