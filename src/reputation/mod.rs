//! Legacy peer reputation: batched add/remove notifications to peers, with
//! scores that decide which peers and mirrored videos are kept.

use anyhow::Result;
use tracing::info;

use crate::config::ReputationConfig;
use crate::store::{Store, apply_with_retry};

mod batch;
mod peer_repo;
mod pool_request_repo;
mod tracker;

pub(crate) use batch::Batcher;
pub(crate) use peer_repo::{Peer, PeerRepo};
pub(crate) use pool_request_repo::{PoolRequestRepo, RequestKind};
pub(crate) use tracker::{ReputationTracker, ReputationTrackerInit, ReputationTrackerMsg};

/// Registers the configured peers that are not known yet.
pub(crate) fn register_peers(
    store: &Store,
    config: &ReputationConfig,
    max_attempts: u32,
) -> Result<()> {
    if config.peers.is_empty() {
        return Ok(());
    }
    apply_with_retry(store, max_attempts, |tx| {
        for url in &config.peers {
            PeerRepo::insert(tx, url, config.initial_score)?;
        }
        Ok(())
    })?;
    info!(target: "reputation", peers = config.peers.len(), "registered peers");
    Ok(())
}
