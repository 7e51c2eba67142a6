use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use aws_lc_rs::rsa::KeyPair;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use tokio::task::{JoinSet, spawn_blocking};
use tracing::{debug, info, warn};

use crate::activity_pub::hs2019::post_headers;
use crate::activity_pub::mailman::Transport;
use crate::activity_pub::repo::{CryptoRepo, VideoRepo};
use crate::config::{ActivityPubConfig, ReputationConfig, host_of};
use crate::store::{RecordId, Store, apply_blocking};

use super::{Peer, PeerRepo, PoolRequestRepo, RequestKind};

/// What one batch did, for logging and tests. Peers are classified once
/// per request kind, so a peer can be both good and bad in one batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct BatchReport {
    pub(crate) sent: usize,
    pub(crate) good: Vec<(RequestKind, String)>,
    pub(crate) bad: Vec<(RequestKind, String)>,
    pub(crate) pruned: Vec<String>,
    pub(crate) removed_videos: usize,
}

pub(crate) struct Batcher {
    store: Store,
    transport: Arc<dyn Transport>,
    apub: ActivityPubConfig,
    config: ReputationConfig,
    max_attempts: u32,
}

impl Batcher {
    pub(crate) fn new(
        store: Store,
        transport: Arc<dyn Transport>,
        apub: ActivityPubConfig,
        config: ReputationConfig,
        max_attempts: u32,
    ) -> Batcher {
        Batcher {
            store,
            transport,
            apub,
            config,
            max_attempts,
        }
    }

    /// Sends every pending pool request to every peer, scores the peers on
    /// the outcome and prunes the ones that fell below the floor.
    pub(crate) async fn make_pool_requests(&self) -> Result<BatchReport> {
        let store = self.store.clone();
        let (requests, peers) = spawn_blocking(move || -> Result<_> {
            Ok((PoolRequestRepo::list(&store)?, PeerRepo::list(&store)?))
        })
        .await??;
        if requests.is_empty() {
            debug!(target: "reputation", "no pool requests to send");
            return Ok(BatchReport::default());
        }

        let mut groups: BTreeMap<RequestKind, Vec<Value>> = BTreeMap::new();
        for request in &requests {
            let data = serde_json::from_str(&request.request)
                .unwrap_or_else(|_| Value::String(request.request.clone()));
            groups.entry(request.kind).or_default().push(data);
        }
        let bodies: Arc<Vec<(RequestKind, String)>> = Arc::new(
            groups
                .into_iter()
                .map(|(kind, data)| (kind, json!({ "data": data }).to_string()))
                .collect(),
        );

        let signer = self.apub.application_actor();
        let store = self.store.clone();
        let key_actor = signer.clone();
        let key_pair = spawn_blocking(move || CryptoRepo::load(&store, &key_actor)).await??;
        if key_pair.is_none() {
            warn!(target: "reputation", %signer, "no key pair, sending unsigned requests");
        }
        let key_pair = Arc::new(key_pair);
        let signer = Arc::new(signer);

        let mut join_set = JoinSet::new();
        for (peer, _) in peers {
            let bodies = bodies.clone();
            let key_pair = key_pair.clone();
            let signer = signer.clone();
            let transport = self.transport.clone();
            join_set.spawn(async move {
                let mut outcomes = Vec::with_capacity(bodies.len());
                for (kind, body) in bodies.iter() {
                    let endpoint = format!(
                        "{}/api/v1/remotevideos/{}",
                        peer.url.trim_end_matches('/'),
                        kind.endpoint()
                    );
                    let result =
                        post_request(&*transport, &signer, (*key_pair).as_ref(), &endpoint, body)
                            .await;
                    if let Err(error) = &result {
                        debug!(target: "reputation", %endpoint, %error, "pool request failed");
                    }
                    outcomes.push((*kind, result.is_ok()));
                }
                (peer, outcomes)
            });
        }

        let mut scoring: BTreeMap<RequestKind, (Vec<RecordId>, Vec<RecordId>)> = BTreeMap::new();
        let mut report = BatchReport {
            sent: requests.len(),
            ..Default::default()
        };
        for (peer, outcomes) in join_set.join_all().await {
            for (kind, good) in outcomes {
                let (good_ids, bad_ids) = scoring.entry(kind).or_default();
                if good {
                    good_ids.push(peer.id);
                    report.good.push((kind, peer.url.clone()));
                } else {
                    bad_ids.push(peer.id);
                    report.bad.push((kind, peer.url.clone()));
                }
            }
        }

        let sent_ids: Vec<RecordId> = requests.iter().map(|request| request.id).collect();
        let (bonus, malus) = (self.config.bonus, self.config.malus);
        apply_blocking(&self.store, self.max_attempts, move |tx| {
            for (good_ids, bad_ids) in scoring.values() {
                PeerRepo::increment_scores(tx, good_ids, bonus)?;
                PeerRepo::increment_scores(tx, bad_ids, malus)?;
            }
            PoolRequestRepo::remove(tx, &sent_ids);
            Ok(())
        })
        .await?;

        let (pruned, removed_videos) = self.prune_bad_peers().await?;
        report.pruned = pruned;
        report.removed_videos = removed_videos;
        report.good.sort();
        report.bad.sort();
        info!(
            target: "reputation",
            sent = report.sent,
            good = report.good.len(),
            bad = report.bad.len(),
            "pool requests sent"
        );
        Ok(report)
    }

    /// Removes the videos mirrored from peers scored below the floor, then
    /// the peers themselves.
    async fn prune_bad_peers(&self) -> Result<(Vec<String>, usize)> {
        let store = self.store.clone();
        let floor = self.config.floor;
        let doomed: Vec<Peer> = spawn_blocking(move || PeerRepo::list(&store))
            .await??
            .into_iter()
            .filter(|(_, score)| *score < floor)
            .map(|(peer, _)| peer)
            .collect();
        if doomed.is_empty() {
            return Ok((vec![], 0));
        }

        let hosts: Vec<String> = doomed
            .iter()
            .map(|peer| host_of(&peer.url).to_string())
            .collect();
        let removed_videos = apply_blocking(&self.store, self.max_attempts, move |tx| {
            let hosts: Vec<&str> = hosts.iter().map(String::as_str).collect();
            Ok(VideoRepo::remove_all_from_hosts(tx, &hosts)?)
        })
        .await?;

        let ids: Vec<RecordId> = doomed.iter().map(|peer| peer.id).collect();
        apply_blocking(&self.store, self.max_attempts, move |tx| {
            PeerRepo::remove_by_ids(tx, &ids);
            Ok(())
        })
        .await?;

        let mut pruned: Vec<String> = doomed.into_iter().map(|peer| peer.url).collect();
        pruned.sort();
        info!(target: "reputation", peers = ?pruned, removed_videos, "pruned bad peers");
        Ok((pruned, removed_videos))
    }
}

async fn post_request(
    transport: &dyn Transport,
    signer: &str,
    key_pair: Option<&KeyPair>,
    endpoint: &str,
    body: &str,
) -> Result<()> {
    let headers = match key_pair {
        Some(key_pair) => post_headers(signer, endpoint, body, key_pair)?,
        None => HeaderMap::new(),
    };
    transport.post(endpoint, headers, body).await
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use serde_json::Value;

    use super::Batcher;
    use crate::activity_pub::mailman::tests::FakeTransport;
    use crate::activity_pub::repo::{VideoRepo, insert_video, video};
    use crate::config::{ActivityPubConfig, ReputationConfig};
    use crate::jobs::handlers::tests::with_signer;
    use crate::reputation::{PeerRepo, PoolRequestRepo, RequestKind};
    use crate::store::{Part, Store, temp_store};

    pub(crate) fn batcher(store: &Store, transport: Arc<FakeTransport>) -> Batcher {
        let apub = ActivityPubConfig {
            base_url: "https://node.example".to_string(),
            accounts: vec![],
        };
        let config = ReputationConfig {
            initial_score: 20,
            bonus: 10,
            malus: -15,
            floor: 0,
            ..Default::default()
        };
        Batcher::new(store.clone(), transport, apub, config, 5)
    }

    fn seed(store: &Store, peers: &[&str], requests: &[(RequestKind, &str)]) -> Result<()> {
        let mut tx = store.begin()?;
        for peer in peers {
            PeerRepo::insert(&mut tx, peer, 20)?;
        }
        for (kind, request) in requests {
            PoolRequestRepo::add(&mut tx, *kind, request)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn scores(store: &Store) -> Result<Vec<(String, i64)>> {
        Ok(PeerRepo::list(store)?
            .into_iter()
            .map(|(peer, score)| (peer.url, score))
            .collect())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_groups_requests_and_scores_peers() -> Result<()> {
        let (_dir, store) = temp_store()?;
        with_signer(&store)?;
        seed(
            &store,
            &["https://good.example", "https://bad.example"],
            &[
                (RequestKind::Add, r#"{"uuid":"1"}"#),
                (RequestKind::Add, r#"{"uuid":"2"}"#),
                (RequestKind::Remove, r#"{"uuid":"3"}"#),
            ],
        )?;
        let transport = Arc::new(FakeTransport::default());
        transport.fail("https://bad.example/api/v1/remotevideos/remove");

        let report = batcher(&store, transport.clone()).make_pool_requests().await?;
        assert_eq!(report.sent, 3);
        assert_eq!(
            report.good,
            vec![
                (RequestKind::Add, "https://bad.example".to_string()),
                (RequestKind::Add, "https://good.example".to_string()),
                (RequestKind::Remove, "https://good.example".to_string()),
            ]
        );
        assert_eq!(
            report.bad,
            vec![(RequestKind::Remove, "https://bad.example".to_string())]
        );
        assert!(report.pruned.is_empty());

        let mut posted = transport.posted();
        posted.sort_by(|a, b| a.inbox.cmp(&b.inbox));
        assert_eq!(posted.len(), 4);
        assert!(posted.iter().all(|post| post.signed));
        let add = posted
            .iter()
            .find(|post| post.inbox == "https://good.example/api/v1/remotevideos/add")
            .unwrap();
        let body: Value = serde_json::from_str(&add.body)?;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        assert_eq!(
            scores(&store)?,
            vec![
                ("https://good.example".to_string(), 40),
                ("https://bad.example".to_string(), 15)
            ]
        );
        assert_eq!(store.len(Part::PoolRequests)?, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn each_request_kind_scores_the_peer_on_its_own() -> Result<()> {
        let (_dir, store) = temp_store()?;
        with_signer(&store)?;
        seed(
            &store,
            &["https://split.example"],
            &[
                (RequestKind::Add, r#"{"uuid":"1"}"#),
                (RequestKind::Remove, r#"{"uuid":"2"}"#),
            ],
        )?;
        let transport = Arc::new(FakeTransport::default());
        transport.fail("https://split.example/api/v1/remotevideos/remove");

        let report = batcher(&store, transport).make_pool_requests().await?;
        assert_eq!(
            report.good,
            vec![(RequestKind::Add, "https://split.example".to_string())]
        );
        assert_eq!(
            report.bad,
            vec![(RequestKind::Remove, "https://split.example".to_string())]
        );
        // 20 + 10 for the accepted add, - 15 for the rejected remove.
        assert_eq!(scores(&store)?, vec![("https://split.example".to_string(), 15)]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_pool_sends_nothing() -> Result<()> {
        let (_dir, store) = temp_store()?;
        seed(&store, &["https://good.example"], &[])?;
        let transport = Arc::new(FakeTransport::default());
        let report = batcher(&store, transport.clone()).make_pool_requests().await?;
        assert_eq!(report.sent, 0);
        assert!(transport.posted().is_empty());
        assert_eq!(scores(&store)?[0].1, 20);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn peer_below_floor_is_pruned_with_its_videos() -> Result<()> {
        let (_dir, store) = temp_store()?;
        with_signer(&store)?;
        seed(&store, &["https://good.example", "https://bad.example"], &[])?;
        insert_video(&store, &video("bad.example", "b1", false))?;
        insert_video(&store, &video("good.example", "g1", false))?;
        insert_video(&store, &video("node.example", "n1", true))?;
        let transport = Arc::new(FakeTransport::default());
        transport.fail("https://bad.example/api/v1/remotevideos/add");
        let batcher = batcher(&store, transport);

        // 20 -> 5, still kept
        seed(&store, &[], &[(RequestKind::Add, r#"{"uuid":"1"}"#)])?;
        let report = batcher.make_pool_requests().await?;
        assert!(report.pruned.is_empty());
        assert_eq!(store.len(Part::Videos)?, 3);

        // 5 -> -10, pruned
        seed(&store, &[], &[(RequestKind::Add, r#"{"uuid":"2"}"#)])?;
        let report = batcher.make_pool_requests().await?;
        assert_eq!(report.pruned, vec!["https://bad.example".to_string()]);
        assert_eq!(report.removed_videos, 1);

        let mut tx = store.begin()?;
        assert!(VideoRepo::find_by_uuid(&mut tx, "b1")?.is_none());
        assert!(VideoRepo::find_by_uuid(&mut tx, "g1")?.is_some());
        assert!(VideoRepo::find_by_uuid(&mut tx, "n1")?.is_some());
        drop(tx);
        assert_eq!(scores(&store)?, vec![("https://good.example".to_string(), 40)]);
        Ok(())
    }
}
