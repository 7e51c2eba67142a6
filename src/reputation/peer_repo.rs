use anyhow::Result;
use minicbor::{Decode, Encode};

use crate::store::{Part, Record, RecordId, Store, Tx};

/// A peer node, identified by its base url. Its score lives in a counter
/// partition and only moves through increments.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct Peer {
    #[n(0)]
    pub(crate) id: RecordId,
    #[n(1)]
    pub(crate) url: String,
}

pub(crate) struct PeerRepo;

impl PeerRepo {
    /// Registers a peer with `initial_score`, or returns the id of the peer
    /// already registered under `url`.
    pub(crate) fn insert(tx: &mut Tx<'_>, url: &str, initial_score: i64) -> Result<RecordId> {
        for (_, bytes) in tx.scan(Part::Peers, b"")? {
            let peer = Peer::from_bytes(&bytes)?;
            if peer.url == url {
                return Ok(peer.id);
            }
        }
        let peer = Peer {
            id: RecordId::new(),
            url: url.to_string(),
        };
        tx.insert_record(Part::Peers, peer.id, &peer)?;
        tx.add(Part::PeerScores, peer.id, initial_score)?;
        Ok(peer.id)
    }

    /// Every peer with its current score.
    pub(crate) fn list(store: &Store) -> Result<Vec<(Peer, i64)>> {
        store
            .scan(Part::Peers, b"")?
            .into_iter()
            .map(|(_, bytes)| {
                let peer = Peer::from_bytes(&bytes)?;
                let score = store.counter(Part::PeerScores, peer.id)?;
                Ok((peer, score))
            })
            .collect()
    }

    pub(crate) fn increment_scores(tx: &mut Tx<'_>, ids: &[RecordId], delta: i64) -> Result<()> {
        for id in ids {
            tx.add(Part::PeerScores, id, delta)?;
        }
        Ok(())
    }

    pub(crate) fn remove_by_ids(tx: &mut Tx<'_>, ids: &[RecordId]) {
        for id in ids {
            tx.remove(Part::Peers, id);
            tx.remove(Part::PeerScores, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::PeerRepo;
    use crate::store::temp_store;

    #[test]
    fn scores_move_by_increments() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let mut tx = store.begin()?;
        let a = PeerRepo::insert(&mut tx, "https://a.example", 100)?;
        let b = PeerRepo::insert(&mut tx, "https://b.example", 100)?;
        assert_eq!(PeerRepo::insert(&mut tx, "https://a.example", 100)?, a);
        tx.commit()?;

        let mut tx = store.begin()?;
        PeerRepo::increment_scores(&mut tx, &[a], 10)?;
        PeerRepo::increment_scores(&mut tx, &[b], -30)?;
        tx.commit()?;
        let scores: Vec<i64> = PeerRepo::list(&store)?.into_iter().map(|(_, s)| s).collect();
        assert_eq!(scores, vec![110, 70]);

        let mut tx = store.begin()?;
        PeerRepo::remove_by_ids(&mut tx, &[a]);
        tx.commit()?;
        let peers = PeerRepo::list(&store)?;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].0.id, b);
        Ok(())
    }
}
