use anyhow::Result;
use minicbor::{Decode, Encode};

use crate::store::{Part, Record, RecordId, Store, Tx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub(crate) enum RequestKind {
    #[n(0)]
    Add,
    #[n(1)]
    Remove,
}

impl RequestKind {
    /// Path segment of the peer endpoint receiving this kind.
    pub(crate) fn endpoint(self) -> &'static str {
        match self {
            RequestKind::Add => "add",
            RequestKind::Remove => "remove",
        }
    }
}

/// An add or remove notification waiting for the next batch.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct PoolRequest {
    #[n(0)]
    pub(crate) id: RecordId,
    #[n(1)]
    pub(crate) kind: RequestKind,
    /// JSON data of the notification.
    #[n(2)]
    pub(crate) request: String,
}

pub(crate) struct PoolRequestRepo;

impl PoolRequestRepo {
    #[cfg(test)]
    pub(crate) fn add(tx: &mut Tx<'_>, kind: RequestKind, request: &str) -> Result<RecordId> {
        let pool_request = PoolRequest {
            id: RecordId::new(),
            kind,
            request: request.to_string(),
        };
        tx.insert_record(Part::PoolRequests, pool_request.id, &pool_request)?;
        Ok(pool_request.id)
    }

    /// Pending requests in creation order.
    pub(crate) fn list(store: &Store) -> Result<Vec<PoolRequest>> {
        store
            .scan(Part::PoolRequests, b"")?
            .into_iter()
            .map(|(_, bytes)| PoolRequest::from_bytes(&bytes))
            .collect()
    }

    pub(crate) fn remove(tx: &mut Tx<'_>, ids: &[RecordId]) {
        for id in ids {
            tx.remove(Part::PoolRequests, id);
        }
    }
}
