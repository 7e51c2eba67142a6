//! Transactional key/value store on top of fjall partitions.
//!
//! Every unit of work runs in a serializable snapshot transaction of the
//! transactional keyspace. Reads and prefix scans are recorded by fjall; a
//! commit that overlaps with a write committed after the snapshot was taken
//! fails with [`TxError::Conflict`]. Counter increments are read-modify-write
//! inside the transaction, so concurrent increments conflict and are retried
//! instead of lost.

mod apply;
mod key;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use fjall::{PartitionCreateOptions, PersistMode, TxKeyspace, TxPartitionHandle, WriteTransaction};
use minicbor::{Decode, Encode};
use thiserror::Error;
use tracing::trace;

pub(crate) use self::apply::{ApplyError, UnitError, apply_blocking, apply_with_retry};
pub(crate) use self::key::{PairKey, RecordId};

/// Named partitions of the keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Part {
    Actors,
    KeyPairs,
    Followers,
    Videos,
    VideoUrls,
    VideoFiles,
    Tags,
    VideoTags,
    VideoCounters,
    Rates,
    Shares,
    Abuses,
    Jobs,
    Peers,
    PeerScores,
    PoolRequests,
}

impl Part {
    const ALL: [Part; 16] = [
        Part::Actors,
        Part::KeyPairs,
        Part::Followers,
        Part::Videos,
        Part::VideoUrls,
        Part::VideoFiles,
        Part::Tags,
        Part::VideoTags,
        Part::VideoCounters,
        Part::Rates,
        Part::Shares,
        Part::Abuses,
        Part::Jobs,
        Part::Peers,
        Part::PeerScores,
        Part::PoolRequests,
    ];

    fn name(self) -> &'static str {
        match self {
            Part::Actors => "actors",
            Part::KeyPairs => "key_pairs",
            Part::Followers => "followers",
            Part::Videos => "videos",
            Part::VideoUrls => "video_urls",
            Part::VideoFiles => "video_files",
            Part::Tags => "tags",
            Part::VideoTags => "video_tags",
            Part::VideoCounters => "video_counters",
            Part::Rates => "rates",
            Part::Shares => "shares",
            Part::Abuses => "abuses",
            Part::Jobs => "jobs",
            Part::Peers => "peers",
            Part::PeerScores => "peer_scores",
            Part::PoolRequests => "pool_requests",
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum TxError {
    #[error("transaction conflicts with a concurrent commit")]
    Conflict,
    #[error(transparent)]
    Storage(#[from] fjall::Error),
}

/// CBOR encoded records stored in partitions.
pub(crate) trait Record: Sized {
    fn to_bytes(&self) -> Result<Vec<u8>>;
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

impl<T> Record for T
where
    T: Encode<()> + for<'b> Decode<'b, ()>,
{
    fn to_bytes(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self).context("unable to encode record")
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        minicbor::decode(bytes).context("unable to decode record")
    }
}

pub(crate) fn decode_counter(bytes: &[u8]) -> i64 {
    bytes.try_into().map(i64::from_le_bytes).unwrap_or_default()
}

#[derive(Clone)]
pub(crate) struct Store {
    keyspace: TxKeyspace,
    partitions: Arc<BTreeMap<Part, TxPartitionHandle>>,
}

impl Store {
    pub(crate) fn new(keyspace: TxKeyspace) -> Result<Store> {
        let mut partitions = BTreeMap::new();
        for part in Part::ALL {
            let handle = keyspace
                .open_partition(part.name(), PartitionCreateOptions::default())
                .with_context(|| format!("unable to open partition {}", part.name()))?;
            partitions.insert(part, handle);
        }
        Ok(Store {
            keyspace,
            partitions: Arc::new(partitions),
        })
    }

    fn handle(&self, part: Part) -> &TxPartitionHandle {
        self.partitions
            .get(&part)
            .expect("every partition is opened in Store::new")
    }

    pub(crate) fn begin(&self) -> Result<Tx<'_>, TxError> {
        let inner = self
            .keyspace
            .write_tx()?
            .durability(Some(PersistMode::SyncAll));
        Ok(Tx { store: self, inner })
    }

    /// Reads the committed value outside of any transaction.
    pub(crate) fn get(&self, part: Part, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        Ok(self.handle(part).get(key)?.map(|v| v.to_vec()))
    }

    pub(crate) fn get_record<T: Record>(
        &self,
        part: Part,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<T>> {
        self.get(part, key)?
            .map(|bytes| T::from_bytes(&bytes))
            .transpose()
    }

    pub(crate) fn counter(&self, part: Part, key: impl AsRef<[u8]>) -> Result<i64> {
        Ok(self
            .get(part, key)?
            .map(|bytes| decode_counter(&bytes))
            .unwrap_or_default())
    }

    pub(crate) fn scan(&self, part: Part, prefix: impl AsRef<[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let snapshot = self.keyspace.read_tx();
        let mut items = vec![];
        for item in snapshot.prefix(self.handle(part), prefix) {
            let (key, value) = item?;
            items.push((key.to_vec(), value.to_vec()));
        }
        Ok(items)
    }

    #[cfg(test)]
    pub(crate) fn len(&self, part: Part) -> Result<usize> {
        Ok(self.keyspace.read_tx().len(self.handle(part))?)
    }
}

pub(crate) struct Tx<'s> {
    store: &'s Store,
    inner: WriteTransaction,
}

impl Tx<'_> {
    /// Reads through this transaction's own writes onto its snapshot.
    pub(crate) fn get(&mut self, part: Part, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let store = self.store;
        Ok(self.inner.get(store.handle(part), key)?.map(|v| v.to_vec()))
    }

    pub(crate) fn get_record<T: Record>(
        &mut self,
        part: Part,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<T>> {
        self.get(part, key)?
            .map(|bytes| T::from_bytes(&bytes))
            .transpose()
    }

    pub(crate) fn contains(&mut self, part: Part, key: impl AsRef<[u8]>) -> Result<bool> {
        let store = self.store;
        Ok(self.inner.contains_key(store.handle(part), key)?)
    }

    /// Prefix scan. A later commit inserting or removing a key under
    /// `prefix` conflicts with this transaction.
    pub(crate) fn scan(
        &mut self,
        part: Part,
        prefix: impl AsRef<[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let store = self.store;
        let mut items = vec![];
        for item in self.inner.prefix(store.handle(part), prefix.as_ref()) {
            let (key, value) = item?;
            items.push((key.to_vec(), value.to_vec()));
        }
        Ok(items)
    }

    pub(crate) fn insert(&mut self, part: Part, key: impl AsRef<[u8]>, value: impl Into<Vec<u8>>) {
        let store = self.store;
        let value: Vec<u8> = value.into();
        self.inner.insert(store.handle(part), key.as_ref(), value);
    }

    pub(crate) fn insert_record<T: Record>(
        &mut self,
        part: Part,
        key: impl AsRef<[u8]>,
        record: &T,
    ) -> Result<()> {
        let bytes = record.to_bytes()?;
        self.insert(part, key, bytes);
        Ok(())
    }

    pub(crate) fn remove(&mut self, part: Part, key: impl AsRef<[u8]>) {
        let store = self.store;
        self.inner.remove(store.handle(part), key.as_ref());
    }

    /// Adds `delta` to an i64 counter, a missing counter counts as zero.
    pub(crate) fn add(&mut self, part: Part, key: impl AsRef<[u8]>, delta: i64) -> Result<()> {
        let store = self.store;
        self.inner.update_fetch(store.handle(part), key.as_ref(), |current| {
            let base = current.map(|bytes| decode_counter(bytes)).unwrap_or_default();
            Some((base + delta).to_le_bytes().into())
        })?;
        Ok(())
    }

    pub(crate) fn commit(self) -> Result<(), TxError> {
        match self.inner.commit()? {
            Ok(()) => Ok(()),
            Err(conflict) => {
                trace!(target: "store", %conflict, "commit lost against a concurrent writer");
                Err(TxError::Conflict)
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn temp_store() -> Result<(tempfile::TempDir, Store)> {
    let dir = tempfile::tempdir()?;
    let keyspace = fjall::Config::new(dir.path())
        .temporary(true)
        .open_transactional()?;
    Ok((dir, Store::new(keyspace)?))
}
