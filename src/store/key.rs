use std::fmt::Display;
use std::str::FromStr;

use minicbor::{Decode, Encode};
use uuid::Uuid;

/// Time ordered identifier of stored records (jobs, abuses, peers, pool
/// requests). Its byte form is the partition key, so prefix scans return
/// records in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct RecordId(Uuid);

impl RecordId {
    pub(crate) fn new() -> RecordId {
        RecordId(Uuid::now_v7())
    }
}

impl AsRef<[u8]> for RecordId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_simple().fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RecordId(Uuid::try_parse(s)?))
    }
}

impl TryFrom<&[u8]> for RecordId {
    type Error = std::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(RecordId(Uuid::from_bytes(value.try_into()?)))
    }
}

impl<C> Encode<C> for RecordId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(self.0.as_bytes())?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for RecordId {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let uuid = bytes
            .try_into()
            .map(Uuid::from_bytes)
            .map_err(minicbor::decode::Error::custom)?;
        Ok(RecordId(uuid))
    }
}

/// Two component key `head NUL tail`, used for one-to-many relations such as
/// video to rates or actor to followers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PairKey(Vec<u8>);

impl PairKey {
    pub(crate) fn new(head: impl AsRef<[u8]>, tail: impl AsRef<[u8]>) -> PairKey {
        let mut key = Self::prefix(head);
        key.extend_from_slice(tail.as_ref());
        PairKey(key)
    }
    /// Scan prefix matching every key with the given head.
    pub(crate) fn prefix(head: impl AsRef<[u8]>) -> Vec<u8> {
        let mut key = vec![];
        key.extend_from_slice(head.as_ref());
        key.push(0);
        key
    }
    pub(crate) fn head(&self) -> &[u8] {
        self.0
            .split(|&b| b == 0)
            .next()
            .expect("split yields at least one item")
    }
    pub(crate) fn tail(&self) -> &[u8] {
        let at = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        self.0.get(at + 1..).unwrap_or_default()
    }
    pub(crate) fn tail_str(&self) -> &str {
        std::str::from_utf8(self.tail()).unwrap_or_default()
    }
}

impl AsRef<[u8]> for PairKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for PairKey {
    fn from(value: &[u8]) -> Self {
        PairKey(value.to_vec())
    }
}
