use anyhow::Result;
use minicbor::{Decode, Encode};

use crate::store::{Part, RecordId, Tx};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct VideoAbuse {
    #[n(0)]
    pub(crate) id: RecordId,
    #[n(1)]
    pub(crate) reporter: String,
    #[n(2)]
    pub(crate) video_uuid: String,
    #[n(3)]
    pub(crate) reason: String,
}

pub(crate) struct AbuseRepo;

impl AbuseRepo {
    pub(crate) fn insert(tx: &mut Tx<'_>, abuse: &VideoAbuse) -> Result<()> {
        tx.insert_record(Part::Abuses, abuse.id, abuse)
    }
}
