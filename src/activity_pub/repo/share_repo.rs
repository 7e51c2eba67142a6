use anyhow::Result;

use crate::store::{PairKey, Part, Tx};

/// Announces of videos: `(video uuid, announcing actor) -> announce url`.
pub(crate) struct ShareRepo;

impl ShareRepo {
    /// Returns whether the share was created.
    pub(crate) fn find_or_create(
        tx: &mut Tx<'_>,
        video_uuid: &str,
        actor_url: &str,
        share_url: &str,
    ) -> Result<bool> {
        let key = PairKey::new(video_uuid, actor_url);
        if tx.contains(Part::Shares, &key)? {
            return Ok(false);
        }
        tx.insert(Part::Shares, key, share_url.as_bytes().to_vec());
        Ok(true)
    }
}
