use anyhow::Result;
use minicbor::{Decode, Encode};

use crate::store::{PairKey, Part, Tx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum RateKind {
    #[n(0)]
    Like,
    #[n(1)]
    Dislike,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct Rate {
    #[n(0)]
    kind: RateKind,
}

/// Rates keyed by `(video uuid, account url)`. An account holds at most one
/// rate per video, whatever its kind.
pub(crate) struct RateRepo;

impl RateRepo {
    /// Returns whether the rate was created. An existing rate is left
    /// untouched even when its kind differs.
    pub(crate) fn find_or_create(
        tx: &mut Tx<'_>,
        video_uuid: &str,
        account_url: &str,
        kind: RateKind,
    ) -> Result<bool> {
        let key = PairKey::new(video_uuid, account_url);
        if tx.contains(Part::Rates, &key)? {
            return Ok(false);
        }
        tx.insert_record(Part::Rates, key, &Rate { kind })?;
        Ok(true)
    }
    #[cfg(test)]
    pub(crate) fn find_one(
        tx: &mut Tx<'_>,
        video_uuid: &str,
        account_url: &str,
    ) -> Result<Option<RateKind>> {
        let rate: Option<Rate> = tx.get_record(Part::Rates, PairKey::new(video_uuid, account_url))?;
        Ok(rate.map(|rate| rate.kind))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{RateKind, RateRepo};
    use crate::store::temp_store;

    #[test]
    fn one_rate_per_account_and_video() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let mut tx = store.begin()?;
        assert!(RateRepo::find_or_create(&mut tx, "v", "https://a.example/x", RateKind::Like)?);
        assert!(!RateRepo::find_or_create(&mut tx, "v", "https://a.example/x", RateKind::Dislike)?);
        assert!(RateRepo::find_or_create(&mut tx, "w", "https://a.example/x", RateKind::Dislike)?);
        tx.commit()?;

        let mut tx = store.begin()?;
        assert_eq!(RateRepo::find_one(&mut tx, "v", "https://a.example/x")?, Some(RateKind::Like));
        assert_eq!(RateRepo::find_one(&mut tx, "v", "https://b.example/y")?, None);
        Ok(())
    }
}
