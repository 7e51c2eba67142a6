use anyhow::Result;

use crate::store::{PairKey, Part, Tx};

/// Followers of local actors: `(local actor, follower) -> follower inbox`.
pub(crate) struct FollowerRepo;

impl FollowerRepo {
    pub(crate) fn insert(tx: &mut Tx<'_>, local_actor: &str, follower: &str, inbox: &str) {
        tx.insert(
            Part::Followers,
            PairKey::new(local_actor, follower),
            inbox.as_bytes().to_vec(),
        );
    }
    pub(crate) fn contains(tx: &mut Tx<'_>, local_actor: &str, follower: &str) -> Result<bool> {
        tx.contains(Part::Followers, PairKey::new(local_actor, follower))
    }
    /// Follower urls paired with the inbox deliveries should go to.
    pub(crate) fn followers_of(tx: &mut Tx<'_>, local_actor: &str) -> Result<Vec<(String, String)>> {
        let followers = tx
            .scan(Part::Followers, PairKey::prefix(local_actor))?
            .into_iter()
            .map(|(key, inbox)| {
                let follower = PairKey::from(key.as_slice()).tail_str().to_string();
                (follower, String::from_utf8_lossy(&inbox).into_owned())
            })
            .collect();
        Ok(followers)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::FollowerRepo;
    use crate::store::temp_store;

    #[test]
    fn followers_are_scoped_to_their_actor() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let mut tx = store.begin()?;
        FollowerRepo::insert(&mut tx, "https://node.example/accounts/a", "https://x.example/u", "https://x.example/inbox");
        FollowerRepo::insert(&mut tx, "https://node.example/accounts/ab", "https://y.example/u", "https://y.example/inbox");
        tx.commit()?;

        let mut tx = store.begin()?;
        let followers = FollowerRepo::followers_of(&mut tx, "https://node.example/accounts/a")?;
        assert_eq!(
            followers,
            vec![("https://x.example/u".to_string(), "https://x.example/inbox".to_string())]
        );
        Ok(())
    }
}
