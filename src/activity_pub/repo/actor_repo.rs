use anyhow::Result;

use crate::activity_pub::actor::Actor;
use crate::store::{Part, Tx};

pub(crate) struct ActorRepo;

impl ActorRepo {
    pub(crate) fn insert(tx: &mut Tx<'_>, actor: &Actor) -> Result<()> {
        tx.insert_record(Part::Actors, &actor.url, actor)
    }
    pub(crate) fn find_one(tx: &mut Tx<'_>, url: &str) -> Result<Option<Actor>> {
        tx.get_record(Part::Actors, url)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::ActorRepo;
    use crate::activity_pub::actor::tests::remote_actor;
    use crate::store::temp_store;

    #[test]
    fn insert_then_find() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let actor = remote_actor("https://kenzoishii.example.com/accounts/kenzoishii");
        let mut tx = store.begin()?;
        ActorRepo::insert(&mut tx, &actor)?;
        tx.commit()?;

        let mut tx = store.begin()?;
        assert_eq!(ActorRepo::find_one(&mut tx, &actor.url)?, Some(actor));
        assert_eq!(ActorRepo::find_one(&mut tx, "https://kenzoishii.example.com/")?, None);
        Ok(())
    }
}
