use anyhow::{Context, Result};
use aws_lc_rs::rsa::KeyPair;

use crate::store::{Part, Store, Tx};

/// PKCS#8 encoded key pairs of local actors, keyed by actor url.
pub(crate) struct CryptoRepo;

impl CryptoRepo {
    pub(crate) fn insert(tx: &mut Tx<'_>, actor_url: &str, pkcs8: &[u8]) {
        tx.insert(Part::KeyPairs, actor_url, pkcs8.to_vec());
    }
    pub(crate) fn load(store: &Store, actor_url: &str) -> Result<Option<KeyPair>> {
        let Some(der) = store.get(Part::KeyPairs, actor_url)? else {
            return Ok(None);
        };
        let key_pair = KeyPair::from_pkcs8(&der)
            .with_context(|| format!("invalid key pair stored for {actor_url}"))?;
        Ok(Some(key_pair))
    }
}
