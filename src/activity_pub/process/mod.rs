//! Apply paths of the activities the dispatcher recognizes. Each one runs
//! its store writes through [`apply_blocking`], so a conflicting concurrent
//! writer makes the whole unit run again.

mod abuse;
mod follow;
mod rate;
mod share;
mod video;
mod view;

use crate::config::ActivityPubConfig;
use crate::store::{ApplyError, Store, Tx, UnitError, apply_blocking};

pub(super) use abuse::create_abuse;
pub(super) use follow::create_follow;
pub(super) use rate::create_rate;
pub(super) use share::create_share;
pub(super) use video::create_video;
pub(super) use view::create_view;

/// What every apply path needs.
#[derive(Clone)]
pub(crate) struct ApplyContext {
    pub(crate) store: Store,
    pub(crate) apub: ActivityPubConfig,
    pub(crate) max_attempts: u32,
}

impl ApplyContext {
    pub(crate) async fn apply<T, F>(&self, unit: F) -> Result<T, ApplyError>
    where
        T: Send + 'static,
        F: FnMut(&mut Tx<'_>) -> Result<T, UnitError> + Send + 'static,
    {
        apply_blocking(&self.store, self.max_attempts, unit).await
    }
}
