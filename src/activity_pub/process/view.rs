use anyhow::anyhow;
use tracing::debug;

use crate::activity_pub::actor::Actor;
use crate::activity_pub::dispatcher::DispatchError;
use crate::activity_pub::forward::maybe_forward;
use crate::activity_pub::model::{Envelope, ViewObject};
use crate::activity_pub::repo::{Counter, VideoRepo};

use super::ApplyContext;

/// Views are not deduplicated, every one increments the counter.
pub(crate) async fn create_view(
    ctx: &ApplyContext,
    envelope: &Envelope,
    actor: &Actor,
    view: ViewObject,
) -> Result<(), DispatchError> {
    let apub = ctx.apub.clone();
    let envelope = envelope.clone();
    let origin = actor.clone();
    ctx.apply(move |tx| {
        let Some(video) = VideoRepo::find_by_url(tx, &view.video)? else {
            return Err(anyhow!("unknown video {}", view.video).into());
        };
        VideoRepo::add_counter(tx, &video.uuid, Counter::Views, 1)?;
        maybe_forward(tx, &apub, &envelope, video.local, &origin, &video.owner)?;
        Ok(())
    })
    .await?;
    debug!(target: "apub", actor = %actor.url, "view counted");
    Ok(())
}
