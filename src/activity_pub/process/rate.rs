use anyhow::anyhow;
use tracing::{debug, info};

use crate::activity_pub::actor::Actor;
use crate::activity_pub::dispatcher::DispatchError;
use crate::activity_pub::forward::maybe_forward;
use crate::activity_pub::model::{Envelope, MalformedActivity, RateObject};
use crate::activity_pub::repo::{Counter, RateKind, RateRepo, VideoRepo};

use super::ApplyContext;

/// Creates the rate of `actor` on the video unless the account already rated
/// it. Counters move and the activity is forwarded only on creation.
pub(crate) async fn create_rate(
    ctx: &ApplyContext,
    envelope: &Envelope,
    actor: &Actor,
    rate: RateObject,
    kind: RateKind,
) -> Result<(), DispatchError> {
    if actor.account.is_none() {
        return Err(MalformedActivity {
            kind: envelope.kind().to_string(),
            reason: format!("cannot rate with the non account actor {}", actor.url),
        }
        .into());
    }
    let counter = match kind {
        RateKind::Like => Counter::Likes,
        RateKind::Dislike => Counter::Dislikes,
    };

    let apub = ctx.apub.clone();
    let envelope = envelope.clone();
    let origin = actor.clone();
    let created = ctx
        .apply(move |tx| {
            let Some(video) = VideoRepo::find_by_url(tx, &rate.video)? else {
                return Err(anyhow!("unknown video {}", rate.video).into());
            };
            let created = RateRepo::find_or_create(tx, &video.uuid, &origin.url, kind)?;
            if created {
                VideoRepo::add_counter(tx, &video.uuid, counter, 1)?;
                maybe_forward(tx, &apub, &envelope, video.local, &origin, &video.owner)?;
            }
            Ok(created)
        })
        .await?;
    if created {
        info!(target: "apub", actor = %actor.url, ?kind, "rate created");
    } else {
        debug!(target: "apub", actor = %actor.url, ?kind, "video already rated by this account");
    }
    Ok(())
}
