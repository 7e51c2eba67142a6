use jiff::Timestamp;
use tracing::{debug, info};

use crate::activity_pub::actor::Actor;
use crate::activity_pub::dispatcher::DispatchError;
use crate::activity_pub::forward::maybe_forward;
use crate::activity_pub::model::{AnnounceObject, Envelope};
use crate::activity_pub::repo::{ShareRepo, VideoRepo};
use crate::jobs::{ACTIVITYPUB_HTTP, HandlerName, Job, JobQueue, Payload};
use crate::store::RecordId;

use super::ApplyContext;

enum Shared {
    Recorded(bool),
    Fetching(RecordId),
}

/// Records the share of a known video and forwards it when the video is
/// owned here. An unknown video is fetched through a job instead; the shares
/// collection of the fetched video brings the share back.
pub(crate) async fn create_share(
    ctx: &ApplyContext,
    envelope: &Envelope,
    actor: &Actor,
    announce: AnnounceObject,
) -> Result<(), DispatchError> {
    let apub = ctx.apub.clone();
    let envelope = envelope.clone();
    let origin = actor.clone();
    let video_url = announce.video.clone();
    let shared = ctx
        .apply(move |tx| {
            let Some(video) = VideoRepo::find_by_url(tx, &announce.video)? else {
                let payload = Payload {
                    uris: vec![announce.video.clone()],
                    signature_actor: None,
                    body: None,
                    attempt_number: 1,
                };
                let job = Job::new(ACTIVITYPUB_HTTP, HandlerName::Fetch, payload, Timestamp::now());
                return Ok(Shared::Fetching(JobQueue::create_in(tx, &job)?));
            };
            let created = ShareRepo::find_or_create(tx, &video.uuid, &origin.url, &announce.id)?;
            if created {
                maybe_forward(tx, &apub, &envelope, video.local, &origin, &video.owner)?;
            }
            Ok(Shared::Recorded(created))
        })
        .await?;
    match shared {
        Shared::Recorded(true) => {
            info!(target: "apub", actor = %actor.url, video = %video_url, "share created");
        }
        Shared::Recorded(false) => {
            debug!(target: "apub", actor = %actor.url, video = %video_url, "share already known");
        }
        Shared::Fetching(job) => {
            info!(target: "apub", video = %video_url, %job, "fetching unknown shared video");
        }
    }
    Ok(())
}
