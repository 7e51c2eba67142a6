use tracing::{info, warn};

use crate::activity_pub::actor::Actor;
use crate::activity_pub::dispatcher::DispatchError;
use crate::activity_pub::model::{Envelope, FlagObject, MalformedActivity};
use crate::activity_pub::repo::{AbuseRepo, VideoAbuse, VideoRepo};
use crate::store::RecordId;

use super::ApplyContext;

/// Records an abuse report. Reports about unknown videos are dropped.
pub(crate) async fn create_abuse(
    ctx: &ApplyContext,
    envelope: &Envelope,
    actor: &Actor,
    flag: FlagObject,
) -> Result<(), DispatchError> {
    if actor.account.is_none() {
        return Err(MalformedActivity {
            kind: envelope.kind().to_string(),
            reason: format!("cannot report abuse with the non account actor {}", actor.url),
        }
        .into());
    }
    let reporter = actor.url.clone();
    let video_url = flag.video.clone();
    let created = ctx
        .apply(move |tx| {
            let Some(video) = VideoRepo::find_by_url(tx, &flag.video)? else {
                return Ok(false);
            };
            let abuse = VideoAbuse {
                id: RecordId::new(),
                reporter: reporter.clone(),
                video_uuid: video.uuid,
                reason: flag.reason.clone(),
            };
            AbuseRepo::insert(tx, &abuse)?;
            Ok(true)
        })
        .await?;
    if created {
        info!(target: "apub", video = %video_url, "remote abuse created");
    } else {
        warn!(target: "apub", video = %video_url, "unknown video for remote video abuse");
    }
    Ok(())
}
