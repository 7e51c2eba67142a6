use anyhow::Result;
use jiff::Timestamp;
use serde_json::json;
use tracing::{debug, info};

use crate::activity_pub::actor::Actor;
use crate::activity_pub::dispatcher::DispatchError;
use crate::activity_pub::model::{Envelope, FollowObject, MalformedActivity};
use crate::activity_pub::repo::{ActorRepo, FollowerRepo};
use crate::jobs::{ACTIVITYPUB_HTTP, HandlerName, Job, JobQueue, Payload};
use crate::store::RecordId;

use super::ApplyContext;

/// Records `actor` as a follower of a local actor and answers with an
/// `Accept` signed by the followed actor. A redelivered follow is accepted
/// again.
pub(crate) async fn create_follow(
    ctx: &ApplyContext,
    envelope: &Envelope,
    actor: &Actor,
    follow: FollowObject,
) -> Result<(), DispatchError> {
    let follower = actor.clone();
    let activity = envelope.to_value();
    let target = follow.object.clone();
    let outcome = ctx
        .apply(move |tx| {
            let Some(local) = ActorRepo::find_one(tx, &target)?.filter(|found| found.local) else {
                return Ok(None);
            };
            let created = !FollowerRepo::contains(tx, &local.url, &follower.url)?;
            FollowerRepo::insert(tx, &local.url, &follower.url, follower.delivery_inbox());
            let accept = json!({
                "@context": "https://www.w3.org/ns/activitystreams",
                "type": "Accept",
                "id": format!("{}/accepts/follows/{}", local.url, RecordId::new()),
                "actor": local.url,
                "object": activity,
            });
            let payload = Payload {
                uris: vec![follower.inbox.clone()],
                signature_actor: Some(local.url.clone()),
                body: Some(accept.to_string()),
                attempt_number: 1,
            };
            let job = Job::new(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload, Timestamp::now());
            let job = JobQueue::create_in(tx, &job)?;
            Ok(Some((created, job)))
        })
        .await?;

    let Some((created, job)) = outcome else {
        return Err(MalformedActivity {
            kind: envelope.kind().to_string(),
            reason: format!("{} is not a local actor", follow.object),
        }
        .into());
    };
    if created {
        info!(target: "apub", follower = %actor.url, following = %follow.object, "follower added");
    } else {
        debug!(target: "apub", follower = %actor.url, following = %follow.object, "follow already known");
    }
    debug!(target: "apub", %job, "accept enqueued");
    Ok(())
}
