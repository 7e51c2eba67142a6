//! Re-sends activities about locally owned videos to the followers of their
//! owner. Only enqueues jobs; delivery happens in the job handlers.

use anyhow::Result;
use jiff::Timestamp;
use tracing::debug;

use crate::config::ActivityPubConfig;
use crate::jobs::{ACTIVITYPUB_HTTP, HandlerName, Job, JobQueue, Payload};
use crate::store::{RecordId, Tx};

use super::actor::Actor;
use super::model::Envelope;
use super::repo::FollowerRepo;

/// Enqueues one broadcast of `envelope` inside `tx` when the subject is owned
/// by this node. Returns the job id, `None` when nothing had to be sent.
pub(crate) fn maybe_forward(
    tx: &mut Tx<'_>,
    apub: &ActivityPubConfig,
    envelope: &Envelope,
    subject_is_locally_owned: bool,
    origin: &Actor,
    owner: &str,
) -> Result<Option<RecordId>> {
    if !subject_is_locally_owned {
        return Ok(None);
    }
    let mut followers = FollowerRepo::followers_of(tx, owner)?;
    for target in envelope.audience() {
        if !apub.is_local(target) {
            continue;
        }
        if let Some(local_actor) = target.strip_suffix("/followers") {
            if local_actor != owner {
                followers.extend(FollowerRepo::followers_of(tx, local_actor)?);
            }
        }
    }
    let inboxes = forward_recipients(followers, origin);
    if inboxes.is_empty() {
        debug!(target: "apub", activity = envelope.id(), "no one to forward to");
        return Ok(None);
    }

    let payload = Payload {
        uris: inboxes,
        signature_actor: Some(apub.application_actor()),
        body: Some(envelope.to_value().to_string()),
        attempt_number: 1,
    };
    let job = Job::new(ACTIVITYPUB_HTTP, HandlerName::Broadcast, payload, Timestamp::now());
    let id = JobQueue::create_in(tx, &job)?;
    debug!(target: "apub", activity = envelope.id(), job = %id, recipients = job.payload.uris.len(), "forwarding activity");
    Ok(Some(id))
}

/// Distinct inboxes of `followers` (pairs of follower url and inbox), minus
/// the originating actor's own endpoints.
pub(crate) fn forward_recipients(followers: Vec<(String, String)>, origin: &Actor) -> Vec<String> {
    let mut excluded = vec![origin.url.as_str(), origin.inbox.as_str()];
    excluded.extend(origin.shared_inbox.as_deref());

    let mut inboxes: Vec<String> = followers
        .into_iter()
        .filter(|(follower, inbox)| {
            !excluded.contains(&follower.as_str()) && !excluded.contains(&inbox.as_str())
        })
        .map(|(_, inbox)| inbox)
        .collect();
    inboxes.sort();
    inboxes.dedup();
    inboxes
}
