use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::activity_pub::actor::{Actor, ActorResolver};
use crate::activity_pub::dispatcher::DispatchError;
use crate::activity_pub::mailman::Transport;
use crate::activity_pub::model::{Object, VideoObject};
use crate::activity_pub::repo::{
    Counter, RateKind, RateRepo, ShareRepo, Video, VideoFile, VideoRepo,
};
use crate::config::host_of;

use super::ApplyContext;

/// Creates a remote video with its files and tags in one unit, then replays
/// its rates and shares. Creation is idempotent on uuid and url.
pub(crate) async fn create_video(
    ctx: &ApplyContext,
    resolver: &Arc<dyn ActorResolver>,
    transport: &Arc<dyn Transport>,
    video: VideoObject,
) -> Result<(), DispatchError> {
    let channel = resolver.resolve(&video.channel).await?;
    let record = Video {
        uuid: video.uuid.clone(),
        url: video.id.clone(),
        name: video.name.clone(),
        channel: channel.url.clone(),
        owner: channel.url.clone(),
        host: host_of(&video.id).to_string(),
        local: false,
        published: video.published.clone(),
    };
    let files: Vec<VideoFile> = video
        .files
        .iter()
        .map(|file| VideoFile {
            url: file.url.clone(),
            mime_type: file.mime_type.clone(),
            resolution: file.resolution,
            size: file.size,
            info_hash: file.info_hash.clone(),
        })
        .collect();
    let tags = video.tags.clone();

    debug!(target: "apub", video = %video.id, "adding remote video");
    let (stored, created) = ctx
        .apply(move |tx| {
            if let Some(existing) = VideoRepo::find_by_uuid_or_url(tx, &record.uuid, &record.url)? {
                return Ok((existing, false));
            }
            VideoRepo::insert(tx, &record, &files, &tags)?;
            Ok((record.clone(), true))
        })
        .await?;
    if created {
        info!(target: "apub", uuid = %stored.uuid, "remote video inserted");
    } else {
        debug!(target: "apub", uuid = %stored.uuid, "video already known");
    }

    // Outside the creation unit: these fetch remote data.
    replay_rates(ctx, resolver, &stored, &video.likes, RateKind::Like).await;
    replay_rates(ctx, resolver, &stored, &video.dislikes, RateKind::Dislike).await;
    replay_shares(ctx, resolver, transport, &stored, &video.shares).await;
    Ok(())
}

/// Rates listed in the video's collections. Each item is applied in its own
/// unit; a failing item is logged and skipped.
async fn replay_rates(
    ctx: &ApplyContext,
    resolver: &Arc<dyn ActorResolver>,
    video: &Video,
    actor_urls: &[String],
    kind: RateKind,
) {
    let counter = match kind {
        RateKind::Like => Counter::Likes,
        RateKind::Dislike => Counter::Dislikes,
    };
    let mut created = 0;
    for actor_url in actor_urls {
        match replay_rate(ctx, resolver, video, actor_url, kind, counter).await {
            Ok(true) => created += 1,
            Ok(false) => {}
            Err(error) => {
                warn!(target: "apub", actor = %actor_url, video = %video.uuid, %error, "cannot replay rate");
            }
        }
    }
    if !actor_urls.is_empty() {
        info!(target: "apub", created, ?kind, video = %video.uuid, "replayed rates");
    }
}

async fn replay_rate(
    ctx: &ApplyContext,
    resolver: &Arc<dyn ActorResolver>,
    video: &Video,
    actor_url: &str,
    kind: RateKind,
    counter: Counter,
) -> Result<bool> {
    let actor = resolver.resolve(actor_url).await?;
    if actor.account.is_none() {
        anyhow::bail!("{} is not an account", actor.url);
    }
    let uuid = video.uuid.clone();
    let created = ctx
        .apply(move |tx| {
            let created = RateRepo::find_or_create(tx, &uuid, &actor.url, kind)?;
            if created {
                VideoRepo::add_counter(tx, &uuid, counter, 1)?;
            }
            Ok(created)
        })
        .await?;
    Ok(created)
}

/// Shares listed in the video's collection are announce urls; the announcing
/// actor is read from the fetched announce.
async fn replay_shares(
    ctx: &ApplyContext,
    resolver: &Arc<dyn ActorResolver>,
    transport: &Arc<dyn Transport>,
    video: &Video,
    share_urls: &[String],
) {
    for share_url in share_urls {
        if let Err(error) = replay_share(ctx, resolver, transport, video, share_url).await {
            warn!(target: "apub", share = %share_url, video = %video.uuid, %error, "cannot replay share");
        }
    }
}

async fn replay_share(
    ctx: &ApplyContext,
    resolver: &Arc<dyn ActorResolver>,
    transport: &Arc<dyn Transport>,
    video: &Video,
    share_url: &str,
) -> Result<()> {
    let announce = Object::from(transport.fetch(share_url).await?);
    let actor_url = announce
        .get_node_iri("actor")
        .context("announce should have an actor")?;
    let actor: Actor = resolver.resolve(actor_url).await?;
    let uuid = video.uuid.clone();
    let share_url = share_url.to_string();
    ctx.apply(move |tx| Ok(ShareRepo::find_or_create(tx, &uuid, &actor.url, &share_url)?))
        .await?;
    Ok(())
}
