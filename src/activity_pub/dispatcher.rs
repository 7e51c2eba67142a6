//! Entry point of inbound activities.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::store::ApplyError;

use super::actor::{ActorResolver, UnresolvedActorError};
use super::mailman::Transport;
use super::model::{Activity, Envelope, MalformedActivity, Object, VideoObject};
use super::process::{self, ApplyContext};
use super::repo::RateKind;

#[derive(Debug, Error)]
pub(crate) enum DispatchError {
    #[error(transparent)]
    UnresolvedActor(#[from] UnresolvedActorError),
    #[error(transparent)]
    Malformed(#[from] MalformedActivity),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Classifies envelopes and routes them to their apply path.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    ctx: ApplyContext,
    resolver: Arc<dyn ActorResolver>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub(crate) fn new(
        ctx: ApplyContext,
        resolver: Arc<dyn ActorResolver>,
        transport: Arc<dyn Transport>,
    ) -> Dispatcher {
        Dispatcher {
            ctx,
            resolver,
            transport,
        }
    }

    /// Applies `envelope`. Activities this node has no use for succeed
    /// without side effects.
    pub(crate) async fn dispatch(&self, envelope: Envelope) -> Result<(), DispatchError> {
        let actor = self.resolver.resolve(envelope.actor()).await?;
        match envelope.classify()? {
            Activity::Video(video) => {
                process::create_video(&self.ctx, &self.resolver, &self.transport, video).await
            }
            Activity::Like(rate) => {
                process::create_rate(&self.ctx, &envelope, &actor, rate, RateKind::Like).await
            }
            Activity::Dislike(rate) => {
                process::create_rate(&self.ctx, &envelope, &actor, rate, RateKind::Dislike).await
            }
            Activity::View(view) => process::create_view(&self.ctx, &envelope, &actor, view).await,
            Activity::Flag(flag) => process::create_abuse(&self.ctx, &envelope, &actor, flag).await,
            Activity::Follow(follow) => {
                process::create_follow(&self.ctx, &envelope, &actor, follow).await
            }
            Activity::Announce(announce) => {
                process::create_share(&self.ctx, &envelope, &actor, announce).await
            }
            Activity::Unknown(kind) => {
                debug!(target: "apub", %kind, activity = envelope.id(), "ignoring unknown activity");
                Ok(())
            }
        }
    }

    /// Creates a video from its fetched object, as if it came in a `Create`.
    pub(crate) async fn apply_video(&self, object: &Object<'_>) -> Result<(), DispatchError> {
        let video = VideoObject::try_from(object)?;
        process::create_video(&self.ctx, &self.resolver, &self.transport, video).await
    }
}
