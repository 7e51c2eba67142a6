use std::sync::Arc;
use std::time::Duration;

use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use ractor_cluster::RactorMessage;
use tracing::{info, warn};

use super::Batcher;

/// Sends pool request batches on a fixed interval while active.
pub(crate) struct ReputationTracker;

#[derive(RactorMessage)]
pub(crate) enum ReputationTrackerMsg {
    Activate,
    Deactivate,
    /// Runs one batch now, active or not.
    ForceSend,
    Tick,
}

pub(crate) struct ReputationTrackerInit {
    pub(crate) batcher: Arc<Batcher>,
    pub(crate) interval: Duration,
    pub(crate) activate: bool,
}

pub(crate) struct ReputationTrackerState {
    batcher: Arc<Batcher>,
    interval: Duration,
    timer: Option<JoinHandle<()>>,
}

impl ReputationTrackerState {
    fn deactivate(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            info!(target: "reputation", "deactivated");
        }
    }

    async fn send(&self) {
        if let Err(error) = self.batcher.make_pool_requests().await {
            warn!(target: "reputation", error = format!("{error:#}"), "pool request batch failed");
        }
    }
}

impl Actor for ReputationTracker {
    type Msg = ReputationTrackerMsg;
    type State = ReputationTrackerState;
    type Arguments = ReputationTrackerInit;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        if args.activate {
            ractor::cast!(myself, ReputationTrackerMsg::Activate)?;
        }
        Ok(ReputationTrackerState {
            batcher: args.batcher,
            interval: args.interval,
            timer: None,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.deactivate();
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ReputationTrackerMsg::Activate => {
                if state.timer.is_none() {
                    let interval = state.interval;
                    state.timer = Some(myself.send_interval(interval, || ReputationTrackerMsg::Tick));
                    info!(target: "reputation", ?interval, "activated");
                }
            }
            ReputationTrackerMsg::Deactivate => state.deactivate(),
            ReputationTrackerMsg::ForceSend => state.send().await,
            ReputationTrackerMsg::Tick => {
                if state.timer.is_some() {
                    state.send().await;
                }
            }
        }
        Ok(())
    }
}
