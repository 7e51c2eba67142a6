use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use ractor_cluster::RactorMessage;
use tracing::info;

use crate::activity_pub::dispatcher::Dispatcher;
use crate::activity_pub::mailman::Transport;
use crate::config::RuntimeConfig;
use crate::jobs::handlers::{BroadcastHandler, Delivery, FetchHandler, UnicastHandler};
use crate::jobs::{HandlerName, JobQueue, JobScheduler, JobSchedulerInit, JobSchedulerMsg, Scheduler};
use crate::reputation::{Batcher, ReputationTracker, ReputationTrackerInit, ReputationTrackerMsg};

pub(crate) struct Supervisor;

#[derive(RactorMessage)]
pub(crate) enum SupervisorMsg {
    /// Sends the pending pool requests now.
    ForceReputationBatch,
}

pub(crate) struct SupervisorInit {
    pub(crate) config: RuntimeConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dispatcher: Dispatcher,
}

pub(crate) struct SupervisorState {
    init: SupervisorInit,
    myself: ActorRef<SupervisorMsg>,
    reputation: Option<ActorRef<ReputationTrackerMsg>>,
}

impl Actor for Supervisor {
    type Msg = SupervisorMsg;
    type State = SupervisorState;
    type Arguments = SupervisorInit;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        init: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(SupervisorState {
            init,
            myself,
            reputation: None,
        })
    }

    async fn post_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!(target: "lifecycle", "started");

        state.spawn_job_scheduler().await?;
        state.spawn_reputation_tracker().await?;

        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMsg::ForceReputationBatch => {
                if let Some(reputation) = &state.reputation {
                    ractor::cast!(reputation, ReputationTrackerMsg::ForceSend)?;
                }
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        use SupervisionEvent::*;

        let is_true = |x| -> bool { x };

        match message {
            ActorStarted(_) => {}
            ActorTerminated(_, _, _) => {}
            ActorFailed(actor_cell, error) => {
                if actor_cell
                    .is_message_type_of::<JobSchedulerMsg>()
                    .is_some_and(is_true)
                {
                    info!(target: "supervision", %error, "job scheduler crashed, restarting...");
                    state.spawn_job_scheduler().await?;
                }
                if actor_cell
                    .is_message_type_of::<ReputationTrackerMsg>()
                    .is_some_and(is_true)
                {
                    info!(target: "supervision", %error, "reputation tracker crashed, restarting...");
                    state.spawn_reputation_tracker().await?;
                }
            }
            ProcessGroupChanged(_) => {}
            PidLifecycleEvent(_) => {}
        }

        Ok(())
    }
}

impl SupervisorState {
    fn build_scheduler(&self) -> Scheduler {
        let RuntimeConfig { init: config, store } = &self.init.config;
        let transport = self.init.transport.clone();
        let queue = JobQueue::new(store.clone(), config.apply.max_attempts);
        let delivery = Delivery::new(store.clone(), transport.clone(), config.delivery.clone());

        let mut scheduler = Scheduler::new(queue.clone(), config.scheduler.clone());
        scheduler.register(
            HandlerName::Broadcast,
            Arc::new(BroadcastHandler::new(
                delivery.clone(),
                queue,
                config.scheduler.clone(),
            )),
        );
        scheduler.register(HandlerName::Unicast, Arc::new(UnicastHandler::new(delivery)));
        scheduler.register(
            HandlerName::Fetch,
            Arc::new(FetchHandler::new(transport, self.init.dispatcher.clone())),
        );
        scheduler
    }
    async fn spawn_job_scheduler(&self) -> Result<()> {
        Actor::spawn_linked(
            Some("job_scheduler".into()),
            JobScheduler,
            JobSchedulerInit {
                scheduler: Arc::new(self.build_scheduler()),
            },
            self.myself.get_cell(),
        )
        .await?;
        Ok(())
    }
    async fn spawn_reputation_tracker(&mut self) -> Result<()> {
        let RuntimeConfig { init: config, store } = &self.init.config;
        let batcher = Batcher::new(
            store.clone(),
            self.init.transport.clone(),
            config.activity_pub.clone(),
            config.reputation.clone(),
            config.apply.max_attempts,
        );
        let (actor, _) = Actor::spawn_linked(
            Some("reputation".into()),
            ReputationTracker,
            ReputationTrackerInit {
                batcher: Arc::new(batcher),
                interval: Duration::from_secs(config.reputation.interval_secs),
                activate: config.reputation.enabled,
            },
            self.myself.get_cell(),
        )
        .await?;
        self.reputation = Some(actor);
        Ok(())
    }
}
