use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use jiff::Timestamp;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use ractor_cluster::RactorMessage;
use tokio::task::{JoinSet, block_in_place, spawn_blocking};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;

use super::handlers::JobHandler;
use super::{HandlerName, Job, JobQueue};

/// Runs due jobs through their handlers and records the outcome.
pub(crate) struct Scheduler {
    queue: JobQueue,
    handlers: BTreeMap<HandlerName, Arc<dyn JobHandler>>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub(crate) fn new(queue: JobQueue, config: SchedulerConfig) -> Scheduler {
        Scheduler {
            queue,
            handlers: BTreeMap::new(),
            config,
        }
    }

    pub(crate) fn register(&mut self, name: HandlerName, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(name, handler);
    }

    pub(crate) fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Claims up to `batch_size` due jobs and runs them concurrently. Returns
    /// the number of due jobs found.
    pub(crate) async fn process_due(&self, now: Timestamp) -> Result<usize> {
        let queue = self.queue.clone();
        let limit = self.config.batch_size;
        let due = spawn_blocking(move || queue.list_due(now, limit)).await??;
        let found = due.len();
        self.claim_and_run(due, now).await?;
        Ok(found)
    }

    /// Claims every job in `due` before running any of them. A job that
    /// cannot be claimed is skipped; the jobs claimed alongside it still run
    /// to completion before the first claim error is returned.
    async fn claim_and_run(&self, due: Vec<Job>, now: Timestamp) -> Result<()> {
        let queue = self.queue.clone();
        let claims = spawn_blocking(move || {
            due.into_iter()
                .map(|job| (job.id, queue.claim(job.id, now)))
                .collect::<Vec<_>>()
        })
        .await?;

        let mut claim_error = None;
        let mut join_set = JoinSet::new();
        for (id, claim) in claims {
            let job = match claim {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(error) => {
                    warn!(target: "jobs", %id, error = %format!("{error:#}"), "cannot claim job");
                    claim_error.get_or_insert(error);
                    continue;
                }
            };
            let handler = self.handlers.get(&job.handler).cloned();
            let queue = self.queue.clone();
            let config = self.config.clone();
            join_set.spawn(async move { run_job(queue, handler, job, now, config).await });
        }
        for result in join_set.join_all().await {
            result?;
        }
        match claim_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// One scheduler tick: purge old terminal jobs, then process due ones.
    async fn sweep(&self, now: Timestamp) -> Result<usize> {
        let queue = self.queue.clone();
        let retention = std::time::Duration::from_secs(self.config.retention_secs);
        let purged = spawn_blocking(move || queue.purge_terminal(now, retention)).await??;
        if purged > 0 {
            debug!(target: "jobs", purged, "purged terminal jobs");
        }
        self.process_due(now).await
    }
}

async fn run_job(
    queue: JobQueue,
    handler: Option<Arc<dyn JobHandler>>,
    job: Job,
    now: Timestamp,
    config: SchedulerConfig,
) -> Result<()> {
    let result = match handler {
        Some(handler) => handler.handle(&job).await,
        None => Err(anyhow!("no handler registered for {}", job.handler)),
    };
    let id = job.id;
    match result {
        Ok(()) => {
            debug!(target: "jobs", %id, handler = %job.handler, "job succeeded");
            spawn_blocking(move || queue.complete(id)).await??;
        }
        Err(error) => {
            let error = format!("{error:#}");
            debug!(target: "jobs", %id, handler = %job.handler, %error, "job attempt failed");
            spawn_blocking(move || queue.fail(id, &error, now, &config)).await??;
        }
    }
    Ok(())
}

pub(crate) struct JobScheduler;

#[derive(RactorMessage)]
pub(crate) enum JobSchedulerMsg {
    Sweep,
}

pub(crate) struct JobSchedulerInit {
    pub(crate) scheduler: Arc<Scheduler>,
}

impl Actor for JobScheduler {
    type Msg = JobSchedulerMsg;
    type State = Arc<Scheduler>;
    type Arguments = JobSchedulerInit;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let JobSchedulerInit { scheduler } = args;
        let recovered = block_in_place(|| scheduler.queue().recover_running())?;
        if recovered > 0 {
            info!(target: "jobs", recovered, "reset interrupted jobs to pending");
        }
        Ok(scheduler)
    }
    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        ractor::cast!(myself, JobSchedulerMsg::Sweep)?;
        Ok(())
    }
    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            JobSchedulerMsg::Sweep => {
                let interval = state.config.sweep_interval();
                match state.sweep(Timestamp::now()).await {
                    Ok(found) if found >= state.config.batch_size => {
                        // A full batch, more jobs are likely due
                        ractor::cast!(myself, JobSchedulerMsg::Sweep)?;
                    }
                    Ok(_) => {
                        myself.send_after(interval, || JobSchedulerMsg::Sweep);
                    }
                    Err(error) => {
                        warn!(target: "jobs", %error, "job sweep failed");
                        myself.send_after(interval, || JobSchedulerMsg::Sweep);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use jiff::Timestamp;

    use super::Scheduler;
    use crate::config::SchedulerConfig;
    use crate::jobs::handlers::JobHandler;
    use crate::jobs::{ACTIVITYPUB_HTTP, HandlerName, Job, JobQueue, JobState, Payload};
    use crate::store::{Part, Store, temp_store};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn handle(&self, _job: &Job) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("peer unreachable");
            }
            Ok(())
        }
    }

    fn scheduler(store: &Store, handler: Arc<Counting>, max_attempts: u32) -> Scheduler {
        let config = SchedulerConfig {
            max_attempts,
            base_backoff_secs: 0,
            max_backoff_secs: 0,
            ..Default::default()
        };
        let mut scheduler = Scheduler::new(JobQueue::new(store.clone(), 10), config);
        scheduler.register(HandlerName::Unicast, handler);
        scheduler
    }

    fn payload() -> Payload {
        Payload {
            uris: vec!["https://peer.example/inbox".to_string()],
            signature_actor: None,
            body: None,
            attempt_number: 1,
        }
    }

    #[tokio::test]
    async fn failing_job_is_retried_then_expires() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let handler = Arc::new(Counting {
            fail: true,
            ..Default::default()
        });
        let scheduler = scheduler(&store, handler.clone(), 3);
        let id = scheduler
            .queue()
            .create_job(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload())?;

        let mut states = vec![];
        for _ in 0..5 {
            scheduler.process_due(Timestamp::now()).await?;
            states.push(scheduler.queue().get(id)?.unwrap().state);
        }
        assert_eq!(
            states,
            vec![
                JobState::Pending,
                JobState::Pending,
                JobState::Expired,
                JobState::Expired,
                JobState::Expired
            ]
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let job = scheduler.queue().get(id)?.unwrap();
        assert_eq!(job.last_error.as_deref(), Some("peer unreachable"));
        Ok(())
    }

    #[tokio::test]
    async fn successful_job_succeeds_once() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let handler = Arc::new(Counting::default());
        let scheduler = scheduler(&store, handler.clone(), 3);
        let id = scheduler
            .queue()
            .create_job(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload())?;
        assert_eq!(scheduler.process_due(Timestamp::now()).await?, 1);
        assert_eq!(scheduler.process_due(Timestamp::now()).await?, 0);
        assert_eq!(scheduler.queue().get(id)?.unwrap().state, JobState::Succeeded);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_handler_fails_the_attempt() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let scheduler = scheduler(&store, Arc::new(Counting::default()), 1);
        let id = scheduler
            .queue()
            .create_job(ACTIVITYPUB_HTTP, HandlerName::Fetch, payload())?;
        scheduler.process_due(Timestamp::now()).await?;
        assert_eq!(scheduler.queue().get(id)?.unwrap().state, JobState::Expired);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sweepers_run_each_job_once() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let handler = Arc::new(Counting::default());
        let first = scheduler(&store, handler.clone(), 3);
        let second = scheduler(&store, handler.clone(), 3);
        for _ in 0..10 {
            first
                .queue()
                .create_job(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload())?;
        }
        let now = Timestamp::now();
        let (a, b) = tokio::join!(first.process_due(now), second.process_due(now));
        a?;
        b?;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 10);
        let jobs = first.queue().list()?;
        assert!(jobs.iter().all(|job| job.state == JobState::Succeeded));
        Ok(())
    }

    #[tokio::test]
    async fn unclaimable_job_does_not_strand_the_others() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let handler = Arc::new(Counting::default());
        let scheduler = scheduler(&store, handler.clone(), 3);
        let now = Timestamp::now();
        let first = Job::new(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload(), now);
        let broken = Job::new(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload(), now);
        let last = Job::new(ACTIVITYPUB_HTTP, HandlerName::Unicast, payload(), now);
        let mut tx = store.begin()?;
        JobQueue::create_in(&mut tx, &first)?;
        tx.insert(Part::Jobs, broken.id, b"garbage".to_vec());
        JobQueue::create_in(&mut tx, &last)?;
        tx.commit()?;

        let result = scheduler
            .claim_and_run(vec![first.clone(), broken, last.clone()], now)
            .await;
        assert!(result.is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        for id in [first.id, last.id] {
            assert_eq!(scheduler.queue().get(id)?.unwrap().state, JobState::Succeeded);
        }
        Ok(())
    }
}
