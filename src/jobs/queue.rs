//! Persisted job queue. Every state change is a store transaction, so a job
//! claimed by one sweeper cannot be claimed by another.

use std::time::Duration;

use anyhow::{Result, bail};
use jiff::Timestamp;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::store::{Part, Record, RecordId, Store, Tx, TxError, apply_with_retry};

use super::{Job, JobState};
#[cfg(test)]
use super::{HandlerName, Payload};

#[derive(Clone)]
pub(crate) struct JobQueue {
    store: Store,
    max_attempts: u32,
}

impl JobQueue {
    /// `max_attempts` bounds the retries of the queue's own transactions.
    pub(crate) fn new(store: Store, max_attempts: u32) -> JobQueue {
        JobQueue {
            store,
            max_attempts,
        }
    }

    /// Persists a pending job due immediately.
    #[cfg(test)]
    pub(crate) fn create_job(
        &self,
        category: &str,
        handler: HandlerName,
        payload: Payload,
    ) -> Result<RecordId> {
        self.enqueue(&Job::new(category, handler, payload, Timestamp::now()))
    }

    #[cfg(test)]
    fn enqueue(&self, job: &Job) -> Result<RecordId> {
        let id = apply_with_retry(&self.store, self.max_attempts, |tx| {
            Ok(Self::create_in(tx, job)?)
        })?;
        debug!(target: "jobs", %id, handler = %job.handler, "created job");
        Ok(id)
    }

    /// Persists every job of `jobs` in one transaction.
    pub(crate) fn enqueue_all(&self, jobs: &[Job]) -> Result<()> {
        apply_with_retry(&self.store, self.max_attempts, |tx| {
            for job in jobs {
                Self::create_in(tx, job)?;
            }
            Ok(())
        })?;
        debug!(target: "jobs", count = jobs.len(), "created jobs");
        Ok(())
    }

    /// Enqueues `job` as part of a larger transaction.
    pub(crate) fn create_in(tx: &mut Tx<'_>, job: &Job) -> Result<RecordId> {
        tx.insert_record(Part::Jobs, job.id, job)?;
        Ok(job.id)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: RecordId) -> Result<Option<Job>> {
        self.store.get_record(Part::Jobs, id)
    }

    pub(crate) fn list(&self) -> Result<Vec<Job>> {
        self.store
            .scan(Part::Jobs, b"")?
            .into_iter()
            .map(|(_, bytes)| Job::from_bytes(&bytes))
            .collect()
    }

    /// Pending jobs due at `now`, oldest due first.
    pub(crate) fn list_due(&self, now: Timestamp, limit: usize) -> Result<Vec<Job>> {
        let mut due: Vec<Job> = self
            .list()?
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect();
        due.sort_by_key(|job| (job.run_at, job.id));
        due.truncate(limit);
        Ok(due)
    }

    /// Moves a due job to running. Returns `None` when the job is no longer
    /// claimable, including when a concurrent claimer won.
    pub(crate) fn claim(&self, id: RecordId, now: Timestamp) -> Result<Option<Job>> {
        let mut tx = self.store.begin()?;
        let Some(mut job) = tx.get_record::<Job>(Part::Jobs, id)? else {
            return Ok(None);
        };
        if !job.is_due(now) {
            return Ok(None);
        }
        job.state = JobState::Running;
        job.last_attempt_at = Some(now.as_millisecond());
        tx.insert_record(Part::Jobs, id, &job)?;
        match tx.commit() {
            Ok(()) => Ok(Some(job)),
            Err(TxError::Conflict) => {
                debug!(target: "jobs", %id, "job claimed concurrently");
                Ok(None)
            }
            Err(TxError::Storage(error)) => Err(error.into()),
        }
    }

    pub(crate) fn complete(&self, id: RecordId) -> Result<()> {
        self.transition(id, |job| {
            job.state = JobState::Succeeded;
            job.last_error = None;
        })?;
        Ok(())
    }

    /// Records a failed attempt: back to pending with a later due time while
    /// attempts remain, expired otherwise.
    pub(crate) fn fail(
        &self,
        id: RecordId,
        error: &str,
        now: Timestamp,
        config: &SchedulerConfig,
    ) -> Result<JobState> {
        let job = self.transition(id, |job| {
            job.last_error = Some(error.to_string());
            if job.payload.attempt_number < config.max_attempts {
                let backoff = config.backoff(job.payload.attempt_number);
                job.payload.attempt_number += 1;
                job.state = JobState::Pending;
                job.run_at = now.as_millisecond() + millis(backoff);
            } else {
                job.state = JobState::Expired;
            }
        })?;
        if job.state == JobState::Expired {
            warn!(
                target: "jobs",
                %id,
                handler = %job.handler,
                attempts = job.payload.attempt_number,
                error,
                "job expired"
            );
        } else {
            debug!(target: "jobs", %id, attempt = job.payload.attempt_number, run_at = job.run_at, "job rescheduled");
        }
        Ok(job.state)
    }

    /// Jobs left running by a previous process go back to pending.
    pub(crate) fn recover_running(&self) -> Result<usize> {
        let running: Vec<RecordId> = self
            .list()?
            .into_iter()
            .filter(|job| job.state == JobState::Running)
            .map(|job| job.id)
            .collect();
        for id in &running {
            self.transition(*id, |job| job.state = JobState::Pending)?;
        }
        Ok(running.len())
    }

    /// Deletes succeeded and expired jobs whose last attempt is older than
    /// `retention`.
    pub(crate) fn purge_terminal(&self, now: Timestamp, retention: Duration) -> Result<usize> {
        let cutoff = now.as_millisecond() - millis(retention);
        let stale: Vec<RecordId> = self
            .list()?
            .into_iter()
            .filter(|job| {
                job.state.is_terminal() && job.last_attempt_at.unwrap_or(job.created_at) < cutoff
            })
            .map(|job| job.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        apply_with_retry(&self.store, self.max_attempts, |tx| {
            for id in &stale {
                tx.remove(Part::Jobs, id);
            }
            Ok(())
        })?;
        Ok(stale.len())
    }

    fn transition(&self, id: RecordId, mut change: impl FnMut(&mut Job)) -> Result<Job> {
        let job = apply_with_retry(&self.store, self.max_attempts, |tx| {
            let Some(mut job) = tx.get_record::<Job>(Part::Jobs, id)? else {
                return Ok(None);
            };
            change(&mut job);
            tx.insert_record(Part::Jobs, id, &job)?;
            Ok(Some(job))
        })?;
        let Some(job) = job else {
            bail!("unknown job {id}");
        };
        Ok(job)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
