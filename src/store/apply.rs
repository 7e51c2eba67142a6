use thiserror::Error;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use super::{Store, Tx, TxError};

/// Failure of one attempt of a unit of work.
#[derive(Debug, Error)]
pub(crate) enum UnitError {
    /// The attempt lost against a concurrent writer; run the unit again.
    #[error("conflicting concurrent write")]
    Retryable,
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl From<TxError> for UnitError {
    fn from(value: TxError) -> Self {
        match value {
            TxError::Conflict => UnitError::Retryable,
            TxError::Storage(error) => UnitError::Fatal(error.into()),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum ApplyError {
    #[error("gave up after {0} conflicting attempts")]
    Exhausted(u32),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Runs `unit` in a fresh transaction until it commits.
///
/// Every attempt re-executes the whole unit, reads included, so a unit must
/// not keep state across attempts. Only commit conflicts and
/// [`UnitError::Retryable`] are retried, at most `max_attempts` times in
/// total.
pub(crate) fn apply_with_retry<T, F>(
    store: &Store,
    max_attempts: u32,
    mut unit: F,
) -> Result<T, ApplyError>
where
    F: FnMut(&mut Tx<'_>) -> Result<T, UnitError>,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let mut tx = store
            .begin()
            .map_err(|error| ApplyError::Fatal(error.into()))?;
        let result = unit(&mut tx).and_then(|value| {
            tx.commit()?;
            Ok(value)
        });
        match result {
            Ok(value) => return Ok(value),
            Err(UnitError::Retryable) => {
                debug!(target: "store", attempt, max_attempts, "transaction conflict, retrying");
            }
            Err(UnitError::Fatal(error)) => return Err(ApplyError::Fatal(error)),
        }
    }
    warn!(target: "store", max_attempts, "transaction retries exhausted");
    Err(ApplyError::Exhausted(max_attempts))
}

/// [`apply_with_retry`] on the blocking thread pool.
pub(crate) async fn apply_blocking<T, F>(
    store: &Store,
    max_attempts: u32,
    unit: F,
) -> Result<T, ApplyError>
where
    T: Send + 'static,
    F: FnMut(&mut Tx<'_>) -> Result<T, UnitError> + Send + 'static,
{
    let store = store.clone();
    spawn_blocking(move || apply_with_retry(&store, max_attempts, unit))
        .await
        .map_err(|error| ApplyError::Fatal(error.into()))?
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use anyhow::{Result, anyhow};

    use super::{ApplyError, UnitError, apply_with_retry};
    use crate::store::{Part, temp_store};

    #[test]
    fn reruns_the_whole_unit_after_a_conflict() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let mut runs = 0;
        let value = apply_with_retry(&store, 3, |tx| {
            runs += 1;
            let seen = tx.get(Part::Tags, "k")?;
            if runs == 1 {
                // Sneak in a concurrent commit between our read and commit.
                let mut other = store.begin()?;
                other.insert(Part::Tags, "k", b"other".to_vec());
                other.commit()?;
            }
            tx.insert(Part::Tags, "k", b"mine".to_vec());
            Ok(seen)
        })?;
        assert_eq!(runs, 2);
        assert_eq!(value, Some(b"other".to_vec()));
        assert_eq!(store.get(Part::Tags, "k")?, Some(b"mine".to_vec()));
        Ok(())
    }

    #[test]
    fn gives_up_after_max_attempts() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let mut runs = 0;
        let result: Result<(), ApplyError> = apply_with_retry(&store, 4, |tx| {
            runs += 1;
            tx.insert(Part::Tags, "never", b"".to_vec());
            Err(UnitError::Retryable)
        });
        assert!(matches!(result, Err(ApplyError::Exhausted(4))));
        assert_eq!(runs, 4);
        assert!(store.get(Part::Tags, "never")?.is_none());
        Ok(())
    }

    #[test]
    fn fatal_errors_are_not_retried() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let mut runs = 0;
        let result: Result<(), ApplyError> = apply_with_retry(&store, 4, |_tx| {
            runs += 1;
            Err(anyhow!("unknown video").into())
        });
        assert!(matches!(result, Err(ApplyError::Fatal(_))));
        assert_eq!(runs, 1);
        Ok(())
    }

    #[test]
    fn concurrent_create_if_absent_creates_once() -> Result<()> {
        let (_dir, store) = temp_store()?;
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = vec![];
        for i in 0..4 {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                apply_with_retry(&store, 10, |tx| {
                    if tx.contains(Part::Rates, "video\0alice")? {
                        return Ok(false);
                    }
                    tx.insert(Part::Rates, "video\0alice", vec![i as u8]);
                    tx.add(Part::VideoCounters, "video\0likes", 1)?;
                    Ok(true)
                })
                .unwrap()
            }));
        }
        let created: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(created, 1);
        assert_eq!(store.counter(Part::VideoCounters, "video\0likes")?, 1);
        Ok(())
    }
}
