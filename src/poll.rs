// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Quick-and-dirty polling within a timeout.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Result of one check of a condition that we're polling for.
#[derive(Debug)]
pub enum CondCheckError<E> {
    /// The condition is not true yet; keep polling.
    NotYet,
    /// The condition check failed in a way that will not get better.
    Failed(E),
}

impl<E> From<E> for CondCheckError<E> {
    fn from(err: E) -> Self {
        CondCheckError::Failed(err)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error<E: std::error::Error> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    PermanentError(E),
}

/// Polls `cond` every `poll_interval` until it returns `Ok` or a permanent
/// error, or until `poll_max` has elapsed.
pub async fn wait_for_condition<T, E, Func, Fut>(
    mut cond: Func,
    poll_interval: &Duration,
    poll_max: &Duration,
) -> Result<T, Error<E>>
where
    E: std::error::Error,
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CondCheckError<E>>>,
{
    let poll_start = Instant::now();
    loop {
        let elapsed = poll_start.elapsed();
        if elapsed > *poll_max {
            return Err(Error::TimedOut(elapsed));
        }
        match cond().await {
            Ok(result) => return Ok(result),
            Err(CondCheckError::NotYet) => (),
            Err(CondCheckError::Failed(err)) => {
                return Err(Error::PermanentError(err));
            }
        }
        tokio::time::sleep(*poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[tokio::test]
    async fn succeeds_once_condition_holds() {
        let count = AtomicUsize::new(0);
        let result = wait_for_condition(
            || async {
                if count.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(CondCheckError::<Boom>::NotYet)
                } else {
                    Ok(count.load(Ordering::SeqCst))
                }
            },
            &Duration::from_millis(1),
            &Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn permanent_error_stops_polling() {
        let result: Result<(), _> = wait_for_condition(
            || async { Err(CondCheckError::Failed(Boom)) },
            &Duration::from_millis(1),
            &Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(Error::PermanentError(Boom))));
    }

    #[tokio::test]
    async fn times_out() {
        let result: Result<(), Error<Boom>> = wait_for_condition(
            || async { Err(CondCheckError::NotYet) },
            &Duration::from_millis(1),
            &Duration::from_millis(10),
        )
        .await;
        assert!(matches!(result, Err(Error::TimedOut(_))));
    }
}
