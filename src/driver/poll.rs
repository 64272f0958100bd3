// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{future::Future, time::Duration};

use tokio::time::{sleep, timeout};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> PollPolicy {
        PollPolicy {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
    TimedOut,
    Failed(E),
}

/// Fetch a value every `interval`, starting one interval from now, until
/// `ready` accepts it. Fetch errors end the poll immediately.
pub async fn poll_until<T, E, F, Fut, P>(
    policy: PollPolicy,
    mut fetch: F,
    ready: P,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let attempts = async {
        let mut attempt = 0u64;
        loop {
            sleep(policy.interval).await;
            attempt += 1;
            match fetch().await {
                Ok(value) if ready(&value) => return Ok(value),
                Ok(_) => (),
                Err(err) => return Err(PollError::Failed(err)),
            }
            trace!("Poll attempt {} not ready yet", attempt);
        }
    };
    timeout(policy.timeout, attempts)
        .await
        .unwrap_or(Err(PollError::TimedOut))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ready_after_some_attempts() {
        let calls = Cell::new(0);
        let start = Instant::now();
        let result: Result<u32, PollError<()>> = poll_until(
            PollPolicy::default(),
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { Ok(n) }
            },
            |n| *n == 3,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let result: Result<(), PollError<()>> =
            poll_until(PollPolicy::default(), || async { Ok(()) }, |_| false).await;
        assert_eq!(result, Err(PollError::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_stops_polling() {
        let calls = Cell::new(0);
        let result: Result<(), PollError<&str>> = poll_until(
            PollPolicy::default(),
            || {
                calls.set(calls.get() + 1);
                async { Err("gone") }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Err(PollError::Failed("gone")));
        assert_eq!(calls.get(), 1);
    }
}
