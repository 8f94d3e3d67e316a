//! Deadline-bounded polling over an injectable clock.

use crate::clock::Clock;
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Call `poll` until it yields a value, the deadline passes, or `cancel` fires.
///
/// Polls at start, then every `interval`. The last sleep is shortened to land
/// on the deadline, and once the deadline is reached no further poll is made,
/// so a timeout is reported no earlier than `timeout` and no later than
/// `timeout + interval` after the call.
pub async fn wait_with_deadline<T, F, Fut>(
    clock: &dyn Clock,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut poll: F,
) -> Result<WaitOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = clock.now() + timeout;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }

        attempt += 1;
        if let Some(value) = poll().await? {
            tracing::debug!(attempt, "wait satisfied");
            return Ok(WaitOutcome::Ready(value));
        }

        let now = clock.now();
        if now >= deadline {
            tracing::debug!(attempt, "wait timed out");
            return Ok(WaitOutcome::TimedOut);
        }

        let remaining = (deadline - now).unsigned_abs();
        tokio::select! {
            _ = clock.sleep(interval.min(remaining)) => {}
            _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
        }

        if clock.now() >= deadline {
            tracing::debug!(attempt, "wait timed out");
            return Ok(WaitOutcome::TimedOut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;

    #[tokio::test]
    async fn immediate_ready_does_not_sleep() {
        let clock = ManualClock::at_epoch();
        let out = wait_with_deadline(
            &clock,
            Duration::from_secs(60),
            Duration::from_secs(10),
            &CancellationToken::new(),
            || async { Ok(Some(7)) },
        )
        .await
        .unwrap();
        assert_eq!(out, WaitOutcome::Ready(7));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn ready_after_a_few_polls() {
        let clock = ManualClock::at_epoch();
        let polls = Cell::new(0u32);
        let out = wait_with_deadline(
            &clock,
            Duration::from_secs(60),
            Duration::from_secs(10),
            &CancellationToken::new(),
            || {
                polls.set(polls.get() + 1);
                let n = polls.get();
                async move { Ok((n >= 3).then_some(n)) }
            },
        )
        .await
        .unwrap();
        assert_eq!(out, WaitOutcome::Ready(3));
        assert_eq!(clock.total_slept(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn timeout_lands_on_deadline() {
        let clock = ManualClock::at_epoch();
        let start = clock.now();
        let polls = Cell::new(0u32);
        let out: WaitOutcome<()> = wait_with_deadline(
            &clock,
            Duration::from_secs(25),
            Duration::from_secs(10),
            &CancellationToken::new(),
            || {
                polls.set(polls.get() + 1);
                async { Ok(None) }
            },
        )
        .await
        .unwrap();

        assert_eq!(out, WaitOutcome::TimedOut);
        let elapsed = (clock.now() - start).unsigned_abs();
        assert!(elapsed >= Duration::from_secs(25));
        assert!(elapsed <= Duration::from_secs(35));
        // polled at 0, 10, 20; never after the deadline
        assert_eq!(polls.get(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(5)
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let clock = ManualClock::at_epoch();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out: WaitOutcome<()> = wait_with_deadline(
            &clock,
            Duration::from_secs(60),
            Duration::from_secs(10),
            &cancel,
            || async { Ok(None) },
        )
        .await
        .unwrap();
        assert_eq!(out, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn poll_error_propagates() {
        let clock = ManualClock::at_epoch();
        let out: Result<WaitOutcome<()>> = wait_with_deadline(
            &clock,
            Duration::from_secs(60),
            Duration::from_secs(10),
            &CancellationToken::new(),
            || async { Err(anyhow::anyhow!("disk gone")) },
        )
        .await;
        assert!(out.is_err());
    }
}
