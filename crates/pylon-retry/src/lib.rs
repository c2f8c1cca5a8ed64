//! Generic async retry with structured attempt logging.
//!
//! Mirrors the source's `async_retry` decorator: re-run a failing async
//! operation up to `retries` times with a fixed delay between attempts,
//! logging each failure at `warn` and the final exhaustion at `error`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Retries `make_attempt` up to `retries` times (1-indexed in logs), sleeping
/// `delay` between attempts.
///
/// `label` identifies the operation in log output — pass something stable
/// like a function or workflow name, not per-call data.
///
/// # Errors
///
/// Returns the last error produced by `make_attempt` once all attempts are
/// exhausted.
pub async fn retry<F, Fut, T, E>(
    label: &str,
    retries: u32,
    delay: Duration,
    mut make_attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let attempts = retries.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match make_attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < attempts {
                    tracing::warn!(operation = label, attempt, attempts, error = %err, "attempt failed, retrying");
                } else {
                    tracing::error!(operation = label, attempts, error = %err, "all attempts exhausted");
                }
                last_err = Some(err);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    // Reachable only because `attempts >= 1` guarantees the loop ran at
    // least once, so `last_err` is always populated on this path.
    #[allow(clippy::expect_used)]
    Err(last_err.expect("at least one attempt always runs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try_without_sleeping() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry("op", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry("op", 5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry("op", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still broken") }
        })
        .await;
        assert_eq!(result, Err("still broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_still_attempts_once() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry("op", 0, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;
        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
