//! Bounded retry with a fixed (or growing) delay between attempts.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub delay: Duration,
    /// Multiplier applied to the delay after every failed attempt
    /// (1 keeps it fixed).
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
            backoff_factor: 1,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff_factor: 1,
        }
    }

    pub fn with_backoff(mut self, factor: u32) -> Self {
        self.backoff_factor = factor.max(1);
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_factor
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.delay.saturating_mul(factor)
    }
}

/// What a retried call ended with.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Attempts actually made.
    pub attempts: u32,
    /// Result of the last attempt.
    pub result: Result<T, E>,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `op` until it returns `Ok` or the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number. Errors from every attempt but
/// the last are logged and swallowed; the last one is returned in the
/// outcome.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    attempts: attempt,
                    result: Ok(value),
                }
            }
            Err(err) if attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    target_label = %label,
                    attempt,
                    error = %err,
                    "Attempt {attempt} failed for {label}"
                );
                info!("Retrying in {} seconds...", delay.as_secs());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(target_label = %label, attempt, error = %err, "Exceeded maximum retry attempts");
                return RetryOutcome {
                    attempts: attempt,
                    result: Err(err),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_is_three_attempts_five_seconds() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.delay_after(1), Duration::from_secs(5));
        assert_eq!(p.delay_after(2), Duration::from_secs(5));
    }

    #[test]
    fn backoff_grows_delay() {
        let p = RetryPolicy::fixed(4, Duration::from_millis(100)).with_backoff(2);
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = tokio::time::Instant::now();
        let outcome = retry(&RetryPolicy::default(), "op", move |attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err("not yet".to_string())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::fixed(2, Duration::from_secs(1));
        let outcome: RetryOutcome<(), String> =
            retry(&policy, "op", |_| async { Err("boom".to_string()) }).await;
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.succeeded());
        assert_eq!(outcome.result.unwrap_err(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        let outcome: RetryOutcome<u8, String> = retry(&policy, "op", |_| async { Ok(7) }).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.unwrap(), 7);
    }
}
