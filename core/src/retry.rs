//! Bounded retry with linear backoff for transient storage I/O.

use std::{fmt, future::Future, time::Duration};

use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }
}

/// Runs `operation` until it succeeds or the attempt budget is exhausted,
/// sleeping `attempt * base_delay` between attempts.
pub async fn with_retry<T, E, Fut, F>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.base_delay * attempt as u32;
                vault_logs::warn!(
                    "attempt {attempt}/{} of {operation_name} failed: {err}; \
                     retrying in {delay:?}",
                    policy.max_attempts
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                vault_logs::error!(
                    "{operation_name} failed after {attempt} attempts: {err}"
                );
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(RetryPolicy::default(), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient")
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_budget() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::default(), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("permanent")
        })
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
