//! Exponential-backoff retry for transient transport failures, shared by
//! every device driver's `connect`/`execute` path and by the fleet
//! fan-out dispatcher.
//!
//! Only errors for which [`FleetConfError::is_retryable`] returns `true` are
//! retried; anything else (protocol errors, validation errors, cancellation)
//! propagates on the first attempt.

use crate::error::FleetConfError;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for a retried operation: attempt budget plus the
/// exponential min/max wait bounds, doubling from `min_wait` and capped at
/// `max_wait`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts,
            min_wait,
            max_wait,
        }
    }

    /// Five attempts, 1s base capped at 10s: the connect-phase policy.
    pub const fn connect() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Three attempts, 1s base capped at 10s: the command-execution policy.
    pub const fn command() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(10))
    }

    fn wait_for_attempt(&self, attempt: u32) -> Duration {
        let scale = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let wait = self.min_wait.saturating_mul(scale);
        std::cmp::min(wait, self.max_wait)
    }
}

/// Runs `operation` under `policy`, retrying on any [`FleetConfError`] for
/// which `is_retryable()` is true, up to `max_attempts` total tries.
/// Non-retryable errors and the final attempt's error are both returned
/// immediately. `what` is used only for the warning log line emitted before
/// each sleep.
pub fn with_retry<F, T>(policy: RetryPolicy, what: &str, mut operation: F) -> Result<T, FleetConfError>
where
    F: FnMut() -> Result<T, FleetConfError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !err.is_retryable() {
                    return Err(err);
                }
                let wait = policy.wait_for_attempt(attempt - 1);
                warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying after backoff",
                );
                std::thread::sleep(wait);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn succeeds_without_retry() {
        let result: Result<i32, FleetConfError> =
            with_retry(RetryPolicy::command(), "noop", || Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn retries_retryable_error_then_succeeds() {
        let attempts = RefCell::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(2));
        let result = with_retry(policy, "flaky", || {
            let mut count = attempts.borrow_mut();
            *count += 1;
            if *count < 3 {
                Err(FleetConfError::ConnectionError("reset".into()))
            } else {
                Ok(*count)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let attempts = RefCell::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let result: Result<(), FleetConfError> = with_retry(policy, "always-fails", || {
            *attempts.borrow_mut() += 1;
            Err(FleetConfError::ConnectionError("reset".into()))
        });
        assert!(result.is_err());
        assert_eq!(*attempts.borrow(), 3);
    }

    #[test]
    fn never_retries_non_retryable_error() {
        let attempts = RefCell::new(0);
        let result: Result<(), FleetConfError> =
            with_retry(RetryPolicy::command(), "validation", || {
                *attempts.borrow_mut() += 1;
                Err(FleetConfError::ValidationError(vec!["bad vlan".into()]))
            });
        assert!(result.is_err());
        assert_eq!(*attempts.borrow(), 1);
    }
}
