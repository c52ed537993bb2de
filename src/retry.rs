//! Fixed-delay retry policy shared by the installer and the readiness poller.
//!
//! Helm operations and readiness checks both loop a bounded number of times
//! with a constant pause between attempts. The bounds live here so both are
//! tunable, and so tests can run them with no delay at all.
//!
//! # Example
//!
//! ```ignore
//! use ouctl::retry::{retry_with_policy, RetryPolicy};
//!
//! let result = retry_with_policy(
//!     &RetryPolicy::installer(),
//!     "helm upgrade orchestra",
//!     || async { engine.upgrade(&request).await },
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// Attempts made by the installer before giving up
pub const INSTALL_MAX_ATTEMPTS: u32 = 6;
/// Pause between installer attempts
pub const INSTALL_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Polls made by the readiness poller before timing out
pub const READINESS_MAX_ATTEMPTS: u32 = 200;
/// Pause between readiness polls
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded, fixed-delay retry configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least one attempt is always made)
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with explicit bounds
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Policy for helm install/upgrade: 6 attempts, 5s apart
    pub fn installer() -> Self {
        Self::new(INSTALL_MAX_ATTEMPTS, INSTALL_RETRY_DELAY)
    }

    /// Policy for readiness polling: 200 polls, 1s apart
    pub fn readiness() -> Self {
        Self::new(READINESS_MAX_ATTEMPTS, READINESS_POLL_INTERVAL)
    }

    /// Policy with no delay, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sleep for the configured delay
    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Run an async operation until it succeeds or the policy is exhausted.
///
/// Returns the last error once `max_attempts` have failed. There is no hook
/// between attempts; callers that need cleanup (failed installs) drive the
/// loop themselves with [`RetryPolicy::has_next`] and [`RetryPolicy::pause`].
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, (u32, E)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !policy.has_next(attempt) {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after max attempts"
                    );
                    return Err((attempt, e));
                }

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = policy.delay.as_millis(),
                    "Operation failed, retrying"
                );
                policy.pause().await;
            }
        }
    }
}
