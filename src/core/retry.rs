//! Retry utility for transient broker errors
//!
//! Used by the consumer lifecycle to reconnect on start; the consumers
//! themselves never retry.

use serde::Deserialize;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Configurable retry policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    #[serde(rename = "delay_ms", with = "millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A single attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Execute a blocking operation with retry logic
///
/// `keep_going` is consulted before every retry and while waiting between
/// attempts; once it returns false the last error is returned immediately.
///
/// # Examples
/// ```rust
/// use clickstream_gateway::core::retry::{retry_blocking, RetryPolicy};
///
/// let mut calls = 0;
/// let result = retry_blocking("connect", &RetryPolicy::default(), || true, || {
///     calls += 1;
///     if calls < 2 { Err("refused") } else { Ok(calls) }
/// });
/// assert_eq!(result, Ok(2));
/// ```
pub fn retry_blocking<T, E, K, F>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut keep_going: K,
    mut operation: F,
) -> Result<T, E>
where
    K: FnMut() -> bool,
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match operation() {
            Ok(result) => return Ok(result),
            Err(error) => error,
        };

        if attempt >= max_attempts {
            return Err(error);
        }
        log::warn!(
            "Operation '{}' failed on attempt {}/{}, retrying in {:?}: {}",
            operation_name,
            attempt,
            max_attempts,
            policy.delay,
            error
        );
        if !wait_unless_cancelled(policy.delay, &mut keep_going) {
            log::debug!("Operation '{}' retry abandoned", operation_name);
            return Err(error);
        }
        attempt += 1;
    }
}

fn wait_unless_cancelled<K: FnMut() -> bool>(delay: Duration, keep_going: &mut K) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if !keep_going() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
