//! Generic retry with exponential backoff.
//!
//! The helper knows nothing about HTTP or scraping; the operation and the
//! set of error kinds worth retrying are supplied by the caller.

use crate::error::{ErrorKind, Result};
use log::{error, warn};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Backoff schedule for [`retry_with`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor,
        }
    }
}

/// Random-ish jitter in milliseconds within [0, range).
///
/// Uses high-resolution timing to generate pseudo-random jitter for
/// retry delays, request pacing and proxy picks.
pub(crate) fn jitter_ms(range: u64) -> u64 {
    if range == 0 {
        return 0;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_nanos(0));
    let nanos = now.subsec_nanos() as u64;
    let micros = (now.as_micros() & 0xFFFF) as u64;
    (nanos ^ (micros << 5)) % range
}

/// Jitter within [0.1, 0.3) of the running delay.
fn jitter_for(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    let span = (ms / 5).max(1); // 0.3d - 0.1d
    Duration::from_millis(ms / 10 + jitter_ms(span))
}

/// Call `op` until it succeeds or the policy is exhausted.
///
/// Errors whose kind is not in `retryable` propagate immediately. Each
/// wait is the running delay plus jitter; the running delay is then
/// multiplied by the backoff factor. Once `max_retries` retries have
/// failed, the last error is returned unchanged so the caller can still
/// tell the root cause apart.
pub fn retry_with<T, F>(policy: RetryPolicy, retryable: &[ErrorKind], mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut retries = 0u32;
    let mut delay = policy.initial_delay;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !retryable.contains(&err.kind()) {
                    return Err(err);
                }
                retries += 1;
                if retries > policy.max_retries {
                    error!("max retries ({}) exceeded: {err}", policy.max_retries);
                    return Err(err);
                }
                warn!("retry {retries}/{} after error: {err}", policy.max_retries);
                std::thread::sleep(delay + jitter_for(delay));
                delay = delay.mul_f64(policy.backoff_factor);
            }
        }
    }
}
