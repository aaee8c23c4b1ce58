//! Per-domain request pacing.
//!
//! Keeps a minimum spacing between requests to the same domain, plus a
//! randomized humanizing delay, so scrape workers do not hammer a host
//! even when many of them run concurrently.

use crate::config::PacingSettings;
use crate::retry::jitter_ms;
use crate::urls;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub struct Pacer {
    rate_limit: Duration,
    min_delay: Duration,
    max_delay: Duration,
    last_access: Mutex<HashMap<String, Instant>>,
}

impl Pacer {
    pub fn new(settings: &PacingSettings) -> Self {
        Self::with_limits(
            Duration::from_secs(settings.rate_limit_secs),
            Duration::from_secs(settings.min_delay_secs),
            Duration::from_secs(settings.max_delay_secs),
        )
    }

    pub fn with_limits(rate_limit: Duration, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            rate_limit,
            min_delay,
            max_delay,
            last_access: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.last_access.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until it is polite to hit `url`'s domain again, then stamp
    /// the domain as accessed.
    pub fn pre_request(&self, url: &str) {
        let domain = urls::domain(url).into_string();

        let wait = {
            let last_access = self.lock();
            last_access
                .get(&domain)
                .and_then(|last| self.rate_limit.checked_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            info!("rate limiting {domain}, sleeping for {:.2}s", wait.as_secs_f64());
            std::thread::sleep(wait);
        }

        let delay = self.humanizing_delay();
        if !delay.is_zero() {
            debug!("random delay for {domain}: {:.2}s", delay.as_secs_f64());
            std::thread::sleep(delay);
        }

        self.lock().insert(domain, Instant::now());
    }

    /// Delay in [min_delay, max_delay).
    fn humanizing_delay(&self) -> Duration {
        let span = self
            .max_delay
            .saturating_sub(self.min_delay)
            .as_millis() as u64;
        self.min_delay + Duration::from_millis(jitter_ms(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_is_not_delayed_by_rate_limit() {
        let pacer = Pacer::with_limits(
            Duration::from_millis(200),
            Duration::ZERO,
            Duration::ZERO,
        );
        let start = Instant::now();
        pacer.pre_request("https://example.com/a");
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn second_request_to_same_domain_waits_out_the_limit() {
        let pacer = Pacer::with_limits(
            Duration::from_millis(150),
            Duration::ZERO,
            Duration::ZERO,
        );
        pacer.pre_request("https://example.com/a");
        let start = Instant::now();
        pacer.pre_request("https://example.com/b");
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn different_domains_do_not_block_each_other() {
        let pacer = Pacer::with_limits(
            Duration::from_millis(500),
            Duration::ZERO,
            Duration::ZERO,
        );
        pacer.pre_request("https://example.com/a");
        let start = Instant::now();
        pacer.pre_request("https://other.net/b");
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn humanizing_delay_stays_in_range() {
        let pacer = Pacer::with_limits(
            Duration::ZERO,
            Duration::from_millis(10),
            Duration::from_millis(30),
        );
        for _ in 0..50 {
            let delay = pacer.humanizing_delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay < Duration::from_millis(30));
        }
    }
}
