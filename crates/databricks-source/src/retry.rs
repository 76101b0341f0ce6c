//! Retry with exponential backoff for transient warehouse failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::SourceError;

/// Default number of attempts, including the first one
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
/// Upper bound on attempts, whatever the configuration asks for
pub const MAX_ATTEMPTS_CEILING: u32 = 5;
/// Default delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// How transient failures are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (1..=5)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Random extra delay as a fraction of the base delay (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` clamped to `1..=5`.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CEILING),
            initial_delay,
            ..Default::default()
        }
    }

    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Attempts this policy allows, held to `1..=5` even when `max_attempts`
    /// was set directly.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING)
    }

    /// Delay to wait after `failed_attempts` consecutive failures.
    ///
    /// Delays never decrease from one attempt to the next: jitter is capped
    /// at `multiplier - 1` so a jittered delay never exceeds the next base.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let multiplier = self.multiplier.max(1.0);
        let exponent = failed_attempts.min(30) as i32 - 1;
        let base = self.initial_delay.as_millis() as f64 * multiplier.powi(exponent);

        let jitter = self.jitter.clamp(0.0, multiplier - 1.0);
        let extra = if jitter > 0.0 {
            base * jitter * rand::rng().random_range(0.0..=1.0)
        } else {
            0.0
        };

        let millis = (base + extra).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned unchanged.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{what} succeeded after {attempt} attempts");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    "{what} failed (attempt {attempt}/{max_attempts}): {e}. Retrying in {delay:?}..."
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
