use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff
// ============================================================================
//
// Used for startup connections (Postgres, Redis) and for the delay between
// consumer restarts. Delays grow by `multiplier` and are capped at
// `max_delay`.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Startup connections: containers may still be booting
    pub fn startup() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Run `operation` until it succeeds or `max_attempts` is reached.
/// The last error is returned on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(
    what: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if attempt >= config.max_attempts => {
                tracing::error!(what, attempt, error = %error, "Giving up after all attempts");
                return Err(error);
            }
            Err(error) => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
