use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards calls to an unhealthy collaborator (the broker producer) so that a
// dead transport fails fast instead of stalling every write path.
//
// States:
// - Closed: calls pass through, consecutive failures are counted
// - Open: calls are rejected until the cool-down elapses
// - HalfOpen: calls pass through, enough successes close the circuit again
//
// The state lock is never held across the guarded call.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Cool-down before a half-open probe is allowed
    pub open_timeout: Duration,
    /// Half-open successes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    inner: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
        }
    }

    /// Run `operation` unless the circuit is open
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        // A poisoned breaker still holds consistent counters
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return true;
        }

        let cooled_down = inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.open_timeout)
            .unwrap_or(true);

        if cooled_down {
            tracing::info!(breaker = self.name, "Circuit breaker half-open, probing");
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
        }
        cooled_down
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        breaker = self.name,
                        successes = inner.success_count,
                        "Circuit breaker closed"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                tracing::warn!(
                    breaker = self.name,
                    failures = inner.failure_count,
                    "⚡ Circuit breaker opened"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = self.name, "Probe failed, circuit breaker reopened");
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, timeout: Duration, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: failures,
                open_timeout: timeout,
                success_threshold: successes,
            },
        )
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60), 1);

        for _ in 0..3 {
            let result = cb.call(async { Err::<(), _>("boom") }).await;
            assert!(matches!(result, Err(CircuitBreakerError::OperationFailed("boom"))));
        }

        assert_eq!(cb.state(), CircuitState::Open);
        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(2, Duration::from_secs(60), 1);

        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        let _ = cb.call(async { Ok::<_, &str>(()) }).await;
        let _ = cb.call(async { Err::<(), _>("boom") }).await;

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_successes() {
        let cb = breaker(1, Duration::from_millis(50), 2);

        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(50), 2);

        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = cb.call(async { Err::<(), _>("still down") }).await;

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(CircuitState::Open.as_gauge(), 1);
    }
}
