/*!
 * # Circuit Breaker
 *
 * Guards calls to the fulfillment vendor so a struggling upstream is not
 * hammered by every pipeline invocation. The balance lookup runs through
 * one of these; an open circuit is reported as "balance unknown".
 */

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub timeout: Duration,
    /// Number of successful requests needed in HalfOpen to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Service call failed: {0}")]
    ServiceFailure(E),
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
        }
    }

    /// Runs the future produced by `f` with circuit breaker protection.
    pub async fn call<F, Fut, R, E>(&self, f: F) -> Result<R, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        if !self.can_execute() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match f().await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitBreakerError::ServiceFailure(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn can_execute(&self) -> bool {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match state.last_failure_time {
                Some(last_failure) if last_failure.elapsed() >= self.config.timeout => {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    true
                }
                _ => false,
            },
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.last_failure_time = None;
                }
            }
            CircuitState::Open => {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.success_count = 0;
                state.last_failure_time = None;
            }
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();

        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = self.name,
                        failures = state.failure_count,
                        "Circuit breaker opened"
                    );
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = self.name, "Circuit breaker re-opened from half-open");
                state.state = CircuitState::Open;
                state.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout,
                success_threshold: 1,
            },
        )
    }

    #[tokio::test]
    async fn stays_closed_on_success() {
        let cb = breaker(3, Duration::from_millis(100));
        let result = cb.call(|| async { Ok::<i32, &str>(42) }).await;
        assert_matches!(result, Ok(42));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects() {
        let cb = breaker(2, Duration::from_secs(60));

        let _ = cb.call(|| async { Err::<i32, &str>("boom") }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        let _ = cb.call(|| async { Err::<i32, &str>("boom") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.call(|| async { Ok::<i32, &str>(1) }).await;
        assert_matches!(result, Err(CircuitBreakerError::CircuitOpen));
    }

    #[tokio::test]
    async fn half_open_probe_closes_circuit() {
        let cb = breaker(1, Duration::from_millis(10));
        let _ = cb.call(|| async { Err::<i32, &str>("boom") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = cb.call(|| async { Ok::<i32, &str>(7) }).await;
        assert_matches!(result, Ok(7));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn inner_error_is_preserved() {
        let cb = breaker(5, Duration::from_secs(1));
        let result = cb.call(|| async { Err::<(), _>("vendor said no") }).await;
        assert_matches!(result, Err(CircuitBreakerError::ServiceFailure("vendor said no")));
    }
}
