// =============================================================================
// circuit_breaker.rs — KNOWING WHEN TO STOP KNOCKING
// =============================================================================
//
// Government portals go down. When the eCourts servers start timing out
// on every request, hammering them harder does not bring them back; it
// just burns our retry budget and gets our IP remembered.
//
// The breaker counts consecutive transport failures. Past the threshold it
// opens and every portal call fails fast with a circuit-open Network error.
// After the reset timeout one probe is let through (half-open). Enough
// probe successes close it again; a probe failure re-opens it.
//
// Only transport trouble counts. A CAPTCHA or an expired session means the
// portal is up and talking to us, just not in the way we hoped.
// =============================================================================

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    /// Requests flow.
    Closed,
    /// Requests are refused until the reset timeout passes.
    Open,
    /// Probing whether the portal is back.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    total_trips: u64,
}

/// Thread-safe circuit breaker guarding one upstream.
pub struct CircuitBreaker {
    name: String,
    inner: RwLock<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        let name = name.into();
        info!(
            name = %name,
            failure_threshold,
            reset_timeout_secs = reset_timeout.as_secs(),
            success_threshold,
            "Circuit breaker armed"
        );

        Self {
            name,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                total_trips: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            success_threshold: success_threshold.max(1),
        }
    }

    /// Whether a request may go out now. Moves OPEN → HALF_OPEN once the
    /// reset timeout has passed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or(self.reset_timeout);
                if elapsed >= self.reset_timeout {
                    info!(name = %self.name, "Circuit breaker OPEN -> HALF_OPEN, probing the portal");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    let remaining = self.reset_timeout - elapsed;
                    warn!(
                        name = %self.name,
                        remaining_ms = remaining.as_millis() as u64,
                        "Circuit breaker OPEN, request refused"
                    );
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    info!(name = %self.name, "Circuit breaker HALF_OPEN -> CLOSED, portal is back");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            // A request that was already in flight when we tripped.
            CircuitState::Open => {}
        }
    }

    /// Record a transport failure. Returns `true` if this failure tripped
    /// the breaker.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    warn!(
                        name = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker TRIPPED, CLOSED -> OPEN"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.total_trips += 1;
                    true
                } else {
                    warn!(
                        name = %self.name,
                        failures = inner.failure_count,
                        threshold = self.failure_threshold,
                        "Portal failure recorded"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                warn!(name = %self.name, "Probe failed, HALF_OPEN -> OPEN");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.total_trips += 1;
                true
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                false
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.read();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_trips: inner.total_trips,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_trips: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::new("portal", 3, Duration::from_secs(5), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_trips_after_threshold_failures() {
        let cb = CircuitBreaker::new("portal", 3, Duration::from_secs(5), 1);
        assert!(!cb.record_failure());
        assert!(!cb.record_failure());
        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
        assert_eq!(cb.snapshot().total_trips, 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("portal", 3, Duration::from_secs(5), 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_closes_or_reopens() {
        let cb = CircuitBreaker::new("portal", 1, Duration::from_millis(0), 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert!(cb.allow_request());
        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
