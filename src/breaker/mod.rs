use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests pass through; failures increment the counter.
    Closed,
    /// Requests are blocked until the recovery timeout elapses.
    Open,
    /// A single probe request is allowed through to test recovery.
    HalfOpen,
}

impl BreakerState {
    /// Returns the canonical string form used in logs and the health response.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
}

/// Three-state gate that short-circuits store attempts during a sustained
/// outage.
///
/// `allow` is the only operation that advances time-based transitions, so
/// callers must invoke it before every attempt. A threshold of zero is a
/// valid degenerate configuration: the first failure opens the circuit.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    /// Creates a breaker that opens after `threshold` consecutive failures
    /// and probes recovery after `recovery_timeout`.
    pub fn new(threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_in_flight: 0,
            }),
            threshold,
            recovery_timeout,
        }
    }

    /// Returns whether a request should be attempted.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => true,

            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    info!("circuit breaker OPEN -> HALF_OPEN (recovery timeout elapsed)");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_in_flight = 0;
                    true
                } else {
                    false
                }
            }

            BreakerState::HalfOpen => {
                if inner.half_open_in_flight == 0 {
                    inner.half_open_in_flight = 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful request. Closes the circuit from HALF_OPEN.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        if inner.state == BreakerState::HalfOpen {
            info!("circuit breaker HALF_OPEN -> CLOSED (store recovered)");
            inner.state = BreakerState::Closed;
            inner.failure_count = 0;
            inner.half_open_in_flight = 0;
        }
    }

    /// Records a failed request, opening the circuit once the threshold of
    /// consecutive failures is reached.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();

        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        if inner.state == BreakerState::Closed && inner.failure_count >= self.threshold {
            warn!(
                failures = inner.failure_count,
                threshold = self.threshold,
                "circuit breaker CLOSED -> OPEN",
            );
            inner.state = BreakerState::Open;
        } else if inner.state == BreakerState::HalfOpen {
            warn!("circuit breaker HALF_OPEN -> OPEN (store still failing)");
            inner.state = BreakerState::Open;
            inner.half_open_in_flight = 0;
        }
    }

    /// Forces the breaker back to CLOSED with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!("circuit breaker manually reset to CLOSED");
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.half_open_in_flight = 0;
    }

    /// Returns the current state.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Returns the current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed_and_allows() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn test_zero_threshold_opens_on_first_failure() {
        let cb = CircuitBreaker::new(0, Duration::from_secs(30));
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn test_failure_count_is_monotonic_across_closed_successes() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 2);
        cb.record_failure();
        assert_eq!(cb.failure_count(), 3);
    }

    #[test]
    fn test_open_transitions_to_half_open_after_timeout() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(20));
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow());

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.allow());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_limits_in_flight_probes() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        // The transition call itself passes, one probe slot follows.
        assert!(cb.allow());
        assert!(cb.allow());
        assert!(!cb.allow());
        assert!(!cb.allow());
    }

    #[test]
    fn test_success_in_half_open_closes_circuit() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow());

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.allow());
    }

    #[test]
    fn test_failure_in_half_open_reopens_circuit() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow());

        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        // The fresh failure restarts the recovery window.
        assert!(!cb.allow());
    }

    #[test]
    fn test_open_stays_open_within_recovery_window() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.record_failure();
        for _ in 0..10 {
            assert!(!cb.allow());
        }
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn test_reset_forces_closed() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);

        cb.reset();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.allow());
    }

    #[test]
    fn test_state_strings() {
        assert_eq!(BreakerState::Closed.as_str(), "CLOSED");
        assert_eq!(BreakerState::Open.as_str(), "OPEN");
        assert_eq!(BreakerState::HalfOpen.as_str(), "HALF_OPEN");
    }
}
