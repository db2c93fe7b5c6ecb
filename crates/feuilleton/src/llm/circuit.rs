//! Per-endpoint circuit breaker.
//!
//! Trips after N consecutive failures and holds open for a cool-down window.
//! Process-wide: clients share one breaker per endpoint via `Arc`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug)]
struct EndpointState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Fail fast when the endpoint's circuit is open.
    pub fn check(&self, endpoint: &str) -> Result<()> {
        let mut endpoints = self.endpoints.lock();
        if let Some(state) = endpoints.get_mut(endpoint) {
            if let Some(open_until) = state.open_until {
                if Instant::now() < open_until {
                    return Err(Error::CircuitOpen {
                        endpoint: endpoint.to_string(),
                    });
                }
                // Cool-down elapsed: half-open, allow one probe through.
                state.open_until = None;
                state.consecutive_failures = self.failure_threshold.saturating_sub(1);
            }
        }
        Ok(())
    }

    pub fn record_success(&self, endpoint: &str) {
        let mut endpoints = self.endpoints.lock();
        if let Some(state) = endpoints.get_mut(endpoint) {
            state.consecutive_failures = 0;
            state.open_until = None;
        }
    }

    pub fn record_failure(&self, endpoint: &str) {
        let mut endpoints = self.endpoints.lock();
        let state = endpoints
            .entry(endpoint.to_string())
            .or_insert(EndpointState {
                consecutive_failures: 0,
                open_until: None,
            });
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            tracing::warn!(
                endpoint,
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit opened"
            );
        }
    }

    #[must_use]
    pub fn is_open(&self, endpoint: &str) -> bool {
        self.check(endpoint).is_err()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(10));
        for _ in 0..2 {
            breaker.record_failure("chat");
        }
        assert!(!breaker.is_open("chat"));
        breaker.record_failure("chat");
        assert!(breaker.is_open("chat"));

        std::thread::sleep(Duration::from_millis(15));
        // Half-open: one probe allowed.
        assert!(breaker.check("chat").is_ok());
        breaker.record_success("chat");
        assert!(!breaker.is_open("chat"));
    }

    #[test]
    fn half_open_probe_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(10));
        breaker.record_failure("chat");
        breaker.record_failure("chat");
        assert!(breaker.is_open("chat"));

        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.check("chat").is_ok());
        breaker.record_failure("chat");
        assert!(breaker.is_open("chat"));
    }

    #[test]
    fn endpoints_are_independent() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("chat");
        assert!(breaker.is_open("chat"));
        assert!(!breaker.is_open("embeddings"));
    }
}
