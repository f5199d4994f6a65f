//! Failure governor for the outbound send path.
//!
//! Stops a client from hammering an unreachable or degraded endpoint, and stops failed
//! uploads from generating more telemetry about failed uploads.

use crate::{clock::elapsed, Clock};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Sends are allowed.
    Closed,
    /// Sends are skipped until the open duration has elapsed.
    Open,
}

/// Two-state circuit breaker.
///
/// Opens after `failure_threshold` consecutive failures. The transition back to closed is
/// evaluated lazily by [`CircuitBreaker::is_open`] once `open_duration` has elapsed; there is no
/// timer.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    failure_threshold: u32,
    open_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a closed breaker. A threshold of zero is treated as one.
    pub fn new(failure_threshold: u32, open_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        CircuitBreaker {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            failure_threshold: failure_threshold.max(1),
            open_duration,
            clock,
        }
    }

    /// Whether sends must be skipped right now.
    ///
    /// An open breaker whose open duration has elapsed closes here and resets its failure count.
    pub fn is_open(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or_else(|| self.clock.now());
                if elapsed(self.clock.now(), opened_at) >= self.open_duration {
                    self.close();
                    tracing::info!("telemetry circuit breaker closed after cooldown");
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Record an accepted send.
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == CircuitState::Open {
            self.close();
        }
    }

    /// Record a failed send.
    pub fn on_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.state == CircuitState::Closed && self.consecutive_failures >= self.failure_threshold
        {
            self.state = CircuitState::Open;
            self.opened_at = Some(self.clock.now());
            tracing::warn!(
                failures = self.consecutive_failures,
                open_for_ms = self.open_duration.as_millis() as u64,
                "telemetry circuit breaker opened"
            );
        }
    }

    /// Current state, without evaluating the cooldown.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failed sends since the last success or close.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }
}
