use std::time::{Duration, Instant};

use aria_core::error::ModelError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-provider failure isolation.
///
/// CLOSED counts consecutive transient failures; at the threshold it opens.
/// While OPEN every acquisition fails immediately. After the cooldown the
/// breaker half-opens and admits exactly one probe at a time: a successful
/// probe closes it, a failed probe re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            provider: provider.into(),
            threshold,
            cooldown,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    pub fn with_defaults(provider: impl Into<String>) -> Self {
        Self::new(provider, DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }

    pub fn state(&mut self) -> BreakerState {
        self.promote_if_cooled();
        self.state
    }

    /// Gate one request. In HALF_OPEN only a single probe is admitted.
    pub fn try_acquire(&mut self) -> Result<(), ModelError> {
        self.promote_if_cooled();
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(ModelError::BreakerOpen {
                provider: self.provider.clone(),
            }),
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    Err(ModelError::BreakerOpen {
                        provider: self.provider.clone(),
                    })
                } else {
                    self.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Closed;
            self.opened_at = None;
        }
    }

    /// Record one transient failure. Non-transient model errors do not come
    /// through here; they say nothing about provider health.
    pub fn record_failure(&mut self) {
        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
                self.probe_in_flight = false;
            }
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                    self.consecutive_failures = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn promote_if_cooled(&mut self) {
        if self.state == BreakerState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= self.cooldown {
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = false;
                }
            }
        }
    }

    pub fn status(&mut self) -> serde_json::Value {
        let state = self.state();
        serde_json::json!({
            "provider": self.provider,
            "state": match state {
                BreakerState::Closed => "CLOSED",
                BreakerState::Open => "OPEN",
                BreakerState::HalfOpen => "HALF_OPEN",
            },
            "consecutive_failures": self.consecutive_failures,
        })
    }
}
