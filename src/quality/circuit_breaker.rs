//! Process-wide circuit breaker.
//!
//! Consecutive monitoring failures open the breaker; while open, every new
//! loop admission is rejected. The breaker half-resets itself after the
//! cooldown window elapses.

use std::sync::Mutex;
use std::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Default)]
struct BreakerState {
    is_open: bool,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_retry: Option<Instant>,
}

/// Snapshot of the breaker for observability.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub is_open: bool,
    pub failure_count: u32,
}

/// Failure-counting circuit breaker guarding loop admission.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            config,
        }
    }

    /// Record a monitoring failure. Returns true when this failure opened the
    /// breaker (transition, not steady state).
    pub fn record_failure(&self) -> bool {
        let mut state = self.lock();
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());

        if !state.is_open && state.failure_count >= self.config.failure_threshold {
            state.is_open = true;
            state.next_retry = Some(Instant::now() + self.config.cooldown);
            tracing::warn!(
                failure_count = state.failure_count,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opened"
            );
            return true;
        }
        false
    }

    /// Record a monitoring success, clearing the consecutive-failure count.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.failure_count = 0;
        if state.is_open {
            tracing::info!("Circuit breaker closed after success");
        }
        state.is_open = false;
        state.next_retry = None;
    }

    /// Check whether the breaker currently blocks admission. An open breaker
    /// whose cooldown has elapsed resets to closed.
    pub fn is_open(&self) -> bool {
        let mut state = self.lock();
        if state.is_open {
            if let Some(next_retry) = state.next_retry {
                if Instant::now() >= next_retry {
                    tracing::info!("Circuit breaker cooldown elapsed, closing");
                    state.is_open = false;
                    state.failure_count = 0;
                    state.next_retry = None;
                }
            }
        }
        state.is_open
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = BreakerState::default();
    }

    /// Current failure count and open flag.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        BreakerSnapshot {
            is_open: state.is_open,
            failure_count: state.failure_count,
        }
    }

    /// Configured failure threshold.
    pub fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold
    }

    /// Configured cooldown window.
    pub fn cooldown(&self) -> std::time::Duration {
        self.config.cooldown
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        // Mutex poisoning only matters if a holder panicked; recover the data
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
