//! Primary-backend circuit breaker
//!
//! Counts consecutive primary failures and stops routing to the primary once
//! the count reaches the threshold.
//!
//! ```text
//! +--------+   N consecutive failures   +------+
//! | Closed | -------------------------> | Open |
//! +--------+                            +------+
//!     ^                                     |
//!     |  first availability check after     |
//!     |  reset_timeout (counter -> 0)       |
//!     +-------------------------------------+
//! ```
//!
//! There is no separate half-open state. The check that closes the circuit
//! lets the next call retry the primary; a failed retry is failure #1 of a
//! fresh window rather than an immediate reopen.
//!
//! # Thread Safety
//!
//! State lives in atomics. The open-to-closed transition is a
//! compare-exchange so concurrent checks reset the counter exactly once.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

const CLOSED: u32 = 0;
const OPEN: u32 = 1;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before the primary is tried again
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Circuit State
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Requests flow to the primary
    Closed,

    /// Requests bypass the primary
    Open,
}

/// Point-in-time view of the breaker for diagnostics
#[derive(Clone, Debug, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub times_opened: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub ms_since_last_failure: Option<u64>,
    pub ms_until_retry: Option<u64>,
    pub last_error: Option<String>,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,

    /// 0 = Closed, 1 = Open
    state: AtomicU32,

    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    times_opened: AtomicU64,

    /// Millis since startup; 0 means never
    opened_at_ms: AtomicU64,
    last_failure_ms: AtomicU64,

    last_error: Mutex<Option<String>>,

    startup_time: Instant,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU32::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
            opened_at_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            last_error: Mutex::new(None),
            startup_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether the primary may be attempted
    ///
    /// When the circuit has been open for at least `reset_timeout` this call
    /// closes it and clears the failure counter.
    pub fn is_available(&self) -> bool {
        if self.state.load(Ordering::Acquire) == CLOSED {
            return true;
        }

        if !self.reset_elapsed() {
            return false;
        }

        if self
            .state
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.consecutive_failures.store(0, Ordering::Release);
            tracing::info!(
                reset_timeout_secs = self.config.reset_timeout.as_secs(),
                "Circuit breaker reset - probing primary backend"
            );
        }

        true
    }

    /// Whether the circuit is currently open, without triggering a reset
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN && !self.reset_elapsed()
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            OPEN => CircuitState::Open,
            _ => CircuitState::Closed,
        }
    }

    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    pub fn record_failure(&self, reason: &str) {
        let now = self.now_millis();
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(now, Ordering::Release);
        *self.last_error.lock() = Some(reason.to_string());

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if failures >= self.config.failure_threshold
            && self
                .state
                .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.opened_at_ms.store(now, Ordering::Release);
            self.times_opened.fetch_add(1, Ordering::Relaxed);

            tracing::warn!(
                consecutive_failures = failures,
                reset_timeout_secs = self.config.reset_timeout.as_secs(),
                last_error = reason,
                "Circuit breaker opened - routing queries to fallback backend"
            );
        }
    }

    /// Force the circuit closed and clear the counter (admin/testing)
    pub fn reset(&self) {
        self.state.store(CLOSED, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.now_millis();
        let state = self.state();

        let last_failure = self.last_failure_ms.load(Ordering::Acquire);
        let ms_until_retry = (state == CircuitState::Open).then(|| {
            let opened = self.opened_at_ms.load(Ordering::Acquire);
            let reset_ms = self.config.reset_timeout.as_millis() as u64;
            (opened + reset_ms).saturating_sub(now)
        });

        BreakerSnapshot {
            state,
            consecutive_failures: self.consecutive_failures(),
            failure_threshold: self.config.failure_threshold,
            reset_timeout_secs: self.config.reset_timeout.as_secs(),
            times_opened: self.times_opened.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            ms_since_last_failure: (last_failure != 0).then(|| now.saturating_sub(last_failure)),
            ms_until_retry,
            last_error: self.last_error.lock().clone(),
        }
    }

    fn reset_elapsed(&self) -> bool {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        let reset_ms = self.config.reset_timeout.as_millis() as u64;
        self.now_millis().saturating_sub(opened) >= reset_ms
    }

    /// Millis since startup, offset by one so zero can mean "never"
    fn now_millis(&self) -> u64 {
        self.startup_time.elapsed().as_millis() as u64 + 1
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
