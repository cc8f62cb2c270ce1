//! Circuit breaker for market-data providers.
//!
//! Stops routing traffic to a provider that keeps failing, then retries it
//! with a single trial call once the cool-down has elapsed.
//!
//! # States
//!
//! ```text
//! ┌─────────┐   failure_threshold      ┌────────┐
//! │ CLOSED  │ ────────────────────────▶│  OPEN  │
//! │(normal) │   consecutive failures   │(skipped)│
//! └─────────┘                          └────────┘
//!      ▲                                   │
//!      │  trial succeeds                   │ cooldown elapsed
//!      │                                   ▼
//!      │                            ┌───────────┐
//!      └────────────────────────────│ HALF_OPEN │──── trial fails ──▶ OPEN
//!                                   │(one trial)│
//!                                   └───────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::with_name("fmp"));
//!
//! if breaker.try_acquire() {
//!     match provider.fetch_batch(&symbols, range).await {
//!         Ok(result) => breaker.record_success(),
//!         Err(_) => breaker.record_failure(),
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tickwise_common::CircuitBreakerSettings;

// ============================================================================
// Circuit Breaker State
// ============================================================================

/// Current state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Tripped - provider skipped until the cool-down elapses
    Open,
    /// Cool-down elapsed - exactly one trial call allowed
    HalfOpen,
}

impl CircuitState {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to keep the circuit open before a trial call
    pub cooldown: Duration,
    /// Name for logging purposes
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            name: "default".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build from the shared settings section
    pub fn from_settings(name: impl Into<String>, settings: &CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: Duration::from_secs(settings.cooldown_secs),
        }
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the cool-down window
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

// ============================================================================
// Circuit Breaker Implementation
// ============================================================================

/// Circuit breaker guarding one provider.
///
/// Lock-free: state, counters and the open timestamp are atomics, and the
/// half-open trial slot is claimed with a compare-exchange.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    /// Consecutive failure count
    failure_count: AtomicU32,
    /// Current state (stored as u32 for atomic access)
    state: AtomicU32,
    /// Millis since `epoch` when the circuit opened
    opened_at_ms: AtomicU64,
    /// Set while the single half-open trial call is outstanding
    trial_in_flight: AtomicBool,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            failure_count: AtomicU32::new(0),
            state: AtomicU32::new(CircuitState::Closed as u32),
            opened_at_ms: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    /// Create a circuit breaker with default configuration and a name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new(CircuitBreakerConfig::with_name(name))
    }

    /// Name used in logs
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state, promoting Open to HalfOpen once the cool-down elapsed
    pub fn state(&self) -> CircuitState {
        let state = CircuitState::from_u32(self.state.load(Ordering::Acquire));
        if state == CircuitState::Open && self.cooldown_elapsed() {
            self.transition_to_half_open();
            return CircuitState::from_u32(self.state.load(Ordering::Acquire));
        }
        state
    }

    /// Whether the provider should be skipped by selection
    pub fn is_open(&self) -> bool {
        match self.state() {
            CircuitState::Open => true,
            CircuitState::HalfOpen => self.trial_in_flight.load(Ordering::Acquire),
            CircuitState::Closed => false,
        }
    }

    /// Claim permission for one call.
    ///
    /// Always granted while closed; granted to exactly one caller while
    /// half-open; never granted while open.
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self
                .trial_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    /// Give back a permit that was never used for a call.
    ///
    /// Frees the half-open trial slot when the caller bailed out before
    /// reaching the provider (quota or budget refusal).
    pub fn release(&self) {
        if CircuitState::from_u32(self.state.load(Ordering::Acquire)) == CircuitState::HalfOpen {
            self.trial_in_flight.store(false, Ordering::Release);
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let state = CircuitState::from_u32(self.state.load(Ordering::Acquire));
        match state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => self.close_circuit(),
            CircuitState::Open => {}
        }

        tracing::trace!(circuit = %self.config.name, state = ?state, "Circuit breaker recorded success");
    }

    /// Record a failed call (errors and timeouts alike)
    pub fn record_failure(&self) {
        let state = CircuitState::from_u32(self.state.load(Ordering::Acquire));
        match state {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if count >= self.config.failure_threshold {
                    self.open_circuit();
                }
            }
            CircuitState::HalfOpen => {
                // The trial failed: back to open for another cool-down
                self.open_circuit();
            }
            CircuitState::Open => {}
        }

        tracing::trace!(
            circuit = %self.config.name,
            state = ?state,
            failure_count = self.failure_count.load(Ordering::Relaxed),
            "Circuit breaker recorded failure"
        );
    }

    /// Statistics snapshot for reporting
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            failure_threshold: self.config.failure_threshold,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        self.close_circuit();
        tracing::info!(circuit = %self.config.name, "Circuit breaker manually reset");
    }

    // ========================================================================
    // Private Methods
    // ========================================================================

    fn now_ms(&self) -> u64 {
        // +1 keeps 0 free as the "never opened" sentinel
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        opened_at > 0
            && self.now_ms().saturating_sub(opened_at) >= self.config.cooldown.as_millis() as u64
    }

    fn open_circuit(&self) {
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        self.state.store(CircuitState::Open as u32, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        tracing::warn!(
            circuit = %self.config.name,
            failure_count = self.failure_count.load(Ordering::Relaxed),
            cooldown_secs = self.config.cooldown.as_secs(),
            "Circuit breaker OPENED"
        );
    }

    fn transition_to_half_open(&self) {
        if self
            .state
            .compare_exchange(
                CircuitState::Open as u32,
                CircuitState::HalfOpen as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.trial_in_flight.store(false, Ordering::Release);
            tracing::info!(circuit = %self.config.name, "Circuit breaker transitioning to HALF_OPEN");
        }
    }

    fn close_circuit(&self) {
        self.state.store(CircuitState::Closed as u32, Ordering::Release);
        self.failure_count.store(0, Ordering::Relaxed);
        self.opened_at_ms.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        tracing::info!(circuit = %self.config.name, "Circuit breaker CLOSED");
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Statistics about a circuit breaker's current state
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    /// Name of the circuit breaker
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Current consecutive failure count
    pub failure_count: u32,
    /// Failure threshold to open circuit
    pub failure_threshold: u32,
}

// ============================================================================
// Tests
// ============================================================================
