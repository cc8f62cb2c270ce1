//! Per-provider call quotas.
//!
//! Each provider has a per-minute and a per-day call allowance. `acquire`
//! waits for per-minute headroom (never longer than the rest of the current
//! minute window) and fails fast once the day's allowance is spent. Day
//! counters reset lazily the first time they are touched after the UTC date
//! changes.
//!
//! Every provider has its own lock; providers never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tickwise_common::ProviderSettings;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

const MINUTE: Duration = Duration::from_secs(60);

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock source used for day boundaries.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// The real UTC clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Policy & Errors
// ============================================================================

/// Call allowance for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaPolicy {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
}

impl QuotaPolicy {
    pub fn new(requests_per_minute: u32, requests_per_day: u32) -> Self {
        Self {
            requests_per_minute,
            requests_per_day,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self::new(settings.requests_per_minute, settings.requests_per_day)
    }
}

/// Quota failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// Daily allowance spent
    #[error("Daily quota exhausted for {provider} ({limit} calls)")]
    Exhausted { provider: String, limit: u32 },

    /// Provider was never registered
    #[error("No quota registered for provider {0}")]
    UnknownProvider(String),
}

// ============================================================================
// Provider Quota State
// ============================================================================

#[derive(Debug)]
struct ProviderQuota {
    policy: QuotaPolicy,
    calls_today: u32,
    calls_this_minute: u32,
    minute_started: Instant,
    day: NaiveDate,
}

impl ProviderQuota {
    fn new(policy: QuotaPolicy, day: NaiveDate) -> Self {
        Self {
            policy,
            calls_today: 0,
            calls_this_minute: 0,
            minute_started: Instant::now(),
            day,
        }
    }

    /// Reset counters whose window has passed.
    fn roll(&mut self, provider: &str, today: NaiveDate, now: Instant) {
        if today != self.day {
            info!(
                provider,
                previous_day = %self.day,
                calls = self.calls_today,
                "Day boundary crossed, resetting quota"
            );
            self.day = today;
            self.calls_today = 0;
        }
        if now.duration_since(self.minute_started) >= MINUTE {
            self.minute_started = now;
            self.calls_this_minute = 0;
        }
    }

    fn day_exhausted(&self) -> bool {
        self.calls_today >= self.policy.requests_per_day
    }
}

/// Point-in-time view of one provider's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub provider: String,
    pub day: NaiveDate,
    pub calls_today: u32,
    pub calls_this_minute: u32,
    pub requests_per_day: u32,
    pub requests_per_minute: u32,
}

// ============================================================================
// Quota Tracker
// ============================================================================

/// Tracks call quotas for every provider.
pub struct QuotaTracker {
    clock: Arc<dyn Clock>,
    quotas: HashMap<String, Arc<Mutex<ProviderQuota>>>,
}

impl QuotaTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            quotas: HashMap::new(),
        }
    }

    /// Tracker on the system clock
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Register a provider. Registering again replaces the policy and resets
    /// the counters.
    pub fn register(&mut self, provider: impl Into<String>, policy: QuotaPolicy) {
        let quota = ProviderQuota::new(policy, self.clock.today());
        self.quotas
            .insert(provider.into(), Arc::new(Mutex::new(quota)));
    }

    fn slot(&self, provider: &str) -> Result<&Arc<Mutex<ProviderQuota>>, QuotaError> {
        self.quotas
            .get(provider)
            .ok_or_else(|| QuotaError::UnknownProvider(provider.to_string()))
    }

    /// Take one call from the provider's allowance.
    ///
    /// Waits while the current minute window is full; fails with
    /// `QuotaError::Exhausted` when the day's allowance is spent.
    pub async fn acquire(&self, provider: &str) -> Result<(), QuotaError> {
        let slot = self.slot(provider)?;

        loop {
            let wait = {
                let mut quota = slot.lock().await;
                let now = Instant::now();
                quota.roll(provider, self.clock.today(), now);

                if quota.day_exhausted() {
                    return Err(QuotaError::Exhausted {
                        provider: provider.to_string(),
                        limit: quota.policy.requests_per_day,
                    });
                }

                if quota.calls_this_minute < quota.policy.requests_per_minute.max(1) {
                    quota.calls_this_minute += 1;
                    quota.calls_today += 1;
                    return Ok(());
                }

                MINUTE.saturating_sub(now.duration_since(quota.minute_started))
            };

            debug!(provider, wait_ms = wait.as_millis() as u64, "Minute quota full, waiting");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Whether the provider has any calls left today (non-blocking with
    /// respect to the minute window).
    pub async fn has_headroom(&self, provider: &str) -> bool {
        let Ok(slot) = self.slot(provider) else {
            return false;
        };
        let mut quota = slot.lock().await;
        quota.roll(provider, self.clock.today(), Instant::now());
        !quota.day_exhausted()
    }

    /// Current counters for a provider
    pub async fn snapshot(&self, provider: &str) -> Option<QuotaSnapshot> {
        let slot = self.quotas.get(provider)?;
        let mut quota = slot.lock().await;
        quota.roll(provider, self.clock.today(), Instant::now());
        Some(QuotaSnapshot {
            provider: provider.to_string(),
            day: quota.day,
            calls_today: quota.calls_today,
            calls_this_minute: quota.calls_this_minute,
            requests_per_day: quota.policy.requests_per_day,
            requests_per_minute: quota.policy.requests_per_minute,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
