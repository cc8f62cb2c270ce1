//! Configuration management for the tickwise pipeline.
//!
//! The pipeline reads a single JSON file at `~/.tickwise/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (TICKWISE_* prefix, provider API keys)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TICKWISE_CONFIG` → path of the config file itself
//! - `TICKWISE_LOG_LEVEL` → observability.log_level
//! - `TICKWISE_LOG_FORMAT` → observability.log_format
//! - `TICKWISE_DB_PATH` → storage.db_path
//! - `TICKWISE_CALL_BUDGET` → run.call_budget
//! - `FMP_API_KEY` / `YAHOO_API_KEY` / `ALPHAVANTAGE_API_KEY` → providers[kind].api_key

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".tickwise"),
        |dirs| dirs.home_dir().join(".tickwise"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var("TICKWISE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.json"))
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Market-data providers in any order; priority decides routing
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderSettings>,

    /// Circuit breaker applied to every provider
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Batch ingestion settings
    #[serde(default)]
    pub ingestion: IngestionSettings,

    /// Data cleaner thresholds
    #[serde(default)]
    pub cleaner: CleanerSettings,

    /// Indicator engine settings
    #[serde(default)]
    pub indicators: IndicatorSettings,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Run-wide settings (budget, optional phases, schedule)
    #[serde(default)]
    pub run: RunSettings,

    /// Symbols seeded into the reference table
    #[serde(default)]
    pub symbols: Vec<SymbolEntry>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default_with_providers());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults including the built-in provider list.
    ///
    /// `Default` leaves `providers` empty, which is what serde needs for
    /// partially specified files; this constructor mirrors a missing file.
    pub fn default_with_providers() -> Self {
        Self {
            providers: default_providers(),
            ..Default::default()
        }
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TICKWISE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("TICKWISE_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(path) = std::env::var("TICKWISE_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Ok(budget) = std::env::var("TICKWISE_CALL_BUDGET") {
            if let Ok(b) = budget.parse() {
                self.run.call_budget = b;
            }
        }

        for provider in &mut self.providers {
            if let Ok(key) = std::env::var(provider.kind.api_key_env()) {
                if !key.is_empty() {
                    provider.api_key = Some(key);
                }
            }
        }
    }

    /// Enabled providers sorted by priority (lower = higher priority).
    pub fn enabled_providers(&self) -> Vec<&ProviderSettings> {
        let mut enabled: Vec<_> = self.providers.iter().filter(|p| p.enabled).collect();
        enabled.sort_by_key(|p| p.priority);
        enabled
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to hold at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Providers
// ============================================================================

/// Supported market-data provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Yahoo chart API (single symbol, columnar response)
    Yahoo,
    /// Financial Modeling Prep historical prices (multi-symbol)
    Fmp,
    /// Alpha Vantage daily time series (single symbol, date-keyed map)
    #[serde(alias = "alpha_vantage")]
    AlphaVantage,
}

impl ProviderKind {
    /// Stable lowercase name used in logs and quota keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::Fmp => "fmp",
            Self::AlphaVantage => "alphavantage",
        }
    }

    /// Environment variable carrying the API key for this provider.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Yahoo => "YAHOO_API_KEY",
            Self::Fmp => "FMP_API_KEY",
            Self::AlphaVantage => "ALPHAVANTAGE_API_KEY",
        }
    }

    /// Default API base URL.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Yahoo => "https://query1.finance.yahoo.com",
            Self::Fmp => "https://financialmodelingprep.com",
            Self::AlphaVantage => "https://www.alphavantage.co",
        }
    }

    /// Whether an API key is mandatory.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Yahoo)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Backend kind
    pub kind: ProviderKind,

    /// Whether this provider is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Priority (lower = higher priority, 1 is highest)
    #[serde(default = "default_provider_priority")]
    pub priority: u8,

    /// Credential
    #[serde(default)]
    pub api_key: Option<String>,

    /// Override for the API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Calls allowed per rolling minute window
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Calls allowed per calendar day
    #[serde(default = "default_requests_per_day")]
    pub requests_per_day: u32,

    /// Symbols per call for multi-symbol providers (ignored otherwise)
    #[serde(default = "default_provider_batch")]
    pub max_batch_size: usize,

    /// Per-call timeout
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl ProviderSettings {
    /// Settings for `kind` with every other field at its default.
    pub fn new(kind: ProviderKind, priority: u8) -> Self {
        Self {
            kind,
            enabled: true,
            priority,
            api_key: None,
            base_url: None,
            requests_per_minute: default_requests_per_minute(),
            requests_per_day: default_requests_per_day(),
            max_batch_size: default_provider_batch(),
            timeout_secs: default_provider_timeout(),
        }
    }

    /// Base URL, falling back to the provider's public endpoint.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
    }
}

fn default_providers() -> Vec<ProviderSettings> {
    vec![
        ProviderSettings {
            requests_per_minute: 300,
            requests_per_day: 250,
            max_batch_size: 5,
            ..ProviderSettings::new(ProviderKind::Fmp, 1)
        },
        ProviderSettings {
            requests_per_minute: 60,
            requests_per_day: 2000,
            max_batch_size: 1,
            ..ProviderSettings::new(ProviderKind::Yahoo, 2)
        },
        ProviderSettings {
            requests_per_minute: 5,
            requests_per_day: 25,
            max_batch_size: 1,
            ..ProviderSettings::new(ProviderKind::AlphaVantage, 3)
        },
    ]
}

fn default_provider_priority() -> u8 {
    10
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_requests_per_day() -> u32 {
    500
}

fn default_provider_batch() -> usize {
    1
}

fn default_provider_timeout() -> u64 {
    20
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Circuit breaker thresholds shared by all providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

// ============================================================================
// Ingestion
// ============================================================================

/// Batch ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    /// Symbols per ingestion batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Provider attempts per symbol before it is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Concurrent batches in flight
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Calendar days of history requested on the daily run
    #[serde(default = "default_history_days")]
    pub history_days: u32,

    /// Weekday exchange holidays (`YYYY-MM-DD`); no bars are expected on them
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_attempts: default_max_attempts(),
            worker_count: default_worker_count(),
            history_days: default_history_days(),
            holidays: Vec::new(),
        }
    }
}

fn default_max_batch_size() -> usize {
    25
}

fn default_max_attempts() -> u32 {
    3
}

fn default_worker_count() -> usize {
    4
}

fn default_history_days() -> u32 {
    200
}

// ============================================================================
// Cleaner
// ============================================================================

/// Thresholds for the data cleaner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerSettings {
    /// Relative deviation from the local median that makes a jump suspicious
    #[serde(default = "default_median_guard")]
    pub median_guard: f64,

    /// Bar-to-bar ratio (or its inverse) that marks a scale jump
    #[serde(default = "default_jump_ratio")]
    pub jump_ratio: f64,

    /// Day-over-day close move treated as implausible
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: f64,

    /// Largest fraction of bars cleaning may remove before it aborts
    #[serde(default = "default_max_loss_fraction")]
    pub max_loss_fraction: f64,

    /// Window of the centred rolling median
    #[serde(default = "default_median_window")]
    pub median_window: usize,
}

impl Default for CleanerSettings {
    fn default() -> Self {
        Self {
            median_guard: default_median_guard(),
            jump_ratio: default_jump_ratio(),
            spike_threshold: default_spike_threshold(),
            max_loss_fraction: default_max_loss_fraction(),
            median_window: default_median_window(),
        }
    }
}

fn default_median_guard() -> f64 {
    0.5
}

fn default_jump_ratio() -> f64 {
    50.0
}

fn default_spike_threshold() -> f64 {
    0.30
}

fn default_max_loss_fraction() -> f64 {
    0.30
}

fn default_median_window() -> usize {
    21
}

// ============================================================================
// Indicators
// ============================================================================

/// Indicator engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSettings {
    /// Bars fed to the engine (most recent)
    #[serde(default = "default_max_window")]
    pub max_window: usize,

    /// CCI scaling constant
    #[serde(default = "default_cci_constant")]
    pub cci_constant: f64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            max_window: default_max_window(),
            cci_constant: default_cci_constant(),
        }
    }
}

fn default_max_window() -> usize {
    250
}

fn default_cci_constant() -> f64 {
    0.015
}

// ============================================================================
// Storage
// ============================================================================

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    config_dir().join("tickwise.db")
}

// ============================================================================
// Run
// ============================================================================

/// Run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Maximum provider calls in one run
    #[serde(default = "default_call_budget")]
    pub call_budget: u64,

    /// Run the historical backfill phase when budget remains
    #[serde(default = "default_true")]
    pub backfill_enabled: bool,

    /// Symbols with fewer stored bars than this are backfilled
    #[serde(default = "default_backfill_min_bars")]
    pub backfill_min_bars: usize,

    /// Calendar days fetched by backfill
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,

    /// Cron expression for scheduled mode (sec min hour dom mon dow)
    #[serde(default = "default_cron")]
    pub cron: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            call_budget: default_call_budget(),
            backfill_enabled: true,
            backfill_min_bars: default_backfill_min_bars(),
            backfill_days: default_backfill_days(),
            cron: default_cron(),
        }
    }
}

fn default_call_budget() -> u64 {
    500
}

fn default_backfill_min_bars() -> usize {
    120
}

fn default_backfill_days() -> u32 {
    730
}

fn default_cron() -> String {
    // 22:30 UTC on weekdays, after the US close
    "0 30 22 * * Mon-Fri".to_string()
}

// ============================================================================
// Symbols
// ============================================================================

/// A symbol to seed into the reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    /// Ticker
    pub symbol: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Tests
// ============================================================================
