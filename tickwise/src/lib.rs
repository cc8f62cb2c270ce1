//! tickwise - daily market data ingestion and technical indicators.
//!
//! Fetches daily price bars for a symbol universe from several redundant
//! providers, repairs corrupted series and computes indicators for
//! downstream rating logic.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      DailyOrchestrator                           │
//! │   acquire ──► clean ──► indicators ──► persist ──► backfill ...  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐   ┌───────────────┐   ┌───────────────────┐   │
//! │  │ BatchIngestor │──►│ProviderRouter │──►│ Yahoo / FMP / AV  │   │
//! │  │ (workers)     │   │ breaker+quota │   │ adapters          │   │
//! │  └───────────────┘   └───────────────┘   └───────────────────┘   │
//! │  ┌───────────────┐   ┌───────────────┐   ┌───────────────────┐   │
//! │  │ Cleaner       │   │IndicatorEngine│   │PersistenceGateway │   │
//! │  │ scale repair  │   │ rayon         │   │ SQLite            │   │
//! │  └───────────────┘   └───────────────┘   └───────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! - **Failover**: providers are tried in priority order; each has a circuit
//!   breaker and its own per-minute and per-day quota.
//! - **Run budget**: a run-wide ceiling on provider calls. Running out ends
//!   discretionary work early; it never fails the run.
//! - **Low confidence**: when cleaning would discard too much of a series,
//!   the raw series is kept and flagged instead.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod circuit_breaker;
pub mod clean;
pub mod data;
pub mod indicators;
pub mod ingest;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clean::{CleanReport, Cleaner, CleanerConfig};
pub use data::{DateRange, MarketDataProvider, PriceBar, ProviderRouter, RunBudget, TradingCalendar};
pub use indicators::{IndicatorEngine, IndicatorSet};
pub use ingest::{BatchIngestor, IngestConfig, IngestOutcome, Unresolved};
pub use pipeline::{DailyOrchestrator, OptionalPhase, RunOptions, RunReport, RunStatus};
pub use scheduler::DailySchedule;
pub use storage::{PersistenceError, PersistenceGateway};
