//! tickwise-common - shared configuration, logging and error types.
//!
//! This crate provides:
//! - Configuration types and loading with environment overrides
//! - Configuration validation
//! - Error types and context helpers
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    CircuitBreakerSettings, CleanerSettings, Config, IndicatorSettings, IngestionSettings,
    ObservabilityConfig, ProviderKind, ProviderSettings, RunSettings, StorageSettings,
    SymbolEntry,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, ProviderKind, ProviderSettings};
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
