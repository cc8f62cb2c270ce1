//! Configuration validation.
//!
//! Checks every section of [`Config`] and reports all problems at once.

use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    CircuitBreakerSettings, CleanerSettings, Config, IndicatorSettings, IngestionSettings,
    ObservabilityConfig, ProviderSettings, RunSettings,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let sections: [&dyn Validate; 6] = [
            &self.observability,
            &self.circuit_breaker,
            &self.ingestion,
            &self.cleaner,
            &self.indicators,
            &self.run,
        ];
        for section in sections {
            if let Err(e) = section.validate() {
                errors.push(e);
            }
        }

        let enabled = self.enabled_providers();
        if enabled.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "providers (at least one enabled)".into(),
            });
        }
        for provider in &enabled {
            if let Err(e) = provider.validate() {
                errors.push(e);
            }
        }

        if let Err(e) = self.check_duplicate_providers() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    fn check_duplicate_providers(&self) -> ValidationResult<()> {
        let enabled = self.enabled_providers();
        for i in 0..enabled.len() {
            for j in (i + 1)..enabled.len() {
                if enabled[i].kind == enabled[j].kind {
                    return Err(ValidationError::Conflict {
                        reason: format!("provider '{}' is configured twice", enabled[i].kind),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        Ok(())
    }
}

impl Validate for ProviderSettings {
    fn validate(&self) -> ValidationResult<()> {
        let field = |name: &str| format!("providers.{}.{}", self.kind, name);

        if self.kind.requires_api_key() && self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ValidationError::MissingField {
                field: format!("{} (or {})", field("api_key"), self.kind.api_key_env()),
            });
        }
        if self.requests_per_minute == 0 {
            return Err(invalid(field("requests_per_minute"), "must be greater than 0"));
        }
        if self.requests_per_day == 0 {
            return Err(invalid(field("requests_per_day"), "must be greater than 0"));
        }
        if self.max_batch_size == 0 {
            return Err(invalid(field("max_batch_size"), "must be greater than 0"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid(field("timeout_secs"), "must be greater than 0"));
        }
        Ok(())
    }
}

impl Validate for CircuitBreakerSettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.failure_threshold == 0 {
            return Err(invalid(
                "circuit_breaker.failure_threshold",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Validate for IngestionSettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_batch_size == 0 {
            return Err(invalid("ingestion.max_batch_size", "must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("ingestion.max_attempts", "must be greater than 0"));
        }
        if self.worker_count == 0 {
            return Err(invalid("ingestion.worker_count", "must be greater than 0"));
        }
        if self.history_days == 0 {
            return Err(invalid("ingestion.history_days", "must be greater than 0"));
        }
        Ok(())
    }
}

impl Validate for CleanerSettings {
    fn validate(&self) -> ValidationResult<()> {
        if !(self.median_guard > 0.0) {
            return Err(invalid("cleaner.median_guard", "must be positive"));
        }
        if !(self.jump_ratio > 1.0) {
            return Err(invalid("cleaner.jump_ratio", "must be greater than 1"));
        }
        if !(self.spike_threshold > 0.0) {
            return Err(invalid("cleaner.spike_threshold", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.max_loss_fraction) {
            return Err(invalid("cleaner.max_loss_fraction", "must be within [0, 1]"));
        }
        if self.median_window < 3 {
            return Err(invalid("cleaner.median_window", "must be at least 3"));
        }
        Ok(())
    }
}

impl Validate for IndicatorSettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_window < 2 {
            return Err(invalid("indicators.max_window", "must be at least 2"));
        }
        if !(self.cci_constant > 0.0) || !self.cci_constant.is_finite() {
            return Err(invalid("indicators.cci_constant", "must be a positive number"));
        }
        Ok(())
    }
}

impl Validate for RunSettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.call_budget == 0 {
            return Err(invalid("run.call_budget", "must be greater than 0"));
        }
        if cron::Schedule::from_str(&self.cron).is_err() {
            return Err(invalid("run.cron", format!("'{}' is not a valid cron expression", self.cron)));
        }
        Ok(())
    }
}
