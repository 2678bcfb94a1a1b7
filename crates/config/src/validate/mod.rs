//! Configuration validation
//!
//! Checks the loaded configuration for logic errors, unparsable addresses,
//! an unusable management certificate, and operational best practices.

pub mod certs;
pub mod lint;
pub mod network;

use std::fmt;

use crate::Config;

/// Validation error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network address issue
    Network,
    /// Certificate issue
    Certificate,
    /// Configuration logic error
    Logic,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "Network"),
            ErrorCategory::Certificate => write!(f, "Certificate"),
            ErrorCategory::Logic => write!(f, "Logic"),
        }
    }
}

/// Validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Validation result containing errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a new empty validation result
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Add a warning
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Check if validation passed (no errors)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Check if there are any warnings
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validation options
#[derive(Debug, Clone, Default)]
pub struct ValidationOpts {
    pub skip_certs: bool,
    pub skip_lint: bool,
}

/// Run every validation pass selected by `opts`
pub fn validate_all(config: &Config, opts: &ValidationOpts) -> ValidationResult {
    let mut result = ValidationResult::new();

    result.merge(validate_logic(config));
    result.merge(network::validate_addresses(config));
    if !opts.skip_certs {
        result.merge(certs::validate_certificates(config));
    }
    if !opts.skip_lint {
        result.merge(lint::lint_config(config));
    }

    result
}

/// Settings that parse fine but cannot work
fn validate_logic(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.renewal.interval_days == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Logic,
            "renewal interval-days must be greater than zero",
        ));
    }

    if config.reload.command.first().map_or(true, |p| p.trim().is_empty()) {
        result.add_error(ValidationError::new(
            ErrorCategory::Logic,
            "reload command must name a program",
        ));
    }

    if config.sync.timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Logic,
            "sync timeout-secs must be greater than zero",
        ));
    }

    if config.dns01.propagation_interval_secs == 0 && config.dns01.verify_propagation {
        result.add_error(ValidationError::new(
            ErrorCategory::Logic,
            "dns01 propagation-interval-secs must be greater than zero",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let result = validate_all(&Config::default(), &ValidationOpts::default());
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.renewal.interval_days = 0;

        let result = validate_logic(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("interval-days")));
    }

    #[test]
    fn test_empty_reload_command_rejected() {
        let mut config = Config::default();
        config.reload.command.clear();

        let result = validate_logic(&config);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Logic);
    }
}
