//! Network address validation
//!
//! Validates the listener addresses and recursive nameservers.

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::Config;
use std::net::SocketAddr;

/// Validate every configured socket address
pub fn validate_addresses(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Err(e) = config.api.address.parse::<SocketAddr>() {
        result.add_error(ValidationError::new(
            ErrorCategory::Network,
            format!("Invalid api address '{}': {}", config.api.address, e),
        ));
    }

    if let Err(e) = config.http01.listen_addr() {
        result.add_error(ValidationError::new(ErrorCategory::Network, e));
    }

    for nameserver in &config.dns01.recursive_nameservers {
        if let Err(e) = crate::parse_nameserver(nameserver) {
            result.add_error(ValidationError::new(ErrorCategory::Network, e));
        }
    }

    result
}
