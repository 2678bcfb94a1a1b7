//! Configuration linting for best practices
//!
//! Checks configuration for settings that work but are risky in production.

use super::{ValidationResult, ValidationWarning};
use crate::defaults::{LETSENCRYPT_STAGING, MIN_CHECK_INTERVAL_SECS};
use crate::Config;
use std::net::SocketAddr;

/// Lint configuration for best practices
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.acme.email.is_none() {
        result.add_warning(ValidationWarning::new(
            "acme block has no contact email; the default account cannot be created",
        ));
    }

    if config.acme.ca_directory == LETSENCRYPT_STAGING {
        result.add_warning(ValidationWarning::new(
            "acme ca-directory points at the staging environment; issued certificates are not trusted",
        ));
    }

    if config.renewal.check_interval_secs < MIN_CHECK_INTERVAL_SECS {
        result.add_warning(ValidationWarning::new(format!(
            "renewal check-interval-secs {} is below {} and will be raised",
            config.renewal.check_interval_secs, MIN_CHECK_INTERVAL_SECS
        )));
    }

    // Exposed API without authentication
    if let Ok(addr) = config.api.address.parse::<SocketAddr>() {
        if !addr.ip().is_loopback() && config.api.token.is_none() {
            result.add_warning(ValidationWarning::new(format!(
                "api listens on {} without a token (issue and revoke are unauthenticated)",
                addr
            )));
        }
        if !addr.ip().is_loopback() && config.api.tls_cert.is_none() {
            result.add_warning(ValidationWarning::new(format!(
                "api listens on {} without TLS",
                addr
            )));
        }
    }

    if config.api.node_secret.is_none() {
        result.add_warning(ValidationWarning::new(
            "api node-secret is not set; fleet sync pushes to this node are refused",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lint_public_api_without_token() {
        let mut config = Config::default();
        config.api.address = "0.0.0.0:9443".to_string();

        let result = lint_config(&config);

        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("without a token")));
    }

    #[test]
    fn test_lint_loopback_api_is_quiet() {
        let mut config = Config::default();
        config.acme.email = Some("ops@example.com".to_string());
        config.api.node_secret = Some("s3cret".to_string());

        let result = lint_config(&config);

        assert!(!result.has_warnings(), "{:?}", result.warnings);
    }
}
