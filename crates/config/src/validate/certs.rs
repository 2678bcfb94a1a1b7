//! Certificate validation
//!
//! Validates the management API's TLS certificate: presence of both halves,
//! parseability, and expiry.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Validate the management TLS certificate pair
pub fn validate_certificates(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let (cert_file, key_file) = match (&config.api.tls_cert, &config.api.tls_key) {
        (None, None) => return result,
        (Some(cert), Some(key)) => (cert, key),
        (Some(_), None) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Certificate,
                "api tls-cert is set but tls-key is missing",
            ));
            return result;
        }
        (None, Some(_)) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Certificate,
                "api tls-key is set but tls-cert is missing",
            ));
            return result;
        }
    };

    if !cert_file.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("Certificate not found: {:?}", cert_file),
        ));
        return result;
    }

    if !key_file.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("Private key not found: {:?}", key_file),
        ));
        return result;
    }

    match load_and_validate_cert(cert_file) {
        Ok(Some(expiry_warning)) => result.add_warning(expiry_warning),
        Ok(None) => {}
        Err(e) => result.add_error(e),
    }

    result
}

/// Load a certificate and check its expiry
fn load_and_validate_cert(cert_path: &Path) -> Result<Option<ValidationWarning>, ValidationError> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to read certificate {:?}: {}", cert_path, e),
        )
    })?;

    let pem = pem::parse(&cert_pem).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to parse certificate {:?}: {}", cert_path, e),
        )
    })?;

    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents()).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Invalid X509 certificate {:?}: {}", cert_path, e),
        )
    })?;

    let now = SystemTime::now();
    let not_after = cert.validity().not_after.timestamp().max(0) as u64;
    let expiry_time = SystemTime::UNIX_EPOCH + Duration::from_secs(not_after);

    if expiry_time < now {
        return Err(ValidationError::new(
            ErrorCategory::Certificate,
            format!(
                "Certificate expired: {:?} (expired at {})",
                cert_path,
                cert.validity().not_after
            ),
        ));
    }

    // Warn if expiring within 30 days
    let thirty_days = Duration::from_secs(30 * 86400);
    if expiry_time < now + thirty_days {
        return Ok(Some(ValidationWarning::new(format!(
            "Certificate expires soon: {:?} (expires at {})",
            cert_path,
            cert.validity().not_after
        ))));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_missing_certificate() {
        let mut config = Config::default();
        config.api.tls_cert = Some("/nonexistent/cert.pem".into());
        config.api.tls_key = Some("/nonexistent/key.pem".into());

        let result = validate_certificates(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Certificate not found")));
    }

    #[test]
    fn test_validate_cert_without_key() {
        let mut config = Config::default();
        config.api.tls_cert = Some("/etc/certward/api.pem".into());

        let result = validate_certificates(&config);

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("tls-key is missing"));
    }

    #[test]
    fn test_validate_unparsable_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("api.pem");
        let key = dir.path().join("api.key");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let mut config = Config::default();
        config.api.tls_cert = Some(cert);
        config.api.tls_key = Some(key);

        let result = validate_certificates(&config);

        assert!(!result.is_valid());
        assert_eq!(result.errors[0].category, ErrorCategory::Certificate);
    }
}
