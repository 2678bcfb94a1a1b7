//! DNS provider interface for DNS-01 challenges

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub type DnsResult<T> = Result<T, DnsProviderError>;

/// DNS provider failures
#[derive(Debug, Error)]
pub enum DnsProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("no zone found for '{fqdn}'")]
    ZoneNotFound { fqdn: String },

    #[error("failed to create TXT record '{fqdn}': {message}")]
    RecordCreation { fqdn: String, message: String },

    #[error("failed to delete TXT record '{record_id}': {message}")]
    RecordDeletion { record_id: String, message: String },

    #[error("API request failed: {0}")]
    ApiRequest(String),

    #[error("rate limited by DNS provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid credentials: {0}")]
    Credentials(String),
}

impl DnsProviderError {
    /// Classify a reqwest send failure
    pub(crate) fn from_send(err: reqwest::Error, timeout_secs: u64, context: &str) -> Self {
        if err.is_timeout() {
            DnsProviderError::Timeout {
                elapsed_secs: timeout_secs,
            }
        } else {
            DnsProviderError::ApiRequest(format!("{}: {}", context, err))
        }
    }
}

/// A DNS hosting API able to publish and withdraw challenge records
///
/// Records are addressed by their fully qualified name (no trailing dot).
/// The provider is responsible for finding the zone that hosts the name.
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    /// Provider code, e.g. `cloudflare`
    fn name(&self) -> &'static str;

    /// Publish `value` at `fqdn`; returns an id for [`delete_txt_record`](Self::delete_txt_record)
    async fn create_txt_record(&self, fqdn: &str, value: &str) -> DnsResult<String>;

    /// Withdraw a record. Deleting a record that is already gone succeeds.
    async fn delete_txt_record(&self, fqdn: &str, record_id: &str) -> DnsResult<()>;
}

/// Challenge record label
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// TTL for challenge records
pub const CHALLENGE_TTL: u32 = 60;

/// Strip a leading wildcard label
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// `_acme-challenge.<domain>` for `domain` (wildcards share the base name)
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!(
        "{}.{}",
        ACME_CHALLENGE_RECORD,
        normalize_domain(domain).trim_end_matches('.')
    )
}

/// `fqdn` followed by each parent name, most specific first
///
/// The bare TLD is never offered as a zone.
pub fn zone_candidates(fqdn: &str) -> Vec<&str> {
    let fqdn = fqdn.trim_end_matches('.');
    let mut out = Vec::new();
    let mut current = fqdn;
    while current.contains('.') {
        out.push(current);
        match current.find('.') {
            Some(pos) => current = &current[pos + 1..],
            None => break,
        }
    }
    out
}

/// Name of `fqdn` relative to `zone` (`@` for the apex)
pub fn relative_name(fqdn: &str, zone: &str) -> String {
    let fqdn = fqdn.trim_end_matches('.');
    if fqdn == zone {
        "@".to_string()
    } else if let Some(stripped) = fqdn.strip_suffix(&format!(".{}", zone)) {
        stripped.to_string()
    } else {
        fqdn.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_record_fqdn() {
        assert_eq!(challenge_record_fqdn("example.com"), "_acme-challenge.example.com");
        assert_eq!(challenge_record_fqdn("*.example.com"), "_acme-challenge.example.com");
        assert_eq!(
            challenge_record_fqdn("sub.example.com."),
            "_acme-challenge.sub.example.com"
        );
    }

    #[test]
    fn test_zone_candidates() {
        assert_eq!(
            zone_candidates("_acme-challenge.a.example.com"),
            vec!["_acme-challenge.a.example.com", "a.example.com", "example.com"]
        );
        assert!(zone_candidates("localhost").is_empty());
    }

    #[test]
    fn test_relative_name() {
        assert_eq!(relative_name("example.com", "example.com"), "@");
        assert_eq!(
            relative_name("_acme-challenge.sub.example.com", "example.com"),
            "_acme-challenge.sub"
        );
        assert_eq!(relative_name("other.org", "example.com"), "other.org");
    }
}
