//! Built-in DNS provider implementations
//!
//! - [`CloudflareProvider`] - Cloudflare API v4
//! - [`HetznerProvider`] - Hetzner DNS API
//! - [`DigitalOceanProvider`] - DigitalOcean domains API
//! - [`WebhookProvider`] - generic webhook for custom DNS systems

mod cloudflare;
mod digitalocean;
mod hetzner;
mod webhook;

pub use cloudflare::CloudflareProvider;
pub use digitalocean::DigitalOceanProvider;
pub use hetzner::HetznerProvider;
pub use webhook::WebhookProvider;

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};

use super::provider::{DnsProviderError, DnsResult};

/// Per-request timeout for provider APIs
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client(timeout: Duration) -> DnsResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DnsProviderError::Configuration(format!("failed to create HTTP client: {}", e)))
}

/// Pass successful responses through; map auth, rate limit and other failures
pub(crate) async fn expect_success(
    response: Response,
    fail: impl FnOnce(String) -> DnsProviderError,
) -> DnsResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(DnsProviderError::Authentication(format!(
            "provider answered HTTP {}",
            status
        )));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        return Err(DnsProviderError::RateLimited { retry_after_secs });
    }

    let body = response.text().await.unwrap_or_default();
    Err(fail(format!("HTTP {} - {}", status, body)))
}

/// Trim a trailing slash from an API base URL
pub(crate) fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
