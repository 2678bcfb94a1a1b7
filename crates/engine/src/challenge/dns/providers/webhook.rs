//! Generic webhook DNS provider
//!
//! ```text
//! POST {url}/records
//! {"fqdn": "_acme-challenge.example.com", "record_type": "TXT",
//!  "record_value": "...", "ttl": 60}
//! -> {"record_id": "..."}
//!
//! DELETE {url}/records/{record_id}?fqdn=_acme-challenge.example.com
//! -> 200 / 204 / 404
//! ```
//!
//! With `WEBHOOK_TOKEN` set, requests carry it as a bearer token, or in the
//! header named by `WEBHOOK_AUTH_HEADER` when that is set.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{base_url, expect_success, http_client};
use crate::challenge::dns::provider::{DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL};

#[derive(Debug)]
pub struct WebhookProvider {
    client: Client,
    base: String,
    auth_header: Option<String>,
    token: Option<String>,
    timeout_secs: u64,
}

impl WebhookProvider {
    pub fn new(
        url: &str,
        auth_header: Option<&str>,
        token: Option<&str>,
        timeout: Duration,
    ) -> DnsResult<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DnsProviderError::Configuration(format!(
                "webhook URL '{}' must be http(s)",
                url
            )));
        }
        Ok(Self {
            client: http_client(timeout)?,
            base: base_url(url),
            auth_header: auth_header.map(str::to_string),
            token: token.map(str::to_string),
            timeout_secs: timeout.as_secs(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.auth_header, &self.token) {
            (Some(header), Some(token)) => request.header(header.as_str(), token.as_str()),
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }
}

#[async_trait]
impl DnsProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn create_txt_record(&self, fqdn: &str, value: &str) -> DnsResult<String> {
        debug!(fqdn = %fqdn, url = %self.base, "Creating TXT record via webhook");

        let body = CreateRecord {
            fqdn,
            record_type: "TXT",
            record_value: value,
            ttl: CHALLENGE_TTL,
        };
        let response = self
            .authorize(self.client.post(format!("{}/records", self.base)).json(&body))
            .send()
            .await
            .map_err(|e| DnsProviderError::from_send(e, self.timeout_secs, "webhook request failed"))?;
        let response = expect_success(response, |message| DnsProviderError::RecordCreation {
            fqdn: fqdn.to_string(),
            message,
        })
        .await?;

        let created: CreateRecordResponse =
            response
                .json()
                .await
                .map_err(|e| DnsProviderError::RecordCreation {
                    fqdn: fqdn.to_string(),
                    message: format!("failed to parse webhook response: {}", e),
                })?;
        Ok(created.record_id)
    }

    async fn delete_txt_record(&self, fqdn: &str, record_id: &str) -> DnsResult<()> {
        debug!(fqdn = %fqdn, record_id = %record_id, "Deleting TXT record via webhook");

        let request = self
            .client
            .delete(format!("{}/records/{}", self.base, record_id))
            .query(&[("fqdn", fqdn)]);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| DnsProviderError::from_send(e, self.timeout_secs, "webhook request failed"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response, |message| DnsProviderError::RecordDeletion {
            record_id: record_id.to_string(),
            message,
        })
        .await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CreateRecord<'a> {
    fqdn: &'a str,
    record_type: &'static str,
    record_value: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    record_id: String,
}
