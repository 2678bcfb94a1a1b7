//! DigitalOcean DNS provider
//!
//! API documentation: <https://docs.digitalocean.com/reference/api/api-reference/#tag/Domain-Records>

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{base_url, expect_success, http_client};
use crate::challenge::dns::provider::{
    relative_name, zone_candidates, DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL,
};

pub const DIGITALOCEAN_API_BASE: &str = "https://api.digitalocean.com/v2";

#[derive(Debug)]
pub struct DigitalOceanProvider {
    client: Client,
    base: String,
    token: String,
    timeout_secs: u64,
    /// fqdn -> domain (zone) name
    zone_cache: RwLock<HashMap<String, String>>,
}

impl DigitalOceanProvider {
    pub fn new(token: &str, api_url: Option<&str>, timeout: Duration) -> DnsResult<Self> {
        if token.trim().is_empty() {
            return Err(DnsProviderError::Credentials("empty DigitalOcean token".into()));
        }
        Ok(Self {
            client: http_client(timeout)?,
            base: base_url(api_url.unwrap_or(DIGITALOCEAN_API_BASE)),
            token: token.to_string(),
            timeout_secs: timeout.as_secs(),
            zone_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn zone(&self, fqdn: &str) -> DnsResult<String> {
        let cached = self.zone_cache.read().get(fqdn).cloned();
        if let Some(zone) = cached {
            return Ok(zone);
        }

        for candidate in zone_candidates(fqdn) {
            let response = self
                .client
                .get(format!("{}/domains/{}", self.base, candidate))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| DnsProviderError::from_send(e, self.timeout_secs, "failed to look up domain"))?;

            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            expect_success(response, DnsProviderError::ApiRequest).await?;

            debug!(fqdn = %fqdn, zone = %candidate, "Found DigitalOcean domain");
            self.zone_cache
                .write()
                .insert(fqdn.to_string(), candidate.to_string());
            return Ok(candidate.to_string());
        }

        Err(DnsProviderError::ZoneNotFound {
            fqdn: fqdn.to_string(),
        })
    }
}

#[async_trait]
impl DnsProvider for DigitalOceanProvider {
    fn name(&self) -> &'static str {
        "digitalocean"
    }

    async fn create_txt_record(&self, fqdn: &str, value: &str) -> DnsResult<String> {
        let zone = self.zone(fqdn).await?;
        let name = relative_name(fqdn, &zone);

        let body = CreateRecord {
            r#type: "TXT",
            name: &name,
            data: value,
            ttl: CHALLENGE_TTL,
        };
        let response = self
            .client
            .post(format!("{}/domains/{}/records", self.base, zone))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DnsProviderError::from_send(e, self.timeout_secs, "failed to create record"))?;
        let response = expect_success(response, |message| DnsProviderError::RecordCreation {
            fqdn: fqdn.to_string(),
            message,
        })
        .await?;

        let created: RecordResponse =
            response
                .json()
                .await
                .map_err(|e| DnsProviderError::RecordCreation {
                    fqdn: fqdn.to_string(),
                    message: format!("failed to parse response: {}", e),
                })?;
        debug!(fqdn = %fqdn, record_id = created.domain_record.id, "DigitalOcean TXT record created");
        Ok(created.domain_record.id.to_string())
    }

    async fn delete_txt_record(&self, fqdn: &str, record_id: &str) -> DnsResult<()> {
        let zone = self.zone(fqdn).await?;

        let response = self
            .client
            .delete(format!("{}/domains/{}/records/{}", self.base, zone, record_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| DnsProviderError::from_send(e, self.timeout_secs, "failed to delete record"))?;

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
    r#type: &'static str,
    name: &'a str,
    data: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    domain_record: ApiRecord,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: u64,
}
