//! Hetzner DNS provider
//!
//! API documentation: <https://dns.hetzner.com/api-docs>

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{base_url, expect_success, http_client};
use crate::challenge::dns::provider::{
    relative_name, zone_candidates, DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL,
};

pub const HETZNER_API_BASE: &str = "https://dns.hetzner.com/api/v1";

const AUTH_HEADER: &str = "Auth-API-Token";

#[derive(Debug, Clone)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug)]
pub struct HetznerProvider {
    client: Client,
    base: String,
    token: String,
    timeout_secs: u64,
    zone_cache: RwLock<HashMap<String, Zone>>,
}

impl HetznerProvider {
    pub fn new(token: &str, api_url: Option<&str>, timeout: Duration) -> DnsResult<Self> {
        if token.trim().is_empty() {
            return Err(DnsProviderError::Credentials("empty Hetzner API token".into()));
        }
        Ok(Self {
            client: http_client(timeout)?,
            base: base_url(api_url.unwrap_or(HETZNER_API_BASE)),
            token: token.to_string(),
            timeout_secs: timeout.as_secs(),
            zone_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn zone(&self, fqdn: &str) -> DnsResult<Zone> {
        let cached = self.zone_cache.read().get(fqdn).cloned();
        if let Some(zone) = cached {
            trace!(fqdn = %fqdn, zone_id = %zone.id, "Zone found in cache");
            return Ok(zone);
        }

        for candidate in zone_candidates(fqdn) {
            let response = self
                .client
                .get(format!("{}/zones", self.base))
                .query(&[("name", candidate)])
                .header(AUTH_HEADER, &self.token)
                .send()
                .await
                .map_err(|e| DnsProviderError::from_send(e, self.timeout_secs, "failed to list zones"))?;

            // Hetzner answers 404 for an unknown zone name
            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            let response = expect_success(response, DnsProviderError::ApiRequest).await?;
            let zones: ZonesResponse = response
                .json()
                .await
                .map_err(|e| DnsProviderError::ApiRequest(format!("failed to parse zones: {}", e)))?;

            if let Some(zone) = zones.zones.into_iter().find(|z| z.name == candidate) {
                let zone = Zone {
                    id: zone.id,
                    name: zone.name,
                };
                debug!(fqdn = %fqdn, zone = %zone.name, zone_id = %zone.id, "Found Hetzner zone");
                self.zone_cache.write().insert(fqdn.to_string(), zone.clone());
                return Ok(zone);
            }
        }

        Err(DnsProviderError::ZoneNotFound {
            fqdn: fqdn.to_string(),
        })
    }
}

#[async_trait]
impl DnsProvider for HetznerProvider {
    fn name(&self) -> &'static str {
        "hetzner"
    }

    async fn create_txt_record(&self, fqdn: &str, value: &str) -> DnsResult<String> {
        let zone = self.zone(fqdn).await?;
        let name = relative_name(fqdn, &zone.name);
        debug!(fqdn = %fqdn, zone_id = %zone.id, record = %name, "Creating Hetzner TXT record");

        let body = CreateRecord {
            zone_id: &zone.id,
            r#type: "TXT",
            name: &name,
            value,
            ttl: CHALLENGE_TTL,
        };
        let response = self
            .client
            .post(format!("{}/records", self.base))
            .header(AUTH_HEADER, &self.token)
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
        Ok(created.record.id)
    }

    async fn delete_txt_record(&self, _fqdn: &str, record_id: &str) -> DnsResult<()> {
        debug!(record_id = %record_id, "Deleting Hetzner TXT record");

        let response = self
            .client
            .delete(format!("{}/records/{}", self.base, record_id))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| DnsProviderError::from_send(e, self.timeout_secs, "failed to delete record"))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(record_id = %record_id, "Record already deleted");
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

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    zones: Vec<ApiZone>,
}

#[derive(Debug, Deserialize)]
struct ApiZone {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateRecord<'a> {
    zone_id: &'a str,
    r#type: &'static str,
    name: &'a str,
    value: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    record: ApiRecord,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: String,
}
