//! Cloudflare DNS provider
//!
//! API documentation: <https://developers.cloudflare.com/api/resources/dns/>

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{base_url, expect_success, http_client};
use crate::challenge::dns::provider::{
    zone_candidates, DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL,
};

pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug)]
pub struct CloudflareProvider {
    client: Client,
    base: String,
    token: String,
    timeout_secs: u64,
    /// fqdn -> zone id
    zone_cache: RwLock<HashMap<String, String>>,
}

impl CloudflareProvider {
    pub fn new(token: &str, api_url: Option<&str>, timeout: Duration) -> DnsResult<Self> {
        if token.trim().is_empty() {
            return Err(DnsProviderError::Credentials("empty Cloudflare API token".into()));
        }
        Ok(Self {
            client: http_client(timeout)?,
            base: base_url(api_url.unwrap_or(CLOUDFLARE_API_BASE)),
            token: token.to_string(),
            timeout_secs: timeout.as_secs(),
            zone_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn zone_id(&self, fqdn: &str) -> DnsResult<String> {
        let cached = self.zone_cache.read().get(fqdn).cloned();
        if let Some(id) = cached {
            trace!(fqdn = %fqdn, zone_id = %id, "Zone id found in cache");
            return Ok(id);
        }

        for candidate in zone_candidates(fqdn) {
            let response = self
                .client
                .get(format!("{}/zones", self.base))
                .query(&[("name", candidate)])
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| DnsProviderError::from_send(e, self.timeout_secs, "failed to list zones"))?;
            let response = expect_success(response, DnsProviderError::ApiRequest).await?;

            let zones: Envelope<Vec<Zone>> = response
                .json()
                .await
                .map_err(|e| DnsProviderError::ApiRequest(format!("failed to parse zones: {}", e)))?;

            if let Some(zone) = zones.result.into_iter().next() {
                debug!(fqdn = %fqdn, zone = %zone.name, zone_id = %zone.id, "Found Cloudflare zone");
                self.zone_cache.write().insert(fqdn.to_string(), zone.id.clone());
                return Ok(zone.id);
            }
        }

        Err(DnsProviderError::ZoneNotFound {
            fqdn: fqdn.to_string(),
        })
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    async fn create_txt_record(&self, fqdn: &str, value: &str) -> DnsResult<String> {
        let zone_id = self.zone_id(fqdn).await?;
        debug!(fqdn = %fqdn, zone_id = %zone_id, "Creating Cloudflare TXT record");

        let body = CreateRecord {
            r#type: "TXT",
            name: fqdn,
            content: value,
            ttl: CHALLENGE_TTL,
        };
        let response = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.base, zone_id))
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

        let record: Envelope<Record> =
            response
                .json()
                .await
                .map_err(|e| DnsProviderError::RecordCreation {
                    fqdn: fqdn.to_string(),
                    message: format!("failed to parse response: {}", e),
                })?;

        Ok(record.result.id)
    }

    async fn delete_txt_record(&self, fqdn: &str, record_id: &str) -> DnsResult<()> {
        let zone_id = self.zone_id(fqdn).await?;
        debug!(record_id = %record_id, zone_id = %zone_id, "Deleting Cloudflare TXT record");

        let response = self
            .client
            .delete(format!("{}/zones/{}/dns_records/{}", self.base, zone_id, record_id))
            .bearer_auth(&self.token)
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
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateRecord<'a> {
    r#type: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_create_walks_to_parent_zone() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(query_param("name", "example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "result": [{"id": "zone-1", "name": "example.com"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true, "result": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .and(header("authorization", "Bearer cf-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "result": {"id": "rec-9"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            CloudflareProvider::new("cf-token", Some(&server.uri()), Duration::from_secs(5)).unwrap();
        let id = provider
            .create_txt_record("_acme-challenge.www.example.com", "value")
            .await
            .unwrap();
        assert_eq!(id, "rec-9");
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let provider =
            CloudflareProvider::new("bad", Some(&server.uri()), Duration::from_secs(5)).unwrap();
        let err = provider
            .create_txt_record("_acme-challenge.example.com", "value")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsProviderError::Authentication(_)));
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(CloudflareProvider::new(" ", None, Duration::from_secs(1)).is_err());
    }
}
