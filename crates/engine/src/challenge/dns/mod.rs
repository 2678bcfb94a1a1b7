//! DNS-01 challenge support
//!
//! Publishes `_acme-challenge` TXT records through a provider plugin,
//! optionally waits for propagation, and withdraws the records afterwards.

mod env;
mod propagation;
mod provider;
pub mod providers;
mod registry;

pub use env::ProviderEnv;
pub use propagation::{wait_for_propagation, DnsLookup, PropagationPolicy};
pub use provider::{
    challenge_record_fqdn, normalize_domain, relative_name, zone_candidates, DnsProvider,
    DnsProviderError, DnsResult, ACME_CHALLENGE_RECORD, CHALLENGE_TTL,
};
pub use registry::{ProviderBuilder, ProviderDescriptor, ProviderRegistry};

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::oplog::OperationLog;

/// TXT value for a key authorization: base64url(SHA-256(key_authorization))
pub fn challenge_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// A published challenge record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub fqdn: String,
    pub record_id: String,
}

/// DNS-01 strategy wired for one operation
///
/// Owns the provider's environment scope; dropping the solver releases it.
#[derive(Debug)]
pub struct Dns01Solver {
    provider: Arc<dyn DnsProvider>,
    env: ProviderEnv,
    lookup: Option<Arc<DnsLookup>>,
    propagation: Option<PropagationPolicy>,
    disable_cname: bool,
}

impl Dns01Solver {
    pub fn new(provider: Arc<dyn DnsProvider>, env: ProviderEnv) -> Self {
        Self {
            provider,
            env,
            lookup: None,
            propagation: None,
            disable_cname: true,
        }
    }

    /// Follow `_acme-challenge` CNAMEs through `lookup`
    pub fn with_cname_following(mut self, lookup: Arc<DnsLookup>) -> Self {
        self.lookup = Some(lookup);
        self.disable_cname = false;
        self
    }

    /// Wait for propagation through `lookup` after publishing
    pub fn with_propagation(mut self, lookup: Arc<DnsLookup>, policy: PropagationPolicy) -> Self {
        self.lookup = Some(lookup);
        self.propagation = Some(policy);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn env(&self) -> &ProviderEnv {
        &self.env
    }

    /// Record name for `domain`, after CNAME following when enabled
    async fn record_fqdn(&self, domain: &str, log: &OperationLog) -> String {
        let fqdn = challenge_record_fqdn(domain);
        if self.disable_cname {
            return fqdn;
        }
        match &self.lookup {
            Some(lookup) => match lookup.resolve_cname(&fqdn).await {
                Some(target) => {
                    log.info(format!("[{}] {} is a CNAME to {}", domain, fqdn, target));
                    target
                }
                None => fqdn,
            },
            None => fqdn,
        }
    }

    pub async fn present(
        &self,
        domain: &str,
        key_authorization: &str,
        log: &OperationLog,
    ) -> Result<PublishedRecord, DnsProviderError> {
        let fqdn = self.record_fqdn(domain, log).await;
        let value = challenge_value(key_authorization);

        log.info(format!(
            "[{}] Publishing TXT record {} via {}",
            domain,
            fqdn,
            self.provider.name()
        ));
        let record_id = self.provider.create_txt_record(&fqdn, &value).await?;
        debug!(fqdn = %fqdn, record_id = %record_id, "Challenge record published");

        if let (Some(lookup), Some(policy)) = (&self.lookup, &self.propagation) {
            log.info(format!(
                "[{}] Waiting up to {}s for DNS propagation",
                domain,
                policy.timeout.as_secs()
            ));
            let published = PublishedRecord {
                fqdn: fqdn.clone(),
                record_id: record_id.clone(),
            };
            if let Err(e) = wait_for_propagation(lookup, &fqdn, &value, policy).await {
                // The record is already out; withdraw before failing
                self.cleanup(&published, log).await;
                return Err(e);
            }
        }

        Ok(PublishedRecord { fqdn, record_id })
    }

    /// Withdraw a record; failures are logged, not returned
    pub async fn cleanup(&self, record: &PublishedRecord, log: &OperationLog) {
        match self
            .provider
            .delete_txt_record(&record.fqdn, &record.record_id)
            .await
        {
            Ok(()) => debug!(fqdn = %record.fqdn, "Challenge record withdrawn"),
            Err(e) => log.info(format!(
                "Failed to remove TXT record {}: {}",
                record.fqdn, e
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory provider for tests

    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Default)]
    pub struct MemoryProvider {
        pub records: Mutex<HashMap<String, (String, String)>>,
        pub deleted: Mutex<Vec<String>>,
        pub(crate) counter: AtomicU64,
        pub fail_create: bool,
    }

    #[async_trait]
    impl DnsProvider for MemoryProvider {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn create_txt_record(&self, fqdn: &str, value: &str) -> DnsResult<String> {
            if self.fail_create {
                return Err(DnsProviderError::RecordCreation {
                    fqdn: fqdn.to_string(),
                    message: "refused".into(),
                });
            }
            let id = format!("rec-{}", self.counter.fetch_add(1, Ordering::SeqCst));
            self.records
                .lock()
                .insert(id.clone(), (fqdn.to_string(), value.to_string()));
            Ok(id)
        }

        async fn delete_txt_record(&self, _fqdn: &str, record_id: &str) -> DnsResult<()> {
            self.records.lock().remove(record_id);
            self.deleted.lock().push(record_id.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryProvider;
    use super::*;
    use std::collections::BTreeMap;

    fn env() -> ProviderEnv {
        let config = BTreeMap::from([("TOKEN".to_string(), "t".to_string())]);
        ProviderEnv::bind("memory", &config, &["TOKEN"]).unwrap()
    }

    #[test]
    fn test_challenge_value() {
        // RFC 8555 section 8.4: base64url(SHA-256) without padding
        let value = challenge_value("token.thumbprint");
        assert_eq!(value.len(), 43);
        assert!(!value.contains('='));
        assert_eq!(value, challenge_value("token.thumbprint"));
    }

    #[tokio::test]
    async fn test_present_and_cleanup() {
        let provider = Arc::new(MemoryProvider::default());
        let solver = Dns01Solver::new(provider.clone(), env());
        let log = OperationLog::discard();

        let record = solver.present("*.example.com", "key-auth", &log).await.unwrap();
        assert_eq!(record.fqdn, "_acme-challenge.example.com");
        assert_eq!(
            provider.records.lock().get(&record.record_id).unwrap().1,
            challenge_value("key-auth")
        );

        solver.cleanup(&record, &log).await;
        assert!(provider.records.lock().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let provider = Arc::new(MemoryProvider {
            fail_create: true,
            ..Default::default()
        });
        let solver = Dns01Solver::new(provider, env());
        let err = solver
            .present("example.com", "k", &OperationLog::discard())
            .await
            .unwrap_err();
        assert!(matches!(err, DnsProviderError::RecordCreation { .. }));
    }
}
