//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tempfile::TempDir;

use certward_config::{Config, Http01Config};
use certward_engine::authority::{CertificateAuthority, OrderContext, Registration};
use certward_engine::challenge::dns::{
    DnsProvider, DnsProviderError, DnsResult, ProviderDescriptor, ProviderEnv, ProviderRegistry,
};
use certward_engine::error::AuthorityError;
use certward_engine::model::{AccountKey, AcmeAccount, CertificateResource, DnsCredential};
use certward_engine::notify::{Notification, Notifier};
use certward_engine::oplog::OperationLog;
use certward_engine::reload::NoopReloader;
use certward_engine::serving::ServingCertificate;
use certward_engine::{Engine, JsonStore, Store};

pub const MOCK_DNS: &str = "mockdns";

/// Self-signed PEM certificate and key for `domains`, valid between the two
/// unix timestamps
pub fn self_signed(domains: &[String], not_before: i64, not_after: i64) -> (String, String) {
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = rcgen::CertificateParams::new(domains.to_vec()).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, domains[0].as_str());
    let epoch = rcgen::date_time_ymd(1970, 1, 1);
    params.not_before = epoch + Duration::from_secs(not_before as u64);
    params.not_after = epoch + Duration::from_secs(not_after as u64);
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Certificate issued `age_days` ago with a 90 day lifetime
pub fn aged_certificate(domains: &[String], age_days: i64) -> (String, String) {
    let not_before = Utc::now() - chrono::Duration::days(age_days);
    let not_after = not_before + chrono::Duration::days(90);
    self_signed(domains, not_before.timestamp(), not_after.timestamp())
}

/// Certificate authority that signs locally and counts every call
#[derive(Debug, Default)]
pub struct ScriptedAuthority {
    pub registrations: AtomicUsize,
    pub obtains: AtomicUsize,
    pub renewals: AtomicUsize,
    pub revocations: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fail_orders: AtomicBool,
    /// Orders naming this domain panic mid-flight
    pub panic_on: Mutex<Option<String>>,
    in_flight: AtomicUsize,
    delay: Duration,
}

impl ScriptedAuthority {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn ca_calls(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
            + self.obtains.load(Ordering::SeqCst)
            + self.renewals.load(Ordering::SeqCst)
            + self.revocations.load(Ordering::SeqCst)
    }

    async fn order(&self, order: OrderContext<'_>) -> Result<CertificateResource, AuthorityError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.solve_and_sign(order).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn solve_and_sign(&self, order: OrderContext<'_>) -> Result<CertificateResource, AuthorityError> {
        let mut presented = Vec::new();
        for (i, domain) in order.request.domains.iter().enumerate() {
            let token = format!("token-{}", i);
            let key_authorization = format!("{}.thumbprint", token);
            presented.push(
                order
                    .solver
                    .present(domain, &token, &key_authorization, order.log)
                    .await?,
            );
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let panic_on = self.panic_on.lock().clone();
        if let Some(domain) = panic_on {
            if order.request.domains.contains(&domain) {
                panic!("scripted CA crashed while ordering {}", domain);
            }
        }

        for challenge in &presented {
            order.solver.cleanup(challenge, order.log).await;
        }

        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(AuthorityError::Finalization("order rejected by scripted CA".into()));
        }

        let (certificate, key) = aged_certificate(&order.request.domains, 1);
        Ok(CertificateResource {
            domain: order.request.cert_name().to_string(),
            cert_url: "https://ca.test/order/1".into(),
            private_key: key.into_bytes(),
            certificate: certificate.into_bytes(),
            issuer_certificate: Vec::new(),
            csr: b"scripted-csr".to_vec(),
        })
    }
}

#[async_trait]
impl CertificateAuthority for ScriptedAuthority {
    async fn register(&self, account: &AcmeAccount, _log: &OperationLog) -> Result<Registration, AuthorityError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(Registration {
            account_url: format!("https://ca.test/acct/{}", account.id),
            key: AccountKey {
                x: "x".into(),
                y: "y".into(),
                d: "d".into(),
            },
        })
    }

    async fn obtain(&self, order: OrderContext<'_>) -> Result<CertificateResource, AuthorityError> {
        self.obtains.fetch_add(1, Ordering::SeqCst);
        self.order(order).await
    }

    async fn renew(
        &self,
        order: OrderContext<'_>,
        _prior: &CertificateResource,
    ) -> Result<CertificateResource, AuthorityError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        self.order(order).await
    }

    async fn revoke(
        &self,
        _account: &AcmeAccount,
        _resource: &CertificateResource,
        _log: &OperationLog,
    ) -> Result<(), AuthorityError> {
        self.revocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Keeps every notification for inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn titled(&self, title: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.title == title)
            .cloned()
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}

/// DNS provider keeping records in memory
#[derive(Debug, Default)]
pub struct MockDns {
    pub records: Mutex<HashMap<String, (String, String)>>,
    pub created: AtomicUsize,
    pub deleted: AtomicUsize,
    pub fail_create: AtomicBool,
    counter: AtomicU64,
}

#[async_trait]
impl DnsProvider for MockDns {
    fn name(&self) -> &'static str {
        MOCK_DNS
    }

    async fn create_txt_record(&self, fqdn: &str, value: &str) -> DnsResult<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DnsProviderError::RecordCreation {
                fqdn: fqdn.to_string(),
                message: "zone is read-only".into(),
            });
        }
        let id = format!("rec-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.records
            .lock()
            .insert(id.clone(), (fqdn.to_string(), value.to_string()));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn delete_txt_record(&self, _fqdn: &str, record_id: &str) -> DnsResult<()> {
        self.records.lock().remove(record_id);
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Built-in providers plus [`MockDns`] under [`MOCK_DNS`]
pub fn registry(dns: Arc<MockDns>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::builtin();
    registry.register(ProviderDescriptor {
        code: MOCK_DNS.into(),
        required: vec!["MOCK_DNS_TOKEN"],
        optional: Vec::new(),
        build: Arc::new(move |_env: &ProviderEnv| Ok(Arc::clone(&dns) as Arc<dyn DnsProvider>)),
    });
    registry
}

/// Configuration rooted in `dir`, with loopback HTTP-01 and no DNS lookups
pub fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.engine.config_root = dir.join("nginx");
    config.engine.data_dir = dir.join("data");
    config.engine.substitute_wildcard = false;
    config.acme.email = Some("ops@example.com".into());
    config.http01 = Http01Config {
        bind: "127.0.0.1".into(),
        port: 0,
    };
    config.dns01.verify_propagation = false;
    config.sync.timeout_secs = 5;
    config
}

/// An engine wired to scripted collaborators in a temporary directory
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<JsonStore>,
    pub authority: Arc<ScriptedAuthority>,
    pub notifier: Arc<RecordingNotifier>,
    pub dns: Arc<MockDns>,
    pub engine: Arc<Engine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_authority(ScriptedAuthority::default())
    }

    pub fn with_authority(authority: ScriptedAuthority) -> Self {
        Self::assemble(TempDir::new().unwrap(), authority, None)
    }

    /// Engine whose management endpoint serves the certificate `serving`
    /// loads from the configuration root
    pub fn with_serving(serving: impl FnOnce(&Path) -> ServingCertificate) -> Self {
        let dir = TempDir::new().unwrap();
        let serving = Arc::new(serving(&dir.path().join("nginx")));
        Self::assemble(dir, ScriptedAuthority::default(), Some(serving))
    }

    fn assemble(dir: TempDir, authority: ScriptedAuthority, serving: Option<Arc<ServingCertificate>>) -> Self {
        let store = Arc::new(JsonStore::in_memory());
        let authority = Arc::new(authority);
        let notifier = Arc::new(RecordingNotifier::default());
        let dns = Arc::new(MockDns::default());

        let mut builder = Engine::builder(config(dir.path()), store.clone())
            .authority(authority.clone())
            .notifier(notifier.clone())
            .reloader(Arc::new(NoopReloader))
            .registry(Arc::new(registry(Arc::clone(&dns))));
        if let Some(serving) = serving {
            builder = builder.serving(serving);
        }
        let engine = builder.build();

        Self {
            dir,
            store,
            authority,
            notifier,
            dns,
            engine,
        }
    }

    pub fn conf_root(&self) -> std::path::PathBuf {
        self.dir.path().join("nginx")
    }

    /// Stored credential for [`MockDns`]
    pub async fn dns_credential(&self) -> DnsCredential {
        self.store
            .create_credential(DnsCredential {
                name: "mock".into(),
                provider: MOCK_DNS.into(),
                config: BTreeMap::from([("MOCK_DNS_TOKEN".to_string(), "secret".to_string())]),
                ..Default::default()
            })
            .await
            .unwrap()
    }
}
