//! Issue, renew and revoke
//!
//! Every operation runs inside the [`Gate`] and walks the same steps:
//! resolve the account, wire the challenge, talk to the CA, write files,
//! update the record. Fleet sync runs afterwards, outside the gate, as a
//! spawned task whose handle is returned to the caller.
//!
//! The operation log is closed (and its transcript persisted) on every exit
//! path, after a terminal success or error line.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use certward_common::CertificateId;
use certward_config::Config;

use crate::authority::{AccountResolver, CertificateAuthority, InstantAcmeAuthority, OrderContext};
use crate::certinfo::CertificateInfo;
use crate::challenge::dns::ProviderRegistry;
use crate::challenge::ChallengeConfigurator;
use crate::error::{EngineError, EngineResult};
use crate::gate::Gate;
use crate::model::{AcmeAccount, AutoCertMode, CertificateResource, ManagedCertificate};
use crate::notify::{Notifier, TracingNotifier};
use crate::oplog::OperationLog;
use crate::persist::write_resource;
use crate::reload::{CommandReloader, ProxyReloader};
use crate::request::CertificateRequest;
use crate::sandbox::ConfRoot;
use crate::serving::ServingCertificate;
use crate::store::Store;
use crate::sync::{FleetSync, SyncOutcome, SyncPayload};

/// A prior issuance younger than this is renewed through the existing key and CSR
pub const RENEW_WINDOW_DAYS: i64 = 21;

/// Result of a successful issue or renew
#[derive(Debug)]
pub struct IssueOutcome {
    pub certificate: ManagedCertificate,
    /// Fleet sync task, present when the certificate has sync targets
    pub sync: Option<JoinHandle<Vec<SyncOutcome>>>,
}

/// The certificate lifecycle engine
pub struct Engine {
    root: ConfRoot,
    substitute_wildcard: bool,
    gate: Arc<Gate>,
    store: Arc<dyn Store>,
    authority: Arc<dyn CertificateAuthority>,
    accounts: AccountResolver,
    challenges: ChallengeConfigurator,
    reloader: Arc<dyn ProxyReloader>,
    notifier: Arc<dyn Notifier>,
    sync: FleetSync,
    serving: Option<Arc<ServingCertificate>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.root)
            .field("processing", &self.gate.is_processing())
            .finish()
    }
}

/// Assembles an [`Engine`] from configuration plus replaceable collaborators
pub struct EngineBuilder {
    config: Config,
    store: Arc<dyn Store>,
    gate: Option<Arc<Gate>>,
    authority: Option<Arc<dyn CertificateAuthority>>,
    reloader: Option<Arc<dyn ProxyReloader>>,
    notifier: Option<Arc<dyn Notifier>>,
    registry: Option<Arc<ProviderRegistry>>,
    serving: Option<Arc<ServingCertificate>>,
}

impl EngineBuilder {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            gate: None,
            authority: None,
            reloader: None,
            notifier: None,
            registry: None,
            serving: None,
        }
    }

    pub fn gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn authority(mut self, authority: Arc<dyn CertificateAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn reloader(mut self, reloader: Arc<dyn ProxyReloader>) -> Self {
        self.reloader = Some(reloader);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn serving(mut self, serving: Arc<ServingCertificate>) -> Self {
        self.serving = Some(serving);
        self
    }

    pub fn build(self) -> Arc<Engine> {
        let config = self.config;
        let authority = self.authority.unwrap_or_else(|| {
            Arc::new(InstantAcmeAuthority::new().with_timeouts(
                Duration::from_secs(config.acme.challenge_timeout_secs),
                Duration::from_secs(config.acme.issuance_timeout_secs),
            ))
        });
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ProviderRegistry::builtin()));

        Arc::new(Engine {
            root: ConfRoot::new(&config.engine.config_root),
            substitute_wildcard: config.engine.substitute_wildcard,
            gate: self.gate.unwrap_or_else(Gate::new),
            accounts: AccountResolver::new(Arc::clone(&self.store), Arc::clone(&authority), config.acme.clone()),
            challenges: ChallengeConfigurator::new(
                config.http01.clone(),
                config.dns01.clone(),
                registry,
                Arc::clone(&self.store),
            ),
            reloader: self
                .reloader
                .unwrap_or_else(|| Arc::new(CommandReloader::new(config.reload.command.clone()))),
            sync: FleetSync::new(Duration::from_secs(config.sync.timeout_secs), Arc::clone(&notifier)),
            notifier,
            serving: self.serving,
            authority,
            store: self.store,
        })
    }
}

impl Engine {
    pub fn builder(config: Config, store: Arc<dyn Store>) -> EngineBuilder {
        EngineBuilder::new(config, store)
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn root(&self) -> &ConfRoot {
        &self.root
    }

    pub fn challenges(&self) -> &ChallengeConfigurator {
        &self.challenges
    }

    /// Certificate served by the management endpoint, when it is TLS
    pub fn serving(&self) -> Option<&Arc<ServingCertificate>> {
        self.serving.as_ref()
    }

    /// Issue (or reissue) the certificate described by `request`
    pub async fn issue(&self, request: CertificateRequest, log: &OperationLog) -> EngineResult<IssueOutcome> {
        let result = self.run_issue(request, None, log).await;
        self.finish(log, &result, |outcome| {
            format!("Certificate {} issued successfully", outcome.certificate.name)
        })
        .await;
        result
    }

    /// Renew a managed certificate with its stored settings
    pub async fn renew(&self, cert: &ManagedCertificate, log: &OperationLog) -> EngineResult<IssueOutcome> {
        log.attach(cert.id);
        let result = self
            .run_issue(CertificateRequest::from_managed(cert), Some(cert.id), log)
            .await;
        self.finish(log, &result, |outcome| {
            format!("Certificate {} renewed successfully", outcome.certificate.name)
        })
        .await;
        result
    }

    /// Revoke the stored certificate `id` at the CA
    pub async fn revoke(&self, id: CertificateId, log: &OperationLog) -> EngineResult<ManagedCertificate> {
        let result = self.run_revoke(id, log).await;
        self.finish(log, &result, |cert| format!("Certificate {} revoked", cert.name))
            .await;
        result
    }

    async fn finish<T>(&self, log: &OperationLog, result: &EngineResult<T>, success: impl FnOnce(&T) -> String) {
        match result {
            Ok(value) => log.success(success(value)),
            Err(e) => log.error(e),
        }
        if let Err(e) = log.close(self.store.as_ref()).await {
            warn!(operation = %log.id(), error = %e, "Failed to persist operation log");
        }
    }

    /// Issue for `request`, updating record `target` when renewing a known
    /// certificate or the record named after the request otherwise
    async fn run_issue(
        &self,
        mut request: CertificateRequest,
        target: Option<CertificateId>,
        log: &OperationLog,
    ) -> EngineResult<IssueOutcome> {
        request.validate()?;

        let _guard = self.gate.acquire().await;
        log.info(format!("Processing certificate {}", request.cert_name()));

        // Names are not unique (synced copies share them), ids are
        let mut cert = match target {
            Some(id) => self
                .store
                .get_certificate(id)
                .await?
                .ok_or_else(|| EngineError::certificate_not_found(id))?,
            None => self.store.find_or_create_certificate(request.cert_name()).await?,
        };
        log.attach(cert.id);

        if request.resource.is_none() && cert.key_type == request.key_type {
            request.resource = cert.resource.clone();
        }

        // Paths are checked before anything leaves the process
        let paths = request.paths(&self.root, self.substitute_wildcard).clone();
        self.root.resolve(&paths.certificate)?;
        self.root.resolve(&paths.key)?;

        let account = self.accounts.resolve(request.acme_account_id, log).await?;
        log.info(format!("Using ACME account {} ({})", account.name, account.email));

        let solver = self.challenges.configure(&request, log).await?;
        let order = OrderContext {
            account: &account,
            request: &request,
            solver: &solver,
            log,
        };

        let prior = request.resource.as_ref();
        let resource = match prior.filter(|p| self.should_renew(p, &request)) {
            Some(prior) => {
                log.info("Renewing certificate with the existing order");
                self.authority.renew(order, prior).await?
            }
            None => {
                log.info("Obtaining a new certificate");
                self.authority.obtain(order).await?
            }
        };
        drop(solver);

        log.info(format!("Writing certificate to {}", paths.certificate.display()));
        let written = write_resource(&self.root, &paths, &resource)?;
        log.info(format!("Writing private key to {}", written.key.display()));

        if request.revoke_old {
            if let Some(prior) = prior.filter(|p| p.certificate != resource.certificate) {
                self.revoke_superseded(&account, prior, log).await;
            }
        }

        cert.domains = request.domains.clone();
        cert.ssl_certificate_path = written.certificate.to_string_lossy().into_owned();
        cert.ssl_certificate_key_path = written.key.to_string_lossy().into_owned();
        cert.auto_cert = AutoCertMode::Enabled;
        cert.challenge_method = request.challenge_method;
        cert.dns_credential_id = request.dns_credential_id;
        cert.acme_account_id = Some(account.id);
        cert.key_type = request.key_type;
        cert.must_staple = request.must_staple;
        cert.disable_cname = request.disable_cname;
        cert.revoke_old = request.revoke_old;
        if !request.sync_node_ids.is_empty() {
            cert.sync_node_ids = request.sync_node_ids.clone();
        }
        cert.resource = Some(resource);
        cert.updated_at = Some(Utc::now());
        self.store.update_certificate(&cert).await?;

        self.reload_proxy(log).await;

        let sync = self.spawn_sync(&cert).await;
        info!(cert = %cert.name, id = %cert.id, "Certificate issued");
        Ok(IssueOutcome { certificate: cert, sync })
    }

    /// Renew (same key and CSR) only for recent issuances covering the same names
    fn should_renew(&self, prior: &CertificateResource, request: &CertificateRequest) -> bool {
        let info = match CertificateInfo::from_pem(&prior.certificate) {
            Ok(info) => info,
            Err(e) => {
                debug!(error = %e, "Prior certificate unreadable, obtaining instead");
                return false;
            }
        };
        if !info.issued_within(chrono::Duration::days(RENEW_WINDOW_DAYS), Utc::now()) {
            return false;
        }

        let mut issued = info.dns_names;
        let mut wanted = request.domains.clone();
        issued.sort_unstable();
        wanted.sort_unstable();
        issued == wanted
    }

    async fn revoke_superseded(&self, account: &AcmeAccount, prior: &CertificateResource, log: &OperationLog) {
        log.info("Revoking the superseded certificate");
        match self.authority.revoke(account, prior, log).await {
            Ok(()) => log.info("Superseded certificate revoked"),
            Err(e) => {
                warn!(error = %e, "Failed to revoke superseded certificate");
                log.info(format!("Failed to revoke superseded certificate: {}", e));
            }
        }
    }

    async fn reload_proxy(&self, log: &OperationLog) {
        log.info("Reloading reverse proxy");
        let outcome = self.reloader.reload().await;
        if outcome.is_ok() {
            log.info("Reverse proxy reloaded");
        } else {
            warn!(severity = %outcome.severity, output = %outcome.output, "Reverse proxy reload failed");
            log.info(format!(
                "Reverse proxy reload reported {}: {}",
                outcome.severity,
                outcome.output.trim()
            ));
        }
    }

    async fn spawn_sync(&self, cert: &ManagedCertificate) -> Option<JoinHandle<Vec<SyncOutcome>>> {
        if cert.sync_node_ids.is_empty() {
            return None;
        }
        let resource = cert.resource.as_ref()?;

        let nodes = match self.store.list_nodes(&cert.sync_node_ids).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(cert = %cert.name, error = %e, "Failed to load sync nodes");
                return None;
            }
        };

        let payload = SyncPayload {
            name: cert.name.clone(),
            ssl_certificate_path: cert.ssl_certificate_path.clone(),
            ssl_certificate_key_path: cert.ssl_certificate_key_path.clone(),
            ssl_certificate: String::from_utf8_lossy(&resource.full_chain()).into_owned(),
            ssl_certificate_key: String::from_utf8_lossy(&resource.private_key).into_owned(),
            key_type: cert.key_type,
        };

        let sync = self.sync.clone();
        let name = cert.name.clone();
        Some(tokio::spawn(async move { sync.push(&name, nodes, payload).await }))
    }

    async fn run_revoke(&self, id: CertificateId, log: &OperationLog) -> EngineResult<ManagedCertificate> {
        let _guard = self.gate.acquire().await;

        let cert = self
            .store
            .get_certificate(id)
            .await?
            .ok_or_else(|| EngineError::certificate_not_found(id))?;
        log.attach(cert.id);
        log.info(format!("Revoking certificate {}", cert.name));

        let resource = cert.resource.as_ref().ok_or(EngineError::ResourceIsNil)?;

        let account = self.accounts.resolve(cert.acme_account_id, log).await?;
        self.authority.revoke(&account, resource, log).await?;
        log.info("Certificate revoked by the CA");

        if let Some(serving) = &self.serving {
            let serves = self
                .root
                .resolve(&cert.ssl_certificate_path)
                .map(|path| serving.serves(&path))
                .unwrap_or(false);
            if serves {
                log.info("Revoked certificate serves the management endpoint, reloading it");
                if let Err(e) = serving.reload() {
                    log.info(format!("Management certificate reload failed: {}", e));
                }
            }
        }

        self.reload_proxy(log).await;
        Ok(cert)
    }
}
