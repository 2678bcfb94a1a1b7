//! Challenge strategies
//!
//! [`ChallengeConfigurator`] turns a request's challenge method into a
//! [`ChallengeSolver`] for one operation. A DNS-01 solver owns the bound
//! provider environment, so dropping the solver is the cleanup.

pub mod dns;
pub mod http01;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use certward_config::{Dns01Config, Http01Config};

use crate::error::{ChallengeError, ConfigError, EngineError, EngineResult};
use crate::model::ChallengeMethod;
use crate::oplog::OperationLog;
use crate::request::CertificateRequest;
use crate::store::Store;

use dns::{Dns01Solver, DnsLookup, DnsProviderError, PropagationPolicy, ProviderEnv, ProviderRegistry, PublishedRecord};
use http01::{ChallengeManager, Http01Responder};

/// A challenge made available to the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentedChallenge {
    Http01 { token: String },
    Dns01(PublishedRecord),
}

/// Strategy wired for one operation
#[derive(Debug)]
pub enum ChallengeSolver {
    Http01 { tokens: ChallengeManager },
    Dns01(Dns01Solver),
}

impl ChallengeSolver {
    pub fn method(&self) -> ChallengeMethod {
        match self {
            ChallengeSolver::Http01 { .. } => ChallengeMethod::Http01,
            ChallengeSolver::Dns01(_) => ChallengeMethod::Dns01,
        }
    }

    /// Make the challenge for `domain` answerable
    pub async fn present(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
        log: &OperationLog,
    ) -> Result<PresentedChallenge, ChallengeError> {
        match self {
            ChallengeSolver::Http01 { tokens } => {
                log.info(format!("[{}] Serving HTTP-01 token {}", domain, token));
                tokens.add_challenge(token, key_authorization);
                Ok(PresentedChallenge::Http01 {
                    token: token.to_string(),
                })
            }
            ChallengeSolver::Dns01(solver) => {
                let record = solver.present(domain, key_authorization, log).await?;
                Ok(PresentedChallenge::Dns01(record))
            }
        }
    }

    /// Withdraw a presented challenge; never fails
    pub async fn cleanup(&self, presented: &PresentedChallenge, log: &OperationLog) {
        match (self, presented) {
            (ChallengeSolver::Http01 { tokens }, PresentedChallenge::Http01 { token }) => {
                tokens.remove_challenge(token);
            }
            (ChallengeSolver::Dns01(solver), PresentedChallenge::Dns01(record)) => {
                solver.cleanup(record, log).await;
            }
            _ => debug!("Challenge kind does not match solver, nothing to clean up"),
        }
    }
}

/// Wires challenge strategies from configuration and stored credentials
pub struct ChallengeConfigurator {
    http01: Http01Config,
    dns01: Dns01Config,
    tokens: ChallengeManager,
    responder: OnceCell<Http01Responder>,
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn Store>,
}

impl ChallengeConfigurator {
    pub fn new(
        http01: Http01Config,
        dns01: Dns01Config,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            http01,
            dns01,
            tokens: ChallengeManager::new(),
            responder: OnceCell::new(),
            registry,
            store,
        }
    }

    pub fn tokens(&self) -> &ChallengeManager {
        &self.tokens
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Address of the HTTP-01 responder, starting it on first use
    pub async fn responder_addr(&self) -> Result<SocketAddr, ChallengeError> {
        let responder = self
            .responder
            .get_or_try_init(|| async {
                let addr = self
                    .http01
                    .listen_addr()
                    .map_err(ChallengeError::Responder)?;
                Http01Responder::start(addr, self.tokens.clone()).await
            })
            .await?;
        Ok(responder.local_addr())
    }

    /// Build the solver for `request`
    ///
    /// Any failure leaves nothing wired: a partially built DNS solver drops
    /// its environment scope on the way out.
    pub async fn configure(
        &self,
        request: &CertificateRequest,
        log: &OperationLog,
    ) -> EngineResult<ChallengeSolver> {
        match request.challenge_method {
            ChallengeMethod::Http01 => {
                let addr = self.responder_addr().await?;
                log.info(format!("Using HTTP-01 challenge, responder on {}", addr));
                Ok(ChallengeSolver::Http01 {
                    tokens: self.tokens.clone(),
                })
            }
            ChallengeMethod::Dns01 => {
                let solver = self.configure_dns(request, log).await?;
                Ok(ChallengeSolver::Dns01(solver))
            }
        }
    }

    async fn configure_dns(
        &self,
        request: &CertificateRequest,
        log: &OperationLog,
    ) -> EngineResult<Dns01Solver> {
        let credential_id = request
            .dns_credential_id
            .ok_or(EngineError::Config(ConfigError::MissingCredential))?;
        let credential = self
            .store
            .get_credential(credential_id)
            .await?
            .ok_or(ChallengeError::CredentialNotFound(credential_id))?;

        let descriptor = self
            .registry
            .get(&credential.provider)
            .ok_or_else(|| ChallengeError::UnknownProvider(credential.provider.clone()))?;

        log.info(format!(
            "Using DNS-01 challenge with provider {} (credential {})",
            descriptor.code, credential.name
        ));

        let env = ProviderEnv::bind(&descriptor.code, &credential.config, &descriptor.required)?;
        let provider = (descriptor.build)(&env).map_err(|source| ChallengeError::ProviderConstruction {
            provider: descriptor.code.clone(),
            source,
        })?;

        let mut solver = Dns01Solver::new(provider, env);

        let wants_lookup = self.dns01.verify_propagation || !request.disable_cname;
        if wants_lookup {
            let nameservers = self
                .dns01
                .nameserver_addrs()
                .map_err(|e| ChallengeError::Dns(DnsProviderError::Configuration(e)))?;
            if !nameservers.is_empty() {
                let listed: Vec<String> = nameservers.iter().map(|a| a.to_string()).collect();
                log.info(format!("Using recursive nameservers {}", listed.join(", ")));
            }
            let lookup = Arc::new(DnsLookup::new(&nameservers));

            if !request.disable_cname {
                solver = solver.with_cname_following(Arc::clone(&lookup));
            }
            if self.dns01.verify_propagation {
                solver = solver.with_propagation(lookup, PropagationPolicy::from(&self.dns01));
            }
        }

        Ok(solver)
    }
}
