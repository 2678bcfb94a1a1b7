//! ACME implementation of [`CertificateAuthority`] over `instant-acme`

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, ExternalAccountKey, Identifier,
    NewAccount, NewOrder, Order, OrderStatus, RevocationRequest,
};
use rustls::pki_types::CertificateDer;
use tracing::{debug, info, trace, warn};

use super::csr::{build_csr, csr_der_from_pem, split_chain};
use super::key::{coordinates_from_pkcs8_b64, pkcs8_b64_from_coordinates};
use super::{CertificateAuthority, OrderContext, Registration};
use crate::challenge::{ChallengeSolver, PresentedChallenge};
use crate::error::AuthorityError;
use crate::model::{AcmeAccount, CertificateResource, ChallengeMethod};
use crate::oplog::OperationLog;

/// Time allowed for all authorizations to validate
const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(120);
/// Time allowed between finalization and certificate download
const ISSUANCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Talks ACME (RFC 8555) to the account's CA directory
#[derive(Debug, Clone)]
pub struct InstantAcmeAuthority {
    challenge_timeout: Duration,
    issuance_timeout: Duration,
    poll_interval: Duration,
}

impl Default for InstantAcmeAuthority {
    fn default() -> Self {
        Self {
            challenge_timeout: CHALLENGE_TIMEOUT,
            issuance_timeout: ISSUANCE_TIMEOUT,
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl InstantAcmeAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(mut self, challenge: Duration, issuance: Duration) -> Self {
        self.challenge_timeout = challenge;
        self.issuance_timeout = issuance;
        self
    }

    /// Rebuild the client account from stored coordinates
    async fn load_account(&self, account: &AcmeAccount, log: &OperationLog) -> Result<Account, AuthorityError> {
        let registration = account
            .registration
            .as_ref()
            .ok_or_else(|| AuthorityError::Registration("account is not registered".into()))?;
        let key = account
            .key
            .as_ref()
            .ok_or_else(|| AuthorityError::AccountKey("account has no key".into()))?;

        if let Some(proxy) = account.proxy.as_deref().filter(|p| !p.is_empty()) {
            log.info(format!("Outbound proxy {} is not supported for CA traffic, connecting directly", proxy));
        }

        let credentials: AccountCredentials = serde_json::from_value(serde_json::json!({
            "id": registration.uri,
            "key_pkcs8": pkcs8_b64_from_coordinates(key)?,
            "directory": account.ca_directory,
        }))
        .map_err(|e| AuthorityError::AccountKey(format!("failed to rebuild credentials: {}", e)))?;

        let acme_account = Account::builder()?.from_credentials(credentials).await?;
        Ok(acme_account)
    }

    /// Create the order, solve every pending authorization and download the chain
    async fn run_order(&self, order: OrderContext<'_>, csr_der: &[u8]) -> Result<(String, String), AuthorityError> {
        let log = order.log;
        let account = self.load_account(order.account, log).await?;

        let identifiers: Vec<Identifier> = order
            .request
            .domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();

        log.info(format!("Creating order for {}", order.request.domains.join(", ")));
        let mut acme_order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| AuthorityError::Order(e.to_string()))?;
        let order_url = acme_order.url().to_string();

        let mut presented = Vec::new();
        let solved = self
            .solve_authorizations(&mut acme_order, order.solver, log, &mut presented)
            .await;

        // Challenges come down whatever the outcome
        for challenge in &presented {
            order.solver.cleanup(challenge, log).await;
        }
        solved?;

        log.info("Validations succeeded, requesting certificate");
        acme_order
            .finalize_csr(csr_der)
            .await
            .map_err(|e| AuthorityError::Finalization(e.to_string()))?;

        let chain = self.wait_for_certificate(&mut acme_order).await?;
        log.info("Server responded with a certificate");
        Ok((order_url, chain))
    }

    async fn solve_authorizations(
        &self,
        acme_order: &mut Order,
        solver: &ChallengeSolver,
        log: &OperationLog,
        presented: &mut Vec<PresentedChallenge>,
    ) -> Result<(), AuthorityError> {
        let (challenge_type, kind) = match solver.method() {
            ChallengeMethod::Http01 => (ChallengeType::Http01, "HTTP-01"),
            ChallengeMethod::Dns01 => (ChallengeType::Dns01, "DNS-01"),
        };

        let mut domains = Vec::new();
        {
            let mut authorizations = acme_order.authorizations();
            while let Some(result) = authorizations.next().await {
                let mut authz = result.map_err(|e| AuthorityError::Order(format!("failed to get authorization: {}", e)))?;

                let identifier = authz.identifier();
                let domain = match &identifier.identifier {
                    Identifier::Dns(domain) => domain.clone(),
                    _ => continue,
                };

                domains.push(domain.clone());
                debug!(domain = %domain, status = ?authz.status, "Processing authorization");
                if authz.status == AuthorizationStatus::Valid {
                    log.info(format!("[{}] Authorization already valid, skipping challenge", domain));
                    continue;
                }

                let mut challenge = authz
                    .challenge(challenge_type.clone())
                    .ok_or_else(|| AuthorityError::NoChallenge {
                        kind,
                        domain: domain.clone(),
                    })?;

                let key_authorization = challenge.key_authorization();
                let token = challenge.token.clone();

                log.info(format!("[{}] Solving {} challenge", domain, kind));
                let shown = solver
                    .present(&domain, &token, key_authorization.as_str(), log)
                    .await?;
                presented.push(shown);

                challenge
                    .set_ready()
                    .await
                    .map_err(|e| AuthorityError::ChallengeValidation {
                        domain: domain.clone(),
                        message: e.to_string(),
                    })?;
            }
        }

        self.wait_for_ready(acme_order, &domains.join(", ")).await
    }

    async fn wait_for_ready(&self, acme_order: &mut Order, domains: &str) -> Result<(), AuthorityError> {
        let deadline = tokio::time::Instant::now() + self.challenge_timeout;

        loop {
            let state = acme_order.refresh().await?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AuthorityError::ChallengeValidation {
                        domain: domains.to_string(),
                        message: "order became invalid".into(),
                    });
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(AuthorityError::Timeout(
                            "timed out waiting for challenge validation".into(),
                        ));
                    }
                    trace!(status = ?state.status, "Order not ready yet");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn wait_for_certificate(&self, acme_order: &mut Order) -> Result<String, AuthorityError> {
        let deadline = tokio::time::Instant::now() + self.issuance_timeout;

        loop {
            let status = acme_order.refresh().await?.status;
            match status {
                OrderStatus::Valid => {
                    return acme_order
                        .certificate()
                        .await
                        .map_err(|e| AuthorityError::Finalization(format!("failed to download certificate: {}", e)))?
                        .ok_or_else(|| AuthorityError::Finalization("no certificate in response".into()));
                }
                OrderStatus::Invalid => {
                    return Err(AuthorityError::Finalization("order became invalid".into()));
                }
                _ => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(AuthorityError::Timeout("timed out waiting for certificate".into()));
                    }
                    tokio::time::sleep(self.poll_interval / 2).await;
                }
            }
        }
    }
}

fn decode_hmac(value: &str) -> Result<Vec<u8>, AuthorityError> {
    URL_SAFE_NO_PAD
        .decode(value.trim())
        .or_else(|_| URL_SAFE.decode(value.trim()))
        .map_err(|e| AuthorityError::Registration(format!("EAB HMAC key is not base64url: {}", e)))
}

fn resource_from_chain(
    domain: &str,
    cert_url: String,
    chain: &str,
    key_pem: Vec<u8>,
    csr_pem: Vec<u8>,
) -> Result<CertificateResource, AuthorityError> {
    let (certificate, issuer_certificate) = split_chain(chain)?;
    Ok(CertificateResource {
        domain: domain.to_string(),
        cert_url,
        private_key: key_pem,
        certificate,
        issuer_certificate,
        csr: csr_pem,
    })
}

#[async_trait]
impl CertificateAuthority for InstantAcmeAuthority {
    async fn register(&self, account: &AcmeAccount, log: &OperationLog) -> Result<Registration, AuthorityError> {
        let contact = format!("mailto:{}", account.email);
        let contacts = [contact.as_str()];

        let eab = match (account.eab_key_id.as_deref(), account.eab_hmac_key.as_deref()) {
            (Some(kid), Some(hmac)) if !kid.is_empty() && !hmac.is_empty() => {
                log.info(format!("Using external account binding {}", kid));
                Some(ExternalAccountKey::new(kid.to_string(), &decode_hmac(hmac)?))
            }
            _ => None,
        };

        info!(email = %account.email, directory = %account.ca_directory, "Registering ACME account");
        let (acme_account, credentials) = Account::builder()?
            .create(
                &NewAccount {
                    contact: &contacts,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                account.ca_directory.clone(),
                eab.as_ref(),
            )
            .await
            .map_err(|e| AuthorityError::Registration(e.to_string()))?;

        let serialized = serde_json::to_value(&credentials)
            .map_err(|e| AuthorityError::AccountKey(format!("failed to serialize credentials: {}", e)))?;
        let pkcs8 = serialized
            .get("key_pkcs8")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthorityError::AccountKey("credentials carry no PKCS#8 key".into()))?;

        Ok(Registration {
            account_url: acme_account.id().to_string(),
            key: coordinates_from_pkcs8_b64(pkcs8)?,
        })
    }

    async fn obtain(&self, order: OrderContext<'_>) -> Result<CertificateResource, AuthorityError> {
        let request = order.request;
        let bundle = build_csr(&request.domains, request.key_type, request.must_staple)?;
        order.log.info(format!("Generated {} key and certificate request", request.key_type));

        let (cert_url, chain) = self.run_order(order, &bundle.csr_der).await?;
        resource_from_chain(
            request.cert_name(),
            cert_url,
            &chain,
            bundle.key_pem.into_bytes(),
            bundle.csr_pem.into_bytes(),
        )
    }

    async fn renew(
        &self,
        order: OrderContext<'_>,
        prior: &CertificateResource,
    ) -> Result<CertificateResource, AuthorityError> {
        if prior.csr.is_empty() || prior.private_key.is_empty() {
            warn!(domain = %prior.domain, "Prior resource has no CSR or key, issuing with a fresh key");
            return self.obtain(order).await;
        }

        order.log.info("Reusing the existing key and certificate request");
        let csr_der = csr_der_from_pem(&prior.csr)?;
        let (cert_url, chain) = self.run_order(order, &csr_der).await?;
        resource_from_chain(
            order.request.cert_name(),
            cert_url,
            &chain,
            prior.private_key.clone(),
            prior.csr.clone(),
        )
    }

    async fn revoke(
        &self,
        account: &AcmeAccount,
        resource: &CertificateResource,
        log: &OperationLog,
    ) -> Result<(), AuthorityError> {
        let leaf = pem::parse(&resource.certificate)
            .map_err(|e| AuthorityError::Revocation(format!("stored certificate is not PEM: {}", e)))?;
        let der = CertificateDer::from(leaf.contents().to_vec());

        let acme_account = self.load_account(account, log).await?;
        acme_account
            .revoke(&RevocationRequest {
                certificate: &der,
                reason: None,
            })
            .await
            .map_err(|e| AuthorityError::Revocation(e.to_string()))?;

        info!(domain = %resource.domain, "Certificate revoked");
        Ok(())
    }
}
