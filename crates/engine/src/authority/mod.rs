//! Certificate authority seam
//!
//! The engine talks to the CA only through [`CertificateAuthority`]. The
//! production implementation, [`InstantAcmeAuthority`], speaks ACME through
//! `instant-acme`; tests substitute a scripted authority.

mod account;
mod acme;
mod csr;
pub mod key;

pub use account::{AccountResolver, DEFAULT_ACCOUNT_NAME};
pub use acme::InstantAcmeAuthority;
pub use csr::{build_csr, csr_der_from_pem, split_chain, CsrBundle, MUST_STAPLE_OID};

use async_trait::async_trait;

use crate::challenge::ChallengeSolver;
use crate::error::AuthorityError;
use crate::model::{AccountKey, AcmeAccount, CertificateResource};
use crate::oplog::OperationLog;
use crate::request::CertificateRequest;

/// Outcome of an account registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Account URL at the CA
    pub account_url: String,
    pub key: AccountKey,
}

/// Everything one obtain or renew needs
#[derive(Debug, Clone, Copy)]
pub struct OrderContext<'a> {
    pub account: &'a AcmeAccount,
    pub request: &'a CertificateRequest,
    pub solver: &'a ChallengeSolver,
    pub log: &'a OperationLog,
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Create (or re-create) the account at the CA
    async fn register(
        &self,
        account: &AcmeAccount,
        log: &OperationLog,
    ) -> Result<Registration, AuthorityError>;

    /// Issue a certificate with a fresh key
    async fn obtain(&self, order: OrderContext<'_>) -> Result<CertificateResource, AuthorityError>;

    /// Reissue reusing the prior resource's CSR and key
    async fn renew(
        &self,
        order: OrderContext<'_>,
        prior: &CertificateResource,
    ) -> Result<CertificateResource, AuthorityError>;

    /// Revoke the leaf certificate of `resource`
    async fn revoke(
        &self,
        account: &AcmeAccount,
        resource: &CertificateResource,
        log: &OperationLog,
    ) -> Result<(), AuthorityError>;
}
