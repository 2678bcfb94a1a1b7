//! Error types for the certificate lifecycle engine
//!
//! Every terminal failure of an operation is an [`EngineError`]; its variant
//! tells the caller which class of failure happened (configuration, sandbox,
//! CA protocol, filesystem, store) so it can be presented actionably.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use certward_common::{AccountId, CertificateId, CredentialId};

pub use crate::challenge::dns::DnsProviderError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level operation error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid request or settings, detected before contacting the CA
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A path escaped the proxy configuration root
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Neither the requested nor the default ACME account could be resolved
    #[error("failed to resolve ACME account: {0}")]
    Account(String),

    /// Challenge strategy could not be wired
    #[error("challenge setup failed: {0}")]
    Challenge(#[from] ChallengeError),

    /// The CA rejected or failed an obtain/renew/revoke/register call
    #[error("certificate authority error: {0}")]
    Authority(#[from] AuthorityError),

    /// Writing the issued material failed after a successful CA exchange
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("certificate inspection failed: {0}")]
    CertInfo(#[from] CertInfoError),

    /// Revocation was requested for a certificate with no stored CA resource
    #[error("certificate resource is nil")]
    ResourceIsNil,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

impl EngineError {
    pub fn certificate_not_found(id: CertificateId) -> Self {
        Self::NotFound {
            kind: "certificate",
            id: id.to_string(),
        }
    }

    pub fn account_not_found(id: AccountId) -> Self {
        Self::NotFound {
            kind: "acme account",
            id: id.to_string(),
        }
    }
}

/// Request and settings errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("certificate name is empty")]
    EmptyFilename,

    #[error("domain list is empty")]
    EmptyDomains,

    #[error("domain at position {0} is empty")]
    EmptyDomain(usize),

    #[error("certificate path is empty")]
    EmptyCertificatePath,

    #[error("unknown key type '{0}'")]
    UnknownKeyType(String),

    #[error("dns01 challenge requires a DNS credential")]
    MissingCredential,
}

/// Path escaped the configuration root
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("path {path:?} is outside the configuration root {root:?}")]
    Escape { path: PathBuf, root: PathBuf },

    #[error("empty path")]
    EmptyPath,
}

/// Challenge configuration errors
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("unknown DNS provider '{0}'")]
    UnknownProvider(String),

    #[error("DNS credential {0} not found")]
    CredentialNotFound(CredentialId),

    #[error("DNS provider '{provider}' has no configuration")]
    EmptyProviderConfig { provider: String },

    #[error("DNS provider '{provider}' requires environment key '{key}'")]
    MissingEnv { provider: String, key: String },

    #[error("failed to construct DNS provider '{provider}': {source}")]
    ProviderConstruction {
        provider: String,
        #[source]
        source: DnsProviderError,
    },

    #[error("HTTP-01 responder failed: {0}")]
    Responder(String),

    #[error(transparent)]
    Dns(#[from] DnsProviderError),
}

/// Errors from the certificate authority seam
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("account registration failed: {0}")]
    Registration(String),

    #[error("account key is invalid: {0}")]
    AccountKey(String),

    #[error("failed to create certificate order: {0}")]
    Order(String),

    #[error("challenge validation failed for domain '{domain}': {message}")]
    ChallengeValidation { domain: String, message: String },

    #[error("no {kind} challenge offered for domain '{domain}'")]
    NoChallenge { kind: &'static str, domain: String },

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("failed to build certificate request: {0}")]
    Csr(String),

    #[error("failed to finalize certificate: {0}")]
    Finalization(String),

    #[error("revocation failed: {0}")]
    Revocation(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("ACME protocol error: {0}")]
    Protocol(String),
}

impl From<instant_acme::Error> for AuthorityError {
    fn from(e: instant_acme::Error) -> Self {
        AuthorityError::Protocol(e.to_string())
    }
}

/// Filesystem errors while writing issued material
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to create certificate directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write certificate {path:?}: {source}")]
    WriteCertificate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write private key {path:?}: {source}")]
    WriteKey {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{kind} {id} not found")]
    Missing { kind: &'static str, id: u64 },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Certificate inspection errors
#[derive(Debug, Error)]
pub enum CertInfoError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("failed to read certificate {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse certificate: {0}")]
    Parse(String),
}

/// Per-node fleet sync errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("request to node failed: {0}")]
    Transport(String),

    #[error("push timed out after {0:?}")]
    Timeout(Duration),

    #[error("node answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("node secret rejected")]
    Unauthorized,

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("failed to write synced material: {0}")]
    Write(#[from] PersistError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid sync payload: {0}")]
    Payload(String),
}

/// Management TLS certificate loading errors
#[derive(Debug, Error)]
pub enum ServingError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificate found in {0:?}")]
    NoCertificate(PathBuf),

    #[error("no private key found in {0:?}")]
    NoKey(PathBuf),

    #[error("unsupported private key: {0}")]
    InvalidKey(String),
}
