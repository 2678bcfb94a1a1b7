//! Persistent data model
//!
//! Managed certificates, ACME accounts, DNS credentials and fleet nodes, plus
//! the CA's certificate resource bundle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use certward_common::{AccountId, CertificateId, CredentialId, NodeId};

use crate::error::ConfigError;

/// Requested private key algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[default]
    #[serde(rename = "2048")]
    Rsa2048,
    #[serde(rename = "3072")]
    Rsa3072,
    #[serde(rename = "4096")]
    Rsa4096,
    #[serde(rename = "P256")]
    EcP256,
    #[serde(rename = "P384")]
    EcP384,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa2048 => "2048",
            KeyType::Rsa3072 => "3072",
            KeyType::Rsa4096 => "4096",
            KeyType::EcP256 => "P256",
            KeyType::EcP384 => "P384",
        }
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, KeyType::Rsa2048 | KeyType::Rsa3072 | KeyType::Rsa4096)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "2048" | "RSA2048" => Ok(KeyType::Rsa2048),
            "3072" | "RSA3072" => Ok(KeyType::Rsa3072),
            "4096" | "RSA4096" => Ok(KeyType::Rsa4096),
            "P256" | "EC256" => Ok(KeyType::EcP256),
            "P384" | "EC384" => Ok(KeyType::EcP384),
            _ => Err(ConfigError::UnknownKeyType(s.to_string())),
        }
    }
}

/// Domain validation strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeMethod {
    #[default]
    Http01,
    Dns01,
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeMethod::Http01 => f.write_str("http01"),
            ChallengeMethod::Dns01 => f.write_str("dns01"),
        }
    }
}

/// Whether the scheduler manages a certificate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoCertMode {
    #[default]
    Disabled,
    Enabled,
    /// Material arrives through fleet sync; never renewed locally
    Sync,
}

/// Serde adapter storing binary blobs as standard base64
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// The CA's issuance output, stored exactly as returned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateResource {
    /// Primary domain of the order
    pub domain: String,
    /// Opaque CA handle (order URL)
    pub cert_url: String,
    /// PEM private key
    #[serde(with = "b64")]
    pub private_key: Vec<u8>,
    /// PEM leaf certificate
    #[serde(with = "b64")]
    pub certificate: Vec<u8>,
    /// PEM issuer chain
    #[serde(with = "b64")]
    pub issuer_certificate: Vec<u8>,
    /// PEM certificate signing request
    #[serde(with = "b64")]
    pub csr: Vec<u8>,
}

impl CertificateResource {
    /// Leaf followed by issuer chain, as written to `fullchain.cer`
    pub fn full_chain(&self) -> Vec<u8> {
        let mut chain = self.certificate.clone();
        if !chain.is_empty() && !chain.ends_with(b"\n") {
            chain.push(b'\n');
        }
        chain.extend_from_slice(&self.issuer_certificate);
        chain
    }
}

/// A certificate tracked by the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedCertificate {
    pub id: CertificateId,
    pub name: String,
    pub domains: Vec<String>,
    pub ssl_certificate_path: String,
    pub ssl_certificate_key_path: String,
    pub auto_cert: AutoCertMode,
    pub challenge_method: ChallengeMethod,
    pub dns_credential_id: Option<CredentialId>,
    pub acme_account_id: Option<AccountId>,
    pub key_type: KeyType,
    /// Transcript of the most recent operation
    pub log: String,
    pub resource: Option<CertificateResource>,
    pub sync_node_ids: Vec<NodeId>,
    pub must_staple: bool,
    pub disable_cname: bool,
    pub revoke_old: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// ACME account key as raw P-256 coordinates (base64url, no padding)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKey {
    pub x: String,
    pub y: String,
    pub d: String,
}

/// Registration returned by the CA
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRegistration {
    /// Account URL at the CA
    pub uri: String,
    /// Email the registration was made with
    pub email: String,
    /// Directory the registration was made against
    pub ca_directory: String,
}

/// An ACME account ("user")
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeAccount {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    pub ca_directory: String,
    pub registration: Option<AccountRegistration>,
    pub key: Option<AccountKey>,
    /// Outbound proxy for CA traffic
    pub proxy: Option<String>,
    pub eab_key_id: Option<String>,
    pub eab_hmac_key: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl AcmeAccount {
    /// True when the stored registration matches the current email and directory
    pub fn is_registered(&self) -> bool {
        match (&self.registration, &self.key) {
            (Some(reg), Some(_)) => reg.email == self.email && reg.ca_directory == self.ca_directory,
            _ => false,
        }
    }
}

/// Credentials for one DNS provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsCredential {
    pub id: CredentialId,
    pub name: String,
    /// Provider code, e.g. `cloudflare`
    pub provider: String,
    /// Provider environment bindings
    pub config: BTreeMap<String, String>,
}

/// Fleet sync target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub url: String,
    pub token: String,
    pub enabled: bool,
}
