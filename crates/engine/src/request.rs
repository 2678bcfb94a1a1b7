//! Certificate request descriptor
//!
//! One request per operation. Derived paths are computed once from the
//! sorted domain list and key type and memoized for the rest of the
//! operation.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use certward_common::{AccountId, CredentialId, NodeId};

use crate::error::ConfigError;
use crate::model::{ChallengeMethod, CertificateResource, KeyType, ManagedCertificate};
use crate::sandbox::ConfRoot;

/// Certificate file name inside a certificate directory
pub const CERTIFICATE_FILE: &str = "fullchain.cer";

/// Private key file name inside a certificate directory
pub const KEY_FILE: &str = "private.key";

/// Paths derived from a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPaths {
    pub dir: PathBuf,
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// Declarative description of one issue or renew operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateRequest {
    /// Managed certificate name; defaults to the first domain
    pub name: Option<String>,
    pub domains: Vec<String>,
    pub challenge_method: ChallengeMethod,
    pub dns_credential_id: Option<CredentialId>,
    pub acme_account_id: Option<AccountId>,
    pub key_type: KeyType,
    /// Prior issuance, present when renewing
    #[serde(skip)]
    pub resource: Option<CertificateResource>,
    pub must_staple: bool,
    pub disable_cname: bool,
    /// Revoke the superseded certificate after reissue
    pub revoke_old: bool,
    pub sync_node_ids: Vec<NodeId>,
    #[serde(skip)]
    pub paths: OnceCell<RequestPaths>,
}

impl CertificateRequest {
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            domains,
            ..Default::default()
        }
    }

    /// Request that renews `cert` with its stored settings
    pub fn from_managed(cert: &ManagedCertificate) -> Self {
        Self {
            name: Some(cert.name.clone()),
            domains: cert.domains.clone(),
            challenge_method: cert.challenge_method,
            dns_credential_id: cert.dns_credential_id,
            acme_account_id: cert.acme_account_id,
            key_type: cert.key_type,
            resource: cert.resource.clone(),
            must_staple: cert.must_staple,
            disable_cname: cert.disable_cname,
            revoke_old: cert.revoke_old,
            sync_node_ids: cert.sync_node_ids.clone(),
            paths: OnceCell::new(),
        }
    }

    /// Reject requests that can never succeed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domains.is_empty() {
            return Err(ConfigError::EmptyDomains);
        }
        if let Some(pos) = self.domains.iter().position(|d| d.trim().is_empty()) {
            return Err(ConfigError::EmptyDomain(pos));
        }
        if self.cert_name().trim().is_empty() {
            return Err(ConfigError::EmptyFilename);
        }
        if self.challenge_method == ChallengeMethod::Dns01 && self.dns_credential_id.is_none() {
            return Err(ConfigError::MissingCredential);
        }
        Ok(())
    }

    /// Name of the managed certificate this request updates
    pub fn cert_name(&self) -> &str {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.domains.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Directory name: sorted domains joined by `_`, then the key type
    pub fn dir_name(&self, substitute_wildcard: bool) -> String {
        let mut domains: Vec<&str> = self.domains.iter().map(String::as_str).collect();
        domains.sort_unstable();
        let name = format!("{}_{}", domains.join("_"), self.key_type);
        if substitute_wildcard {
            name.replace('*', "#")
        } else {
            name
        }
    }

    /// Memoized certificate paths under `root`
    pub fn paths(&self, root: &ConfRoot, substitute_wildcard: bool) -> &RequestPaths {
        self.paths.get_or_init(|| {
            let dir = root.ssl_dir().join(self.dir_name(substitute_wildcard));
            RequestPaths {
                certificate: dir.join(CERTIFICATE_FILE),
                key: dir.join(KEY_FILE),
                dir,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_name_sorted() {
        let mut req = CertificateRequest::new(vec!["www.example.com".into(), "example.com".into()]);
        req.key_type = KeyType::EcP256;
        assert_eq!(req.dir_name(false), "example.com_www.example.com_P256");
    }

    #[test]
    fn test_wildcard_substitution() {
        let req = CertificateRequest::new(vec!["*.example.com".into()]);
        assert_eq!(req.dir_name(true), "#.example.com_2048");
        assert_eq!(req.dir_name(false), "*.example.com_2048");
    }

    #[test]
    fn test_paths_memoized() {
        let req = CertificateRequest::new(vec!["example.com".into()]);
        let first = req.paths(&ConfRoot::new("/etc/nginx"), false).clone();
        // Later lookups keep the first computation
        let second = req.paths(&ConfRoot::new("/other"), true);

        assert_eq!(&first, second);
        assert_eq!(
            first.certificate,
            PathBuf::from("/etc/nginx/ssl/example.com_2048/fullchain.cer")
        );
        assert_eq!(first.key, PathBuf::from("/etc/nginx/ssl/example.com_2048/private.key"));
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            CertificateRequest::default().validate(),
            Err(ConfigError::EmptyDomains)
        );
        assert_eq!(
            CertificateRequest::new(vec!["a.com".into(), " ".into()]).validate(),
            Err(ConfigError::EmptyDomain(1))
        );

        let mut dns = CertificateRequest::new(vec!["a.com".into()]);
        dns.challenge_method = ChallengeMethod::Dns01;
        assert_eq!(dns.validate(), Err(ConfigError::MissingCredential));
    }

    #[test]
    fn test_cert_name_defaults_to_first_domain() {
        let mut req = CertificateRequest::new(vec!["b.com".into(), "a.com".into()]);
        assert_eq!(req.cert_name(), "b.com");
        req.name = Some("main".into());
        assert_eq!(req.cert_name(), "main");
    }

    #[test]
    fn test_deserialize_request() {
        let req: CertificateRequest = serde_json::from_str(
            r#"{"domains": ["example.com"], "challenge_method": "dns01",
                "dns_credential_id": 3, "key_type": "P384", "must_staple": true}"#,
        )
        .unwrap();
        assert_eq!(req.challenge_method, ChallengeMethod::Dns01);
        assert_eq!(req.dns_credential_id, Some(CredentialId::new(3)));
        assert_eq!(req.key_type, KeyType::EcP384);
        assert!(req.must_staple);
        assert!(req.validate().is_ok());
    }
}
