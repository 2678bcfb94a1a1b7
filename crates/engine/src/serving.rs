//! Management endpoint TLS certificate with hot reload
//!
//! Handshakes read the current key through [`ArcSwap`]; a reload replaces
//! it atomically. A reload that fails leaves the previous key serving.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tracing::{info, warn};

use crate::error::ServingError;

pub struct ServingCertificate {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: ArcSwap<CertifiedKey>,
}

impl std::fmt::Debug for ServingCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingCertificate")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .finish()
    }
}

impl ServingCertificate {
    pub fn load(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Result<Self, ServingError> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let key = load_certified_key(&cert_path, &key_path)?;
        Ok(Self {
            cert_path,
            key_path,
            current: ArcSwap::from(key),
        })
    }

    /// True when `path` names the certificate file being served
    pub fn serves(&self, path: &Path) -> bool {
        if path == self.cert_path {
            return true;
        }
        match (path.canonicalize(), self.cert_path.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Key handed to new handshakes
    pub fn current(&self) -> Arc<CertifiedKey> {
        self.current.load_full()
    }

    /// Re-read the pair from disk and swap it in
    pub fn reload(&self) -> Result<(), ServingError> {
        match load_certified_key(&self.cert_path, &self.key_path) {
            Ok(key) => {
                self.current.store(key);
                info!(cert = ?self.cert_path, "Management TLS certificate reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(cert = ?self.cert_path, error = %e, "Management TLS reload failed, keeping previous certificate");
                Err(e)
            }
        }
    }

    /// rustls server configuration resolving through `self`
    pub fn server_config(self: &Arc<Self>) -> Result<ServerConfig, ServingError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ServingError::InvalidKey(format!("no usable TLS protocol versions: {}", e)))?
            .with_no_client_auth()
            .with_cert_resolver(Arc::clone(self) as Arc<dyn ResolvesServerCert>);
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl ResolvesServerCert for ServingCertificate {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.current())
    }
}

fn open(path: &Path) -> Result<BufReader<File>, ServingError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ServingError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<Arc<CertifiedKey>, ServingError> {
    let certs = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ServingError::Read {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ServingError::NoCertificate(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|source| ServingError::Read {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ServingError::NoKey(key_path.to_path_buf()))?;

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
        .map_err(|e| ServingError::InvalidKey(e.to_string()))?;

    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_pair(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let params = rcgen::CertificateParams::new(vec![name.to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();

        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn test_reload_swaps_key() {
        let temp = TempDir::new().unwrap();
        let (cert, key) = write_pair(temp.path(), "a.example");
        let serving = ServingCertificate::load(&cert, &key).unwrap();
        let before = serving.current().cert[0].clone();

        write_pair(temp.path(), "b.example");
        serving.reload().unwrap();
        assert_ne!(serving.current().cert[0], before);
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let temp = TempDir::new().unwrap();
        let (cert, key) = write_pair(temp.path(), "a.example");
        let serving = ServingCertificate::load(&cert, &key).unwrap();
        let before = serving.current().cert[0].clone();

        std::fs::write(&cert, "garbage").unwrap();
        assert!(matches!(serving.reload(), Err(ServingError::NoCertificate(_))));
        assert_eq!(serving.current().cert[0], before);
    }

    #[test]
    fn test_serves_matches_path() {
        let temp = TempDir::new().unwrap();
        let (cert, key) = write_pair(temp.path(), "a.example");
        let serving = ServingCertificate::load(&cert, &key).unwrap();
        assert!(serving.serves(&cert));
        assert!(serving.serves(&temp.path().join(".").join("cert.pem")));
        assert!(!serving.serves(&key));
    }

    #[test]
    fn test_server_config_builds() {
        let temp = TempDir::new().unwrap();
        let (cert, key) = write_pair(temp.path(), "a.example");
        let serving = Arc::new(ServingCertificate::load(&cert, &key).unwrap());
        assert!(serving.server_config().is_ok());
    }
}
