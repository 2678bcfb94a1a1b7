//! Certificate inspection

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

use crate::error::CertInfoError;
use crate::sandbox::ConfRoot;

/// Subject, names and validity window of a leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject_name: String,
    pub issuer_name: String,
    pub dns_names: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateInfo {
    /// Inspect the first certificate of a PEM bundle
    pub fn from_pem(bytes: &[u8]) -> Result<Self, CertInfoError> {
        let block = pem::parse(bytes).map_err(|e| CertInfoError::Parse(format!("not PEM: {}", e)))?;
        Self::from_der(block.contents())
    }

    pub fn from_der(der: &[u8]) -> Result<Self, CertInfoError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertInfoError::Parse(format!("invalid X.509 certificate: {}", e)))?;

        let validity = cert.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;

        let dns_names = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            subject_name: common_name(cert.subject()),
            issuer_name: common_name(cert.issuer()),
            dns_names,
            not_before,
            not_after,
        })
    }

    /// Whole days since `not_before`
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.not_before).num_days()
    }

    /// Whole days until `not_after` (negative once expired)
    pub fn remaining_days(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    /// True when the certificate was issued less than `window` ago
    pub fn issued_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.not_before < window
    }
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CertInfoError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| CertInfoError::Parse(format!("timestamp {} out of range", secs)))
}

/// Read and inspect the certificate at `path`, which must lie under `root`
pub fn read_certificate_info(root: &ConfRoot, path: impl AsRef<Path>) -> Result<CertificateInfo, CertInfoError> {
    let path = root.resolve(path)?;
    let bytes = std::fs::read(&path).map_err(|source| CertInfoError::Read {
        path: path.clone(),
        source,
    })?;
    CertificateInfo::from_pem(&bytes)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration as StdDuration;

    /// Self-signed PEM valid between two unix timestamps
    pub fn self_signed_pem(domain: &str, not_before: i64, not_after: i64) -> String {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, domain);
        let epoch = rcgen::date_time_ymd(1970, 1, 1);
        params.not_before = epoch + StdDuration::from_secs(not_before as u64);
        params.not_after = epoch + StdDuration::from_secs(not_after as u64);
        params.self_signed(&key).unwrap().pem()
    }
}
