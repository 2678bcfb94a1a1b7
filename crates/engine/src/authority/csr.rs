//! CSR generation and chain handling

use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair, RsaKeySize,
    PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384, PKCS_RSA_SHA256,
};

use crate::error::AuthorityError;
use crate::model::KeyType;

/// TLS feature extension (RFC 7633)
pub const MUST_STAPLE_OID: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 24];

/// SEQUENCE { INTEGER 5 } - status_request
const MUST_STAPLE_VALUE: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x05];

/// A fresh private key with its signing request
#[derive(Debug, Clone)]
pub struct CsrBundle {
    pub key_pem: String,
    pub csr_der: Vec<u8>,
    pub csr_pem: String,
}

fn generate_key(key_type: KeyType) -> Result<KeyPair, rcgen::Error> {
    match key_type {
        KeyType::Rsa2048 => KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048),
        KeyType::Rsa3072 => KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_3072),
        KeyType::Rsa4096 => KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_4096),
        KeyType::EcP256 => KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256),
        KeyType::EcP384 => KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384),
    }
}

/// Generate a key of `key_type` and a CSR naming every domain
pub fn build_csr(domains: &[String], key_type: KeyType, must_staple: bool) -> Result<CsrBundle, AuthorityError> {
    let first = domains
        .first()
        .ok_or_else(|| AuthorityError::Csr("no domains".into()))?;

    let key = generate_key(key_type)
        .map_err(|e| AuthorityError::Csr(format!("failed to generate {} key: {}", key_type, e)))?;

    let mut params = CertificateParams::new(domains.to_vec())
        .map_err(|e| AuthorityError::Csr(format!("invalid domain list: {}", e)))?;
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, first.as_str());
    params.distinguished_name = name;

    if must_staple {
        params.custom_extensions.push(CustomExtension::from_oid_content(
            MUST_STAPLE_OID,
            MUST_STAPLE_VALUE.to_vec(),
        ));
    }

    let csr = params
        .serialize_request(&key)
        .map_err(|e| AuthorityError::Csr(format!("failed to serialize CSR: {}", e)))?;
    let csr_pem = csr
        .pem()
        .map_err(|e| AuthorityError::Csr(format!("failed to encode CSR: {}", e)))?;

    Ok(CsrBundle {
        key_pem: key.serialize_pem(),
        csr_der: csr.der().to_vec(),
        csr_pem,
    })
}

/// DER of a PEM-encoded CSR
pub fn csr_der_from_pem(csr_pem: &[u8]) -> Result<Vec<u8>, AuthorityError> {
    let block = pem::parse(csr_pem)
        .map_err(|e| AuthorityError::Csr(format!("stored CSR is not PEM: {}", e)))?;
    Ok(block.contents().to_vec())
}

fn lf_config() -> pem::EncodeConfig {
    pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF)
}

/// Split a PEM chain into the leaf and the remaining issuer certificates
pub fn split_chain(chain: &str) -> Result<(Vec<u8>, Vec<u8>), AuthorityError> {
    let blocks: Vec<pem::Pem> = pem::parse_many(chain.as_bytes())
        .map_err(|e| AuthorityError::Finalization(format!("certificate chain is not PEM: {}", e)))?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .collect();

    let (leaf, issuers) = blocks
        .split_first()
        .ok_or_else(|| AuthorityError::Finalization("certificate chain is empty".into()))?;

    let leaf = pem::encode_config(leaf, lf_config()).into_bytes();
    let issuers = pem::encode_many_config(issuers, lf_config()).into_bytes();
    Ok((leaf, issuers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::FromDer;

    #[test]
    fn test_csr_names_all_domains() {
        let domains = vec!["example.com".to_string(), "www.example.com".to_string()];
        let bundle = build_csr(&domains, KeyType::EcP256, false).unwrap();

        assert!(bundle.key_pem.contains("PRIVATE KEY"));
        assert!(bundle.csr_pem.contains("CERTIFICATE REQUEST"));

        let (_, csr) =
            x509_parser::certification_request::X509CertificationRequest::from_der(&bundle.csr_der).unwrap();
        let cn = csr
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap();
        assert_eq!(cn, "example.com");
    }

    #[test]
    fn test_must_staple_extension_present() {
        let domains = vec!["example.com".to_string()];
        let bundle = build_csr(&domains, KeyType::EcP384, true).unwrap();

        // OID 1.3.6.1.5.5.7.1.24 in DER
        let oid = [0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x01, 0x18];
        assert!(bundle.csr_der.windows(oid.len()).any(|w| w == oid));

        let plain = build_csr(&domains, KeyType::EcP384, false).unwrap();
        assert!(!plain.csr_der.windows(oid.len()).any(|w| w == oid));
    }

    #[test]
    fn test_csr_pem_roundtrip() {
        let bundle = build_csr(&["a.example".to_string()], KeyType::EcP256, false).unwrap();
        assert_eq!(csr_der_from_pem(bundle.csr_pem.as_bytes()).unwrap(), bundle.csr_der);
    }

    #[test]
    fn test_split_chain() {
        let leaf = pem::Pem::new("CERTIFICATE", vec![1, 2, 3]);
        let issuer = pem::Pem::new("CERTIFICATE", vec![4, 5, 6]);
        let chain = pem::encode_many(&[leaf.clone(), issuer.clone()]);

        let (leaf_pem, issuer_pem) = split_chain(&chain).unwrap();
        assert_eq!(pem::parse(&leaf_pem).unwrap().contents(), leaf.contents());
        let issuers = pem::parse_many(&issuer_pem).unwrap();
        assert_eq!(issuers.len(), 1);
        assert_eq!(issuers[0].contents(), issuer.contents());
    }

    #[test]
    fn test_split_empty_chain() {
        assert!(split_chain("").is_err());
    }
}
