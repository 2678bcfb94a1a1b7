//! ACME account key conversion
//!
//! Accounts persist their P-256 key as raw coordinates. The ACME client
//! works with PKCS#8; these helpers convert between the two.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use p256::SecretKey;

use crate::error::AuthorityError;
use crate::model::AccountKey;

fn decode_b64url(value: &str) -> Result<Vec<u8>, AuthorityError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .or_else(|_| URL_SAFE.decode(value))
        .map_err(|e| AuthorityError::AccountKey(format!("invalid base64url: {}", e)))
}

/// Raw coordinates of a PKCS#8-encoded P-256 private key
pub fn coordinates_from_pkcs8(der: &[u8]) -> Result<AccountKey, AuthorityError> {
    let secret = SecretKey::from_pkcs8_der(der)
        .map_err(|e| AuthorityError::AccountKey(format!("not a P-256 PKCS#8 key: {}", e)))?;
    Ok(coordinates(&secret))
}

/// Same, from the base64url PKCS#8 form the ACME client serializes
pub fn coordinates_from_pkcs8_b64(value: &str) -> Result<AccountKey, AuthorityError> {
    coordinates_from_pkcs8(&decode_b64url(value)?)
}

fn coordinates(secret: &SecretKey) -> AccountKey {
    let point = secret.public_key().to_encoded_point(false);
    let x = point.x().map(|x| URL_SAFE_NO_PAD.encode(x)).unwrap_or_default();
    let y = point.y().map(|y| URL_SAFE_NO_PAD.encode(y)).unwrap_or_default();
    AccountKey {
        x,
        y,
        d: URL_SAFE_NO_PAD.encode(secret.to_bytes()),
    }
}

/// PKCS#8 DER for stored coordinates; the public point must match `d`
pub fn pkcs8_from_coordinates(key: &AccountKey) -> Result<Vec<u8>, AuthorityError> {
    let d = decode_b64url(&key.d)?;
    let secret = SecretKey::from_slice(&d)
        .map_err(|e| AuthorityError::AccountKey(format!("invalid private scalar: {}", e)))?;

    let derived = coordinates(&secret);
    if derived.x != key.x || derived.y != key.y {
        return Err(AuthorityError::AccountKey(
            "public coordinates do not match the private key".into(),
        ));
    }

    let document = secret
        .to_pkcs8_der()
        .map_err(|e| AuthorityError::AccountKey(format!("failed to encode PKCS#8: {}", e)))?;
    Ok(document.as_bytes().to_vec())
}

/// base64url (unpadded) PKCS#8 for stored coordinates
pub fn pkcs8_b64_from_coordinates(key: &AccountKey) -> Result<String, AuthorityError> {
    Ok(URL_SAFE_NO_PAD.encode(pkcs8_from_coordinates(key)?))
}
