//! Request authenticity checks that do not involve identity tokens.
//!
//! Payment notifications carry a `Continuity-Signature` header of the form
//! `t=<unix seconds>,v1=<hex>` where the MAC is HMAC-SHA256 over
//! `"{t}.{raw body}"`. More than one `v1` entry may be present while the
//! provider rotates secrets.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payment notification signature.
pub const SIGNATURE_HEADER: &str = "continuity-signature";

/// Header carrying the admin key.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("no webhook secret configured")]
    NotConfigured,

    #[error("missing signature header")]
    Missing,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("signature mismatch")]
    Mismatch,
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(SignatureError::Malformed),
    }
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::NotConfigured)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Check a payment notification signature.
///
/// `now` is the current unix time in seconds. The comparison runs in
/// constant time.
pub fn verify_webhook_signature(
    secret: Option<&str>,
    header: Option<&str>,
    payload: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::NotConfigured)?;
    let header = parse_header(header.ok_or(SignatureError::Missing)?)?;

    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.abs_diff(header.timestamp) > tolerance {
        return Err(SignatureError::Expired);
    }

    let mac = mac_for(secret, header.timestamp, payload)?;
    if header
        .signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok())
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a signature header value for `payload`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
    let digest = mac_for(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
}

/// Compare an admin key without leaking where it differs.
pub fn admin_key_matches(expected: Option<&str>, provided: Option<&str>) -> bool {
    let (Some(expected), Some(provided)) = (expected, provided) else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }
    let keyed = |key: &str| {
        HmacSha256::new_from_slice(key.as_bytes()).map(|mut mac| {
            mac.update(ADMIN_KEY_HEADER.as_bytes());
            mac
        })
    };
    let (Ok(expected), Ok(provided)) = (keyed(expected), keyed(provided)) else {
        return false;
    };
    let tag = expected.finalize().into_bytes();
    provided.verify_slice(&tag).is_ok()
}
