//! Webhook signatures and CRC challenge responses, both HMAC-SHA256.
//!
//! The platform signs each webhook body with the app's consumer secret and
//! sends it in `x-twitter-webhooks-signature` as `sha256=<base64>`. When
//! registering or re-validating a webhook it sends a `crc_token`, which must
//! be answered with the same construction over the token.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Parses a signature header (`sha256=<base64>`) into raw bytes.
///
/// Returns `None` for malformed headers. Never panics.
///
/// ```
/// use link_dispenser::server::signature::parse_signature_header;
///
/// assert!(parse_signature_header("sha256=AAEC").is_some());
/// assert!(parse_signature_header("AAEC").is_none());
/// assert!(parse_signature_header("sha256=not base64!").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let encoded = header.strip_prefix("sha256=")?;
    STANDARD.decode(encoded).ok()
}

pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as `sha256=<base64>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", STANDARD.encode(signature))
}

/// Verifies `signature_header` against `payload`. Constant-time.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// The `response_token` value for a CRC challenge.
///
/// ```
/// use link_dispenser::server::signature::crc_response_token;
///
/// let token = crc_response_token("challenge-123", b"consumer-secret");
/// assert!(token.starts_with("sha256="));
/// ```
pub fn crc_response_token(crc_token: &str, consumer_secret: &[u8]) -> String {
    format_signature_header(&compute_signature(crc_token.as_bytes(), consumer_secret))
}
