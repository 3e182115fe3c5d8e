//! Webhook signature verification.
//!
//! The platform signs every delivery with base64(HMAC-SHA256(channel secret,
//! raw body)) in the `X-Line-Signature` header. Verification is a pure
//! boundary predicate over the raw bytes, before any parsing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a delivery signature against the raw request body.
///
/// Returns false on any malformed input (bad base64, wrong length). The
/// comparison is constant-time via `verify_slice`.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature header value for a body: the inverse of
/// [`verify`], used to build authentic deliveries in tests and tooling.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"events":[]}"#;
        let signature = sign("secret", body);
        assert!(verify("secret", body, &signature));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = br#"{"events":[]}"#;
        let signature = sign("secret", body);
        assert!(!verify("other", body, &signature));
    }

    #[test]
    fn rejects_tampered_body() {
        let signature = sign("secret", br#"{"events":[]}"#);
        assert!(!verify("secret", br#"{"events":[{}]}"#, &signature));
    }

    #[test]
    fn rejects_garbage_header() {
        assert!(!verify("secret", b"body", "not base64!!"));
        assert!(!verify("secret", b"body", ""));
    }
}
