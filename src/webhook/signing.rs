// ── Webhook Delivery: HMAC Signing (§4.6, §6) ───────────────────────────────
// `X-Webhook-Signature: sha256=<hex HMAC-SHA256 of body with secret>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `hex(HMAC_SHA256(secret, raw_body_bytes))`, formatted as the header value
/// the receiver expects (§6 "Signature").
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification a webhook receiver would perform (L4:
/// "HMAC signature verification on the receiver recovers the original body
/// unchanged"). Exposed for tests and for any downstream receiver crate
/// that wants a reference implementation. Recomputes the MAC and compares
/// via `Mac::verify_slice`, which is constant-time over the tag bytes.
pub fn verify(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let tag_hex = match signature_header.strip_prefix("sha256=") {
        Some(hex_tag) => hex_tag,
        None => return false,
    };
    let tag = match hex::decode(tag_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic() {
        let a = sign("secret", b"hello");
        let b = sign("secret", b"hello");
        assert_eq!(a, b);
        assert!(a.starts_with("sha256="));
    }

    #[test]
    fn different_secrets_differ() {
        let a = sign("secret-a", b"hello");
        let b = sign("secret-b", b"hello");
        assert_ne!(a, b);
    }

    #[test]
    fn verify_round_trips() {
        let body = b"{\"id\":\"1\"}";
        let sig = sign("s3cr3t", body);
        assert!(verify("s3cr3t", body, &sig));
        assert!(!verify("wrong", body, &sig));
    }
}
