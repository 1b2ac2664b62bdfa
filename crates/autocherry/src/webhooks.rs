//! GitHub webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature of the verbatim body.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Header naming the event type.
pub const EVENT_HEADER: &str = "x-github-event";

/// Header carrying the delivery identifier.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Longest external string we are willing to log.
const MAX_LOG_LEN: usize = 512;

/// Verify a GitHub webhook signature using HMAC-SHA256.
///
/// # Arguments
/// * `body` - Raw webhook body bytes, exactly as received
/// * `signature` - `X-Hub-Signature-256` header value (`sha256=<hex>`)
/// * `secret` - Webhook secret
///
/// # Returns
/// `true` if the signature is valid. Hex case is ignored.
#[must_use]
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Some(digest) = signature.trim().strip_prefix("sha256=") else {
        return false;
    };

    // hex::decode accepts both cases
    let Ok(signature_bytes) = hex::decode(digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed[..].ct_eq(&signature_bytes).into()
}

/// Compute the `sha256=<hex>` header value for a body.
#[must_use]
pub fn sign(body: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Make an externally supplied string safe to log.
///
/// Control characters (including newlines) are removed and the result is
/// capped at 512 bytes on a character boundary.
#[must_use]
pub fn sanitize_for_log(value: &str) -> String {
    let mut out = String::with_capacity(value.len().min(MAX_LOG_LEN));
    for c in value.chars().filter(|c| !c.is_control()) {
        if out.len() + c.len_utf8() > MAX_LOG_LEN {
            break;
        }
        out.push(c);
    }
    out
}
