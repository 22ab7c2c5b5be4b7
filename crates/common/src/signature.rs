//! Inbound webhook authentication: shared API key plus an optional
//! HMAC-SHA256 body signature, both compared in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::webhook::TemplateWebhookConfig;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of a raw request body.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a provided signature against the body. The header value may be
/// `sha256=<hex>` or bare hex.
pub fn verify_signature(secret: &str, body: &[u8], provided: &str) -> bool {
    let provided_hex = provided.strip_prefix("sha256=").unwrap_or(provided);
    let computed = compute_signature(secret, body);
    constant_time_eq(provided_hex.as_bytes(), computed.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// Authenticate an inbound webhook request against the template's stored
/// configuration. Checks run in order: configuration presence, API key,
/// then body signature when a signing secret is set. Succeeds with no
/// side effect.
pub fn verify_request(
    config: Option<&TemplateWebhookConfig>,
    provided_key: Option<&str>,
    provided_signature: Option<&str>,
    body: &[u8],
) -> Result<()> {
    let config = match config {
        Some(c) if c.is_configured() => c,
        _ => return Err(Error::Unconfigured),
    };

    let key = provided_key.unwrap_or("");
    if key.is_empty() || !constant_time_eq(key.as_bytes(), config.api_key.as_bytes()) {
        return Err(Error::AuthFailed);
    }

    if let Some(secret) = config.signing_secret() {
        let signature = provided_signature.unwrap_or("");
        if signature.is_empty() || !verify_signature(secret, body, signature) {
            return Err(Error::SignatureFailed);
        }
    }

    Ok(())
}
