//! Presigned download URLs.
//!
//! A URL carries the key, an absolute expiry (unix seconds), an optional
//! download name and a SHA-256 signature over those fields and a server
//! secret. Whoever serves the objects recomputes the signature with
//! [`verify`].

use sha2::{Digest, Sha256};

/// Fields covered by a presigned URL signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedParams<'a> {
    pub key: &'a str,
    pub expires_at: i64,
    pub download_name: Option<&'a str>,
}

fn signature(secret: &str, params: &PresignedParams<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\n");
    hasher.update(params.key.as_bytes());
    hasher.update(b"\n");
    hasher.update(params.expires_at.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(params.download_name.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build a signed URL under `base_url`.
pub fn sign(base_url: &str, secret: &str, params: &PresignedParams<'_>) -> String {
    let mut url = format!(
        "{}/{}?expires={}&signature={}",
        base_url.trim_end_matches('/'),
        params.key,
        params.expires_at,
        signature(secret, params)
    );
    if let Some(name) = params.download_name {
        url.push_str("&filename=");
        url.push_str(&urlencoding::encode(name));
    }
    url
}

/// Check a signature and expiry against `now` (unix seconds).
pub fn verify(secret: &str, params: &PresignedParams<'_>, signature_hex: &str, now: i64) -> bool {
    now <= params.expires_at && signature(secret, params) == signature_hex
}
