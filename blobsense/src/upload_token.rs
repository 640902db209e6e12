//! Signed client upload tokens.
//!
//! A token authorizes a browser to `PUT` exactly one pathname with one of a fixed set of content
//! types until it expires. The format is `{payload}.{signature}`, where `payload` is the
//! base64url-encoded JSON [`ClientTokenClaims`] and `signature` is the base64url-encoded
//! HMAC-SHA256 of the encoded payload, keyed with the storage read/write credential.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTokenClaims {
    pub pathname: String,
    pub allowed_content_types: Vec<String>,
    /// Expiry as Unix milliseconds
    pub valid_until: i64,
    /// Opaque value echoed back to the upload-completed hook
    pub token_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Client token is malformed")]
    Malformed,

    #[error("Client token signature is invalid")]
    BadSignature,

    #[error("Client token has expired")]
    Expired,
}

fn mac(secret: &str) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    }
}

/// Sign `claims` with `secret`.
pub fn issue(claims: &ClientTokenClaims, secret: &str) -> Result<String, serde_json::Error> {
    let payload = BASE64_URL.encode(serde_json::to_vec(claims)?);

    let mut mac = mac(secret);
    mac.update(payload.as_bytes());
    let signature = BASE64_URL.encode(mac.finalize().into_bytes());

    Ok(format!("{payload}.{signature}"))
}

/// Check the signature and expiry of `token` and return its claims.
pub fn verify(token: &str, secret: &str, now: DateTime<Utc>) -> Result<ClientTokenClaims, TokenError> {
    let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let signature = BASE64_URL.decode(signature).map_err(|_| TokenError::Malformed)?;

    let mut mac = mac(secret);
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature).map_err(|_| TokenError::BadSignature)?;

    let raw = BASE64_URL.decode(payload).map_err(|_| TokenError::Malformed)?;
    let claims: ClientTokenClaims = serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;

    if claims.valid_until <= now.timestamp_millis() {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

/// Whether `content_type` matches an allow-list entry. Parameters are ignored and `type/*` matches
/// any subtype.
pub fn content_type_allowed(allowed: &[String], content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

    allowed.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        match entry.strip_suffix("/*") {
            Some(top_level) => essence.split_once('/').is_some_and(|(kind, _)| kind == top_level),
            None => entry == essence,
        }
    })
}
