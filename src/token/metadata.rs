//! Signed metadata that accompanies a token.
//!
//! A signed metadata string has the shape
//!
//! ```text
//! base64url(payload_json) "." base64url(hmac_sha256(key, payload_json))
//! ```
//!
//! The payload is serialized with a fixed field order (`issued_at`,
//! `expires_at`, `scope`, `token`), so the same payload always produces the
//! same bytes and therefore the same tag.

use crate::TokenError;
use crate::token::signature::{SignatureAlgorithm, SigningKey, create_default_algorithm};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Separator between the encoded payload and the encoded tag.
pub const METADATA_SEPARATOR: char = '.';

/// The authenticated fields attached to a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPayload {
    /// Unix timestamp (seconds) when the token was generated.
    pub issued_at: u64,
    /// Unix timestamp (seconds) after which consumers should reject the
    /// token, or `None` when no expiry is configured.
    pub expires_at: Option<u64>,
    /// Identity of the scope chain that minted the token.
    pub scope: String,
    /// The token value this metadata vouches for.
    pub token: String,
}

impl MetadataPayload {
    /// Whether the payload carries an expiry that has passed at `now`
    /// (Unix seconds).
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>, TokenError> {
        serde_json::to_vec(self)
            .map_err(|e| TokenError::CryptoError(format!("Cannot serialize metadata: {e}")))
    }
}

/// A payload together with its tag and textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMetadata {
    /// The signed fields.
    pub payload: MetadataPayload,
    /// The raw authentication tag.
    pub mac: Vec<u8>,
    encoded: String,
}

impl SignedMetadata {
    /// The textual form handed to the request adapter.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Consumes the metadata and returns its textual form.
    pub fn into_string(self) -> String {
        self.encoded
    }
}

/// Sign `payload` with HMAC-SHA256 under `key`.
///
/// # Example
///
/// ```rust
/// use request_token::metadata::{MetadataPayload, sign, verify};
/// use request_token::signature::SigningKey;
///
/// let key = SigningKey::new(b"shared-secret")?;
/// let payload = MetadataPayload {
///     issued_at: 1_700_000_000,
///     expires_at: Some(1_700_000_300),
///     scope: "/app".to_string(),
///     token: "abc123".to_string(),
/// };
///
/// let signed = sign(&payload, &key)?;
/// assert_eq!(verify(signed.as_str(), &key)?, payload);
/// # Ok::<(), request_token::TokenError>(())
/// ```
pub fn sign(payload: &MetadataPayload, key: &SigningKey) -> Result<SignedMetadata, TokenError> {
    sign_with(payload, &create_default_algorithm(key))
}

/// Sign `payload` with an arbitrary algorithm.
pub fn sign_with(
    payload: &MetadataPayload,
    algorithm: &dyn SignatureAlgorithm,
) -> Result<SignedMetadata, TokenError> {
    let bytes = payload.canonical_bytes()?;
    let mac = algorithm.sign(&bytes)?;

    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let encoded = format!(
        "{}{METADATA_SEPARATOR}{}",
        engine.encode(&bytes),
        engine.encode(&mac)
    );

    Ok(SignedMetadata {
        payload: payload.clone(),
        mac,
        encoded,
    })
}

/// Verify a signed metadata string with HMAC-SHA256 under `key`.
///
/// # Errors
///
/// Returns `SignatureMismatch` when the string is malformed, was altered,
/// or was signed with a different key.
pub fn verify(signed: &str, key: &SigningKey) -> Result<MetadataPayload, TokenError> {
    verify_with(signed, &create_default_algorithm(key))
}

/// Verify a signed metadata string with an arbitrary algorithm.
pub fn verify_with(
    signed: &str,
    algorithm: &dyn SignatureAlgorithm,
) -> Result<MetadataPayload, TokenError> {
    let (payload_part, mac_part) = signed
        .split_once(METADATA_SEPARATOR)
        .ok_or(TokenError::SignatureMismatch)?;

    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let bytes = engine
        .decode(payload_part)
        .map_err(|_| TokenError::SignatureMismatch)?;
    let mac = engine
        .decode(mac_part)
        .map_err(|_| TokenError::SignatureMismatch)?;

    algorithm.verify(&bytes, &mac)?;

    serde_json::from_slice(&bytes).map_err(|_| TokenError::SignatureMismatch)
}
