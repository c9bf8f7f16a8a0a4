use thiserror::Error;

/// Error types that can occur while minting request tokens.
///
/// This enum represents every failure mode of the token engine. Some
/// variants are fatal for the current request, others only mean that the
/// engine is inactive for it.
///
/// # Error Categories
///
/// - **Request Errors**: `EntropyUnavailable`, `RegenerationFailed`
/// - **Configuration Errors**: `InvalidConfig`, `NoMatchingScope`
/// - **Verification Errors**: `SignatureMismatch`
/// - **System Errors**: `CryptoError`, `ClockError`
///
/// The type is `Clone` so that a single generation failure can be handed to
/// every caller waiting on the same cache key.
///
/// # Example
///
/// ```rust
/// use request_token::{TokenEngine, TokenError};
/// use request_token::scope::Scope;
///
/// # async fn example() -> Result<(), TokenError> {
/// let engine = TokenEngine::builder()
///     .with_scope(Scope::prefix("site", "/"))
///     .build()?;
///
/// match engine.mint("/login").await {
///     Ok(Some(emission)) => println!("minted {} token(s)", emission.tokens().len()),
///     Ok(None) => println!("engine inactive for this path"),
///     Err(TokenError::EntropyUnavailable(e)) => println!("no entropy: {e}"),
///     Err(e) => println!("Other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The operating system random source could not be read.
    ///
    /// This error is fatal for the current request. The engine never falls
    /// back to a predictable or non-cryptographic source.
    ///
    /// # When This Occurs
    ///
    /// - The OS entropy device is unavailable (e.g. restricted sandbox)
    /// - A custom `EntropySource` reports a failure
    #[error("Entropy unavailable: {0}")]
    EntropyUnavailable(String),

    /// A scope configuration is invalid.
    ///
    /// Raised when an option value is out of range while building scopes,
    /// or when a merged configuration cannot produce tokens (for example the
    /// `custom` format without an alphabet). At request time the engine
    /// treats this as "inactive for this request" and logs it once.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No configured scope covers the request path.
    ///
    /// This is not a failure: the request adapter should simply emit
    /// nothing for this request.
    #[error("No scope matches path: {0}")]
    NoMatchingScope(String),

    /// Signed metadata failed verification.
    ///
    /// Returned by the verification path whenever the signed string was
    /// altered, truncated, malformed, or signed with another key.
    #[error("Signature mismatch")]
    SignatureMismatch,

    /// The winner of a regeneration race failed to produce a token.
    ///
    /// Every caller that was waiting on the same cache key receives this
    /// error. The key is left stale so the next request retries.
    #[error("Token regeneration failed: {0}")]
    RegenerationFailed(String),

    /// A cryptographic primitive rejected its input.
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// The system clock could not be read.
    #[error("Clock error: {0}")]
    ClockError(String),
}

impl TokenError {
    /// Returns a short machine-readable code for this error.
    ///
    /// Used as the error label in metric events.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::EntropyUnavailable(_) => "entropy_unavailable",
            TokenError::InvalidConfig(_) => "invalid_config",
            TokenError::NoMatchingScope(_) => "no_matching_scope",
            TokenError::SignatureMismatch => "signature_mismatch",
            TokenError::RegenerationFailed(_) => "regeneration_failed",
            TokenError::CryptoError(_) => "crypto_error",
            TokenError::ClockError(_) => "clock_error",
        }
    }

    /// Whether this error only means the engine is inactive for a request.
    pub fn is_inactive(&self) -> bool {
        matches!(
            self,
            TokenError::InvalidConfig(_) | TokenError::NoMatchingScope(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TokenError::EntropyUnavailable("device closed".to_string()).to_string(),
            "Entropy unavailable: device closed"
        );
        assert_eq!(
            TokenError::InvalidConfig("length out of range".to_string()).to_string(),
            "Invalid configuration: length out of range"
        );
        assert_eq!(
            TokenError::NoMatchingScope("/x".to_string()).to_string(),
            "No scope matches path: /x"
        );
        assert_eq!(
            TokenError::SignatureMismatch.to_string(),
            "Signature mismatch"
        );
        assert_eq!(
            TokenError::RegenerationFailed("boom".to_string()).to_string(),
            "Token regeneration failed: boom"
        );
    }

    #[test]
    fn test_error_debug() {
        let error = TokenError::SignatureMismatch;
        let debug_str = format!("{error:?}");
        assert_eq!(debug_str, "SignatureMismatch");
    }

    #[test]
    fn test_error_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone + 'static>() {}
        assert_traits::<TokenError>();
    }

    #[test]
    fn test_inactive_classification() {
        assert!(TokenError::InvalidConfig("x".to_string()).is_inactive());
        assert!(TokenError::NoMatchingScope("/".to_string()).is_inactive());
        assert!(!TokenError::EntropyUnavailable("x".to_string()).is_inactive());
        assert!(!TokenError::RegenerationFailed("x".to_string()).is_inactive());
        assert!(!TokenError::SignatureMismatch.is_inactive());
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            TokenError::EntropyUnavailable("e".to_string()),
            TokenError::InvalidConfig("e".to_string()),
            TokenError::NoMatchingScope("e".to_string()),
            TokenError::SignatureMismatch,
            TokenError::RegenerationFailed("e".to_string()),
            TokenError::CryptoError("e".to_string()),
            TokenError::ClockError("e".to_string()),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
    }
}
