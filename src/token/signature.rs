//! Keyed signature algorithms for token metadata.
//!
//! This module provides a trait-based system for the message authentication
//! code used by the metadata signer. The crate ships HMAC-SHA256; other
//! algorithms can be plugged in through [`SignatureAlgorithm`].

use crate::TokenError;
use std::fmt;

/// A trait for keyed signature algorithms.
///
/// # Implementation Notes
///
/// - `verify` must compare tags in constant time
/// - implementations must be `Send + Sync` so one instance can serve every
///   request worker
///
/// # Example
///
/// ```rust
/// use request_token::signature::SignatureAlgorithm;
/// use request_token::TokenError;
///
/// struct Fixed;
///
/// impl SignatureAlgorithm for Fixed {
///     fn name(&self) -> &'static str {
///         "fixed"
///     }
///
///     fn sign(&self, _data: &[u8]) -> Result<Vec<u8>, TokenError> {
///         Ok(vec![7; 4])
///     }
///
///     fn verify(&self, data: &[u8], tag: &[u8]) -> Result<(), TokenError> {
///         if self.sign(data)? == tag {
///             Ok(())
///         } else {
///             Err(TokenError::SignatureMismatch)
///         }
///     }
/// }
/// ```
pub trait SignatureAlgorithm: Send + Sync {
    /// Returns the name/identifier of this algorithm, e.g. "hmac-sha256".
    fn name(&self) -> &'static str;

    /// Compute the authentication tag over `data`.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, TokenError>;

    /// Check `tag` against `data`.
    ///
    /// Returns `Err(TokenError::SignatureMismatch)` if the tag does not match.
    fn verify(&self, data: &[u8], tag: &[u8]) -> Result<(), TokenError>;
}

/// Secret key material for metadata signing.
///
/// The `Debug` implementation never prints the key, so configurations that
/// hold one can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    /// Wraps raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty key.
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, TokenError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(TokenError::InvalidConfig(
                "signing key cannot be empty".to_string(),
            ));
        }
        Ok(Self(key.to_vec()))
    }

    /// The raw key bytes.
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

pub mod hmac_sha256 {
    //! HMAC-SHA256 signature algorithm implementation.

    use super::{SignatureAlgorithm, SigningKey};
    use crate::TokenError;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    /// Length in bytes of an HMAC-SHA256 tag.
    pub const TAG_LEN: usize = 32;

    /// HMAC-SHA256 signature algorithm.
    ///
    /// # Example
    ///
    /// ```rust
    /// use request_token::signature::hmac_sha256::HmacSha256Algorithm;
    /// use request_token::signature::{SignatureAlgorithm, SigningKey};
    ///
    /// let algorithm = HmacSha256Algorithm::new(&SigningKey::new(b"my_secret_key")?);
    /// let tag = algorithm.sign(b"payload")?;
    /// algorithm.verify(b"payload", &tag)?;
    /// # Ok::<(), request_token::TokenError>(())
    /// ```
    pub struct HmacSha256Algorithm {
        key: SigningKey,
    }

    impl HmacSha256Algorithm {
        /// Create a new HMAC-SHA256 algorithm with the given key.
        pub fn new(key: &SigningKey) -> Self {
            Self { key: key.clone() }
        }

        /// Create an HMAC instance for internal use.
        fn create_hmac(&self) -> Result<Hmac<Sha256>, TokenError> {
            Hmac::<Sha256>::new_from_slice(self.key.expose())
                .map_err(|e| TokenError::CryptoError(format!("Invalid HMAC key: {e}")))
        }
    }

    impl SignatureAlgorithm for HmacSha256Algorithm {
        fn name(&self) -> &'static str {
            "hmac-sha256"
        }

        fn sign(&self, data: &[u8]) -> Result<Vec<u8>, TokenError> {
            let mut mac = self.create_hmac()?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }

        fn verify(&self, data: &[u8], tag: &[u8]) -> Result<(), TokenError> {
            let mut mac = self.create_hmac()?;
            mac.update(data);

            // Use constant-time comparison
            mac.verify_slice(tag)
                .map_err(|_| TokenError::SignatureMismatch)
        }
    }

}

/// Type alias for the default signature algorithm.
pub type DefaultSignatureAlgorithm = hmac_sha256::HmacSha256Algorithm;

/// Create the default signature algorithm with the given key.
pub fn create_default_algorithm(key: &SigningKey) -> DefaultSignatureAlgorithm {
    hmac_sha256::HmacSha256Algorithm::new(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_debug_is_redacted() {
        let key = SigningKey::new(b"super-secret").unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_empty_signing_key_rejected() {
        assert!(matches!(
            SigningKey::new(b""),
            Err(TokenError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_algorithm_name() {
        let algorithm = create_default_algorithm(&SigningKey::new(b"k").unwrap());
        assert_eq!(algorithm.name(), "hmac-sha256");
    }
}
