//! Randomness sources for token generation.
//!
//! All token bytes come from an [`EntropySource`]. The default
//! [`OsEntropy`] reads the operating system CSPRNG and reports failures
//! loudly instead of returning predictable bytes.

use crate::TokenError;
use rand::RngCore;
use rand::rngs::OsRng;

/// A source of cryptographically secure random bytes.
///
/// Implementations must be `Send + Sync` and callable concurrently from
/// many request workers without external locking.
///
/// # Implementation Requirements
///
/// - `fill` must either fill the whole buffer with unpredictable bytes or
///   return [`TokenError::EntropyUnavailable`]
/// - it must never leave the buffer zeroed and report success
///
/// # Example
///
/// ```rust
/// use request_token::entropy::{EntropySource, OsEntropy};
///
/// let mut buf = [0u8; 16];
/// OsEntropy.fill(&mut buf)?;
/// # Ok::<(), request_token::TokenError>(())
/// ```
pub trait EntropySource: Send + Sync {
    /// Returns a short identifier of this source for diagnostics.
    fn name(&self) -> &'static str;

    /// Fill `buf` completely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError>;
}

/// The operating system CSPRNG.
///
/// Backed by `rand::rngs::OsRng`, which holds no state of its own beyond the
/// OS handle, so a single instance can be shared by every worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn name(&self) -> &'static str {
        "os"
    }

    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| TokenError::EntropyUnavailable(e.to_string()))
    }
}

/// Draw `len` random bytes from `source` into a fresh buffer.
pub fn random_bytes(source: &dyn EntropySource, len: usize) -> Result<Vec<u8>, TokenError> {
    let mut bytes = vec![0u8; len];
    source.fill(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct BrokenSource;

    impl EntropySource for BrokenSource {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn fill(&self, _buf: &mut [u8]) -> Result<(), TokenError> {
            Err(TokenError::EntropyUnavailable("device closed".to_string()))
        }
    }

    #[test]
    fn test_os_entropy_lengths() {
        for len in [0, 1, 16, 32, 1024, 4096] {
            let bytes = random_bytes(&OsEntropy, len).unwrap();
            assert_eq!(bytes.len(), len);
        }
    }

    #[test]
    fn test_os_entropy_unique() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let bytes = random_bytes(&OsEntropy, 16).unwrap();
            assert!(seen.insert(bytes), "duplicate random block generated");
        }
    }

    #[test]
    fn test_failure_propagates() {
        let result = random_bytes(&BrokenSource, 16);
        assert!(matches!(result, Err(TokenError::EntropyUnavailable(_))));
    }

    #[test]
    fn test_concurrent_use() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| random_bytes(&OsEntropy, 32).unwrap()))
            .collect();
        let blocks: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(blocks.len(), 8);
    }
}
