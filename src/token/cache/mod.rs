//! Token caching with single-flight regeneration.
//!
//! The cache maps a scope chain key to the token set most recently minted
//! for it. Within one TTL window every caller sees the same tokens; when the
//! window closes exactly one caller regenerates while the others wait for
//! its result (or, under [`SingleFlightPolicy::ServeStale`], reuse the old
//! one).

use crate::TokenError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

mod memory;
pub use memory::MemoryTokenCache;

/// The output of one generation: finished tokens and their metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedTokens {
    /// Finished token strings, prefix and suffix included.
    pub tokens: Vec<String>,
    /// Signed metadata, one per token, or empty when signing is off.
    pub signatures: Vec<String>,
    /// Generation instant as a duration since the Unix epoch.
    pub issued_at: Duration,
}

/// How a [`CachedTokens`] value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a fresh entry.
    Hit,
    /// This caller ran the generator.
    Generated,
    /// This caller waited for another caller's generation.
    Awaited,
    /// Served a stale entry while another caller regenerates.
    Stale,
    /// Caching is disabled for this key (TTL of zero).
    Bypassed,
}

/// A token set returned by the cache.
#[derive(Debug, Clone)]
pub struct CachedTokens {
    pub value: Arc<MintedTokens>,
    pub outcome: CacheOutcome,
}

/// What waiting callers do while a key is being regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingleFlightPolicy {
    /// Wait until the regenerating caller publishes, then share its result.
    #[default]
    BlockUntilPublished,
    /// Return the previous (stale) token set if there is one, otherwise wait.
    ServeStale,
}

/// Statistics about the token cache.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of keys ever seen.
    pub total_entries: usize,
    /// Entries with a fresh value.
    pub valid: usize,
    /// Entries whose value has expired.
    pub stale: usize,
    /// Entries currently being regenerated.
    pub regenerating: usize,
    /// Entries with no value (first generation failed).
    pub empty: usize,
    /// Additional backend-specific information
    pub backend_info: String,
}

/// Generator passed to [`TokenCache::get_or_generate`].
pub type Generate<'a> = &'a (dyn Fn() -> Result<MintedTokens, TokenError> + Send + Sync);

/// Cache backend for minted token sets.
///
/// # Contract
///
/// - `ttl == 0` bypasses the cache: `generate` runs and nothing is stored
/// - a fresh entry (`now < expires_at`) is returned without calling
///   `generate`
/// - for an absent or stale entry at most one concurrent caller per key
///   runs `generate`; the others share its result
/// - if that generation fails, the winner gets the generator's error, the
///   waiters get [`TokenError::RegenerationFailed`], and the key is left as
///   it was so the next call retries
/// - a generation for one key never blocks callers of another key
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Returns the cached token set for `key`, generating it when needed.
    async fn get_or_generate(
        &self,
        key: &str,
        now: Duration,
        ttl: Duration,
        generate: Generate<'_>,
    ) -> Result<CachedTokens, TokenError>;

    /// Get statistics about the cache as seen at `now`.
    async fn stats(&self, now: Duration) -> Result<CacheStats, TokenError>;
}
