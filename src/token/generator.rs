use crate::TokenError;
use crate::token::cache::MintedTokens;
use crate::token::config::ResolvedConfig;
use crate::token::encoding::encode;
use crate::token::entropy::{EntropySource, OsEntropy, random_bytes};
use crate::token::metadata::{self, MetadataPayload};
use crate::token::time_utils::current_time;
use std::sync::Arc;
use std::time::Duration;

/// A function that provides the current time as a duration since the Unix
/// epoch.
pub type TimeProviderFn = Box<dyn Fn() -> Result<Duration, TokenError> + Send + Sync>;

/// The system clock.
pub(crate) fn system_time_provider() -> TimeProviderFn {
    Box::new(current_time)
}

/// Mints finished token sets from a resolved configuration.
///
/// One call to [`TokenGenerator::mint`] draws entropy once for all `count`
/// tokens, encodes each token, applies the optional timestamp, prefix and
/// suffix, and signs metadata when the configuration asks for it.
///
/// # Example
///
/// ```rust
/// use request_token::config::ResolvedConfig;
/// use request_token::encoding::Format;
/// use request_token::generator::TokenGenerator;
/// use std::time::Duration;
///
/// let config = ResolvedConfig {
///     format: Format::Hex,
///     prefix: "csrf_".to_string(),
///     ..ResolvedConfig::default()
/// };
///
/// let minted = TokenGenerator::new().mint(&config, "site", Duration::from_secs(1_700_000_000))?;
/// assert_eq!(minted.tokens.len(), 1);
/// assert!(minted.tokens[0].starts_with("csrf_"));
/// assert_eq!(minted.tokens[0].len(), 5 + 32);
/// # Ok::<(), request_token::TokenError>(())
/// ```
#[derive(Clone)]
pub struct TokenGenerator {
    entropy: Arc<dyn EntropySource>,
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator {
    /// A generator backed by the operating system CSPRNG.
    pub fn new() -> Self {
        Self::with_entropy(Arc::new(OsEntropy))
    }

    /// A generator backed by the given entropy source.
    pub fn with_entropy(entropy: Arc<dyn EntropySource>) -> Self {
        Self { entropy }
    }

    /// Name of the entropy source in use.
    pub fn entropy_name(&self) -> &'static str {
        self.entropy.name()
    }

    /// Mints `config.count` tokens for the scope chain `scope` at `now`.
    ///
    /// # Errors
    ///
    /// - `EntropyUnavailable` if the entropy source fails
    /// - `InvalidConfig` if the configuration cannot produce tokens (see
    ///   [`ResolvedConfig::validate`])
    /// - `CryptoError` if metadata cannot be signed
    pub fn mint(
        &self,
        config: &ResolvedConfig,
        scope: &str,
        now: Duration,
    ) -> Result<MintedTokens, TokenError> {
        config.validate()?;

        let per_token = config.format.entropy_len(config.length);
        let raw = random_bytes(self.entropy.as_ref(), per_token * config.count)?;

        let mut tokens = Vec::with_capacity(config.count);
        for chunk in raw.chunks_exact(per_token) {
            let mut body = encode(
                chunk,
                config.format,
                config.alphabet.as_ref(),
                config.alphabet_grouping,
            )?;
            if config.include_timestamp {
                body = format!("{}-{body}", now.as_secs());
            }
            tokens.push(format!("{}{body}{}", config.prefix, config.suffix));
        }

        let signatures = if config.sign {
            self.sign_all(config, scope, now, &tokens)?
        } else {
            Vec::new()
        };

        Ok(MintedTokens {
            tokens,
            signatures,
            issued_at: now,
        })
    }

    fn sign_all(
        &self,
        config: &ResolvedConfig,
        scope: &str,
        now: Duration,
        tokens: &[String],
    ) -> Result<Vec<String>, TokenError> {
        let key = config.signing_key.as_ref().ok_or_else(|| {
            TokenError::InvalidConfig("signing is enabled but no signing key is set".to_string())
        })?;

        let issued_at = now.as_secs();
        let expires_at = if config.expiry.is_zero() {
            None
        } else {
            Some(issued_at.saturating_add(config.expiry.as_secs()))
        };

        tokens
            .iter()
            .map(|token| {
                let payload = MetadataPayload {
                    issued_at,
                    expires_at,
                    scope: scope.to_string(),
                    token: token.clone(),
                };
                metadata::sign(&payload, key).map(|signed| signed.into_string())
            })
            .collect()
    }
}
