use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::token::metrics::MetricsCollector;
use crate::token::cache::{MemoryTokenCache, SingleFlightPolicy, TokenCache};
use crate::token::config::{ConfigPreset, ResolvedConfig};
use crate::token::entropy::EntropySource;
use crate::token::generator::{TimeProviderFn, TokenGenerator, system_time_provider};
use crate::token::scope::{Scope, ScopeTree};
use crate::token::{TokenEngine, TokenError};

/// A builder for creating a `TokenEngine` instance.
///
/// This builder defaults to a `MemoryTokenCache`, the OS entropy source,
/// the system clock and the [`ConfigPreset::Standard`] root configuration.
#[must_use = "The builder does nothing unless `.build()` is called."]
pub struct TokenEngineBuilder<C: TokenCache> {
    cache: Arc<C>,
    scopes: Vec<Scope>,
    root: Option<ResolvedConfig>,
    entropy: Option<Arc<dyn EntropySource>>,
    time_provider: Option<TimeProviderFn>,
    #[cfg(feature = "metrics")]
    metrics_collector: Option<Arc<dyn MetricsCollector>>,
}

impl TokenEngineBuilder<MemoryTokenCache> {
    /// Creates a new builder.
    ///
    /// By default, this builder uses `MemoryTokenCache`. Use
    /// `.with_cache()` to provide a different cache backend.
    pub(crate) fn new() -> Self {
        Self {
            cache: Arc::new(MemoryTokenCache::new()),
            scopes: Vec::new(),
            root: None,
            entropy: None,
            time_provider: None,
            #[cfg(feature = "metrics")]
            metrics_collector: None,
        }
    }

    /// Sets what concurrent requests do while a cache entry is being
    /// regenerated. Defaults to [`SingleFlightPolicy::BlockUntilPublished`].
    pub fn with_single_flight_policy(mut self, policy: SingleFlightPolicy) -> Self {
        self.cache = Arc::new(MemoryTokenCache::with_policy(policy));
        self
    }
}

impl<C: TokenCache + 'static> TokenEngineBuilder<C> {
    /// Specifies a custom cache backend to use instead of the default
    /// `MemoryTokenCache`.
    pub fn with_cache<T: TokenCache + 'static>(self, cache: Arc<T>) -> TokenEngineBuilder<T> {
        TokenEngineBuilder {
            cache,
            scopes: self.scopes,
            root: self.root,
            entropy: self.entropy,
            time_provider: self.time_provider,
            #[cfg(feature = "metrics")]
            metrics_collector: self.metrics_collector,
        }
    }

    /// Adds a scope. Declaration order breaks ties between equally
    /// specific scopes, later scopes winning.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scopes.push(scope);
        self
    }

    /// Adds several scopes in order.
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes.extend(scopes);
        self
    }

    /// Uses a predefined root configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use request_token::TokenEngine;
    /// use request_token::config::ConfigPreset;
    /// use request_token::scope::Scope;
    ///
    /// let engine = TokenEngine::builder()
    ///     .with_preset(ConfigPreset::Csrf)
    ///     .with_scope(Scope::prefix("forms", "/forms"))
    ///     .build()?;
    /// assert_eq!(engine.root_config().length, 32);
    /// # Ok::<(), request_token::TokenError>(())
    /// ```
    pub fn with_preset(mut self, preset: ConfigPreset) -> Self {
        self.root = Some(ResolvedConfig::from(preset));
        self
    }

    /// Uses an explicit root configuration.
    pub fn with_root_config(mut self, root: ResolvedConfig) -> Self {
        self.root = Some(root);
        self
    }

    /// Draws random bytes from `source` instead of the OS CSPRNG.
    pub fn with_entropy_source(mut self, source: Arc<dyn EntropySource>) -> Self {
        self.entropy = Some(source);
        self
    }

    /// Sets a custom time provider function.
    ///
    /// The provider returns the current time as a duration since the Unix
    /// epoch. It drives cache expiry, timestamps in tokens and signed
    /// metadata.
    ///
    /// # Example
    ///
    /// ```rust
    /// use request_token::TokenEngine;
    /// use request_token::scope::Scope;
    /// use std::time::Duration;
    ///
    /// let engine = TokenEngine::builder()
    ///     .with_scope(Scope::prefix("site", "/"))
    ///     .with_time_provider(|| Ok(Duration::from_secs(1_700_000_000)))
    ///     .build()?;
    /// # Ok::<(), request_token::TokenError>(())
    /// ```
    pub fn with_time_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Result<Duration, crate::TokenError> + Send + Sync + 'static,
    {
        self.time_provider = Some(Box::new(provider));
        self
    }

    /// Sets the metrics collector. Defaults to a no-op collector.
    #[cfg(feature = "metrics")]
    pub fn with_metrics_collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }

    /// Builds the `TokenEngine`.
    ///
    /// Checks every scope and the root configuration, and logs a warning
    /// for each questionable root setting.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if a scope declaration or the root configuration is
    /// invalid. The root may not carry a signing key: keys never cross a
    /// scope boundary implicitly, so a root key could not reach any scope.
    pub fn build(self) -> Result<TokenEngine<C>, TokenError> {
        let scopes = ScopeTree::new(self.scopes)?;
        if scopes.is_empty() {
            tracing::warn!("Token engine built without scopes; it will never emit tokens");
        }

        let root = self.root.unwrap_or_default();
        if root.signing_key.is_some() {
            return Err(TokenError::InvalidConfig(
                "signing keys are set per scope; the root configuration cannot carry one"
                    .to_string(),
            ));
        }
        root.validate()?;
        for warning in root.warnings() {
            tracing::warn!("{}", warning);
        }

        let generator = match self.entropy {
            Some(source) => TokenGenerator::with_entropy(source),
            None => TokenGenerator::new(),
        };
        let time_provider = self.time_provider.unwrap_or_else(system_time_provider);

        tracing::debug!(
            scopes = scopes.len(),
            entropy = generator.entropy_name(),
            "Token engine built: {}",
            root.summary()
        );

        #[cfg(feature = "metrics")]
        let engine = TokenEngine::new(
            scopes,
            root,
            self.cache,
            generator,
            time_provider,
            self.metrics_collector,
        );
        #[cfg(not(feature = "metrics"))]
        let engine = TokenEngine::new(scopes, root, self.cache, generator, time_provider);

        Ok(engine)
    }
}
