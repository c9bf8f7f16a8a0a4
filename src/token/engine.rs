use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::time::Instant;
use std::time::Duration;

use tokio::sync::RwLock;

use super::adapter::{ResponseSink, TokenEmission};
use super::cache::{CacheStats, MemoryTokenCache, TokenCache};
use super::config::ResolvedConfig;
use super::generator::{TimeProviderFn, TokenGenerator};
use super::scope::{NAMED_TOKEN_SEPARATOR, ScopeChain, ScopeTree};
use super::{TokenEngineBuilder, TokenError};

#[cfg(feature = "metrics")]
use super::cache::CacheOutcome;
#[cfg(feature = "metrics")]
use super::metrics::{MetricEvent, MetricsCollector, NoOpMetricsCollector};

/// The memoized result of merging one scope chain.
#[derive(Clone)]
enum Resolution {
    Active(Arc<ResolvedConfig>),
    Invalid(TokenError),
}

/// Mints request tokens for a set of URL scopes.
///
/// One engine is created at startup and shared (typically behind an `Arc`)
/// by every request worker. It owns the scope tree, the token cache, the
/// entropy source and the clock, and performs no I/O of its own.
///
/// To create an instance, use the `TokenEngine::builder()` method.
///
/// # Example
///
/// ```rust
/// use request_token::{RecordedOutputs, TokenEngine};
/// use request_token::config::ScopeConfig;
/// use request_token::encoding::Format;
/// use request_token::scope::Scope;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), request_token::TokenError> {
/// let engine = TokenEngine::builder()
///     .with_scope(Scope::prefix("site", "/").with_config(
///         ScopeConfig::new()
///             .with_format(Format::Hex)
///             .with_ttl(Duration::from_secs(5))
///             .with_output_header("X-Request-Token"),
///     ))
///     .build()?;
///
/// let mut outputs = RecordedOutputs::new();
/// engine.handle("/account", &mut outputs).await?;
/// assert_eq!(outputs.header("X-Request-Token").map(str::len), Some(32));
/// # Ok(())
/// # }
/// ```
pub struct TokenEngine<C: TokenCache = MemoryTokenCache> {
    pub(crate) scopes: ScopeTree,
    pub(crate) root: ResolvedConfig,
    pub(crate) cache: Arc<C>,
    pub(crate) generator: TokenGenerator,
    pub(crate) time_provider: TimeProviderFn,
    resolutions: RwLock<HashMap<String, Resolution>>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics_collector: Arc<dyn MetricsCollector>,
}

impl TokenEngine<MemoryTokenCache> {
    /// Creates a new `TokenEngineBuilder` to construct a `TokenEngine`.
    ///
    /// The builder defaults to a `MemoryTokenCache`. Provide another cache
    /// using the `.with_cache()` method on the builder.
    pub fn builder() -> TokenEngineBuilder<MemoryTokenCache> {
        TokenEngineBuilder::new()
    }
}

impl<C: TokenCache + 'static> TokenEngine<C> {
    /// Internal constructor used by the builder.
    #[cfg(feature = "metrics")]
    pub(crate) fn new(
        scopes: ScopeTree,
        root: ResolvedConfig,
        cache: Arc<C>,
        generator: TokenGenerator,
        time_provider: TimeProviderFn,
        metrics_collector: Option<Arc<dyn MetricsCollector>>,
    ) -> Self {
        let metrics_collector =
            metrics_collector.unwrap_or_else(|| Arc::new(NoOpMetricsCollector::new()));
        Self {
            scopes,
            root,
            cache,
            generator,
            time_provider,
            resolutions: RwLock::default(),
            metrics_collector,
        }
    }

    /// Internal constructor used by the builder (non-metrics version).
    #[cfg(not(feature = "metrics"))]
    pub(crate) fn new(
        scopes: ScopeTree,
        root: ResolvedConfig,
        cache: Arc<C>,
        generator: TokenGenerator,
        time_provider: TimeProviderFn,
    ) -> Self {
        Self {
            scopes,
            root,
            cache,
            generator,
            time_provider,
            resolutions: RwLock::default(),
        }
    }

    /// Resolves the configuration that applies to `path`.
    ///
    /// # Errors
    ///
    /// - `NoMatchingScope` when no scope covers the path
    /// - `InvalidConfig` when the merged configuration cannot mint tokens
    pub async fn resolve(
        &self,
        path: &str,
    ) -> Result<(ScopeChain, Arc<ResolvedConfig>), TokenError> {
        let chain = self.scopes.chain(path)?;

        let memoized = self.resolutions.read().await.get(chain.key()).cloned();
        let resolution = match memoized {
            Some(resolution) => resolution,
            None => self.memoize(&chain).await,
        };

        match resolution {
            Resolution::Active(config) => Ok((chain, config)),
            Resolution::Invalid(err) => Err(err),
        }
    }

    /// Merges a chain seen for the first time and stores the result.
    ///
    /// Invalid chains are logged here, so each is reported once.
    async fn memoize(&self, chain: &ScopeChain) -> Resolution {
        let mut resolutions = self.resolutions.write().await;
        match resolutions.entry(chain.key().to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let merged = self.scopes.merge_chain(chain, &self.root);
                let resolution = match merged.validate() {
                    Ok(()) => {
                        for warning in merged.warnings() {
                            tracing::warn!(scope = chain.key(), "{}", warning);
                        }
                        tracing::debug!(scope = chain.key(), "{}", merged.summary());
                        Resolution::Active(Arc::new(merged))
                    }
                    Err(err) => {
                        tracing::warn!(
                            scope = chain.key(),
                            "Token engine disabled for scope: {}",
                            err
                        );
                        Resolution::Invalid(err)
                    }
                };
                entry.insert(resolution).clone()
            }
        }
    }

    /// Mints (or reuses) the tokens for a request to `path`.
    ///
    /// Returns `Ok(None)` when the engine is inactive for this request: no
    /// scope matches, the merged configuration is invalid, the scope is
    /// disabled, or its `only_for` filter rejects the path.
    ///
    /// Named tokens of the chain are minted after the main token set, each
    /// cached under `chain#NAME` with its own TTL.
    ///
    /// # Errors
    ///
    /// - `EntropyUnavailable` if random bytes could not be drawn
    /// - `RegenerationFailed` if this request waited on a generation that
    ///   failed
    /// - `ClockError` if the time provider fails
    pub async fn mint(&self, path: &str) -> Result<Option<TokenEmission>, TokenError> {
        let (chain, config) = match self.resolve(path).await {
            Ok(resolved) => resolved,
            Err(err) if err.is_inactive() => {
                tracing::debug!(path, "Token engine inactive: {}", err);
                #[cfg(feature = "metrics")]
                self.record_inactive(path, err.code()).await;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if !config.enabled {
            tracing::debug!(path, scope = chain.key(), "Token engine disabled for scope");
            #[cfg(feature = "metrics")]
            self.record_inactive(path, "disabled").await;
            return Ok(None);
        }
        if let Some(filter) = &config.only_for {
            if !filter.is_match(path) {
                tracing::debug!(path, scope = chain.key(), "Path rejected by only-for filter");
                #[cfg(feature = "metrics")]
                self.record_inactive(path, "filtered").await;
                return Ok(None);
            }
        }

        let now = (self.time_provider)()?;
        let scope = chain.key();
        let emission = self.mint_key(scope, &config, now).await?;

        let mut named = Vec::with_capacity(config.tokens.len());
        for spec in &config.tokens {
            let key = format!("{scope}{NAMED_TOKEN_SEPARATOR}{}", spec.name);
            named.push(self.mint_key(&key, &config.named_token(spec), now).await?);
        }

        Ok(Some(emission.with_named(named)))
    }

    /// Looks up or generates the token set cached under `key`.
    async fn mint_key(
        &self,
        key: &str,
        config: &ResolvedConfig,
        now: Duration,
    ) -> Result<TokenEmission, TokenError> {
        let generate = || self.generator.mint(config, key, now);

        #[cfg(feature = "metrics")]
        let start_time = Instant::now();

        let cached = match self
            .cache
            .get_or_generate(key, now, config.ttl, &generate)
            .await
        {
            Ok(cached) => cached,
            Err(err) => {
                tracing::warn!(scope = key, "Token generation failed: {}", err);
                #[cfg(feature = "metrics")]
                self.record_error(&err, key).await;
                return Err(err);
            }
        };

        #[cfg(feature = "metrics")]
        self.record_lookup(cached.outcome, key, start_time, cached.value.tokens.len())
            .await;

        Ok(TokenEmission::new(
            key.to_string(),
            cached.value,
            cached.outcome,
            config.output_header.clone(),
            config.output_env.clone(),
        ))
    }

    /// Mints the tokens for `path` and writes them to `sink`.
    ///
    /// Returns whether anything was written.
    pub async fn handle(
        &self,
        path: &str,
        sink: &mut (dyn ResponseSink + Send),
    ) -> Result<bool, TokenError> {
        match self.mint(path).await? {
            Some(emission) => {
                emission.emit(sink);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Statistics of the underlying cache.
    pub async fn cache_stats(&self) -> Result<CacheStats, TokenError> {
        self.cache.stats((self.time_provider)()?).await
    }

    /// The cache backend.
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// The declared scopes.
    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    /// The root configuration every scope chain is merged over.
    pub fn root_config(&self) -> &ResolvedConfig {
        &self.root
    }

    /// The metrics collector in use.
    #[cfg(feature = "metrics")]
    pub fn metrics_collector(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics_collector
    }

    #[cfg(feature = "metrics")]
    async fn record_inactive(&self, path: &str, reason: &'static str) {
        let event = MetricEvent::Inactive {
            path: path.to_string(),
            reason,
        };
        self.metrics_collector.record_event(event).await;
    }

    #[cfg(feature = "metrics")]
    async fn record_error(&self, err: &TokenError, scope: &str) {
        let event = MetricEvent::Error {
            error_code: err.code(),
            error_message: err.to_string(),
            scope: Some(scope.to_string()),
        };
        self.metrics_collector.record_event(event).await;
    }

    #[cfg(feature = "metrics")]
    async fn record_lookup(
        &self,
        outcome: CacheOutcome,
        scope: &str,
        start_time: Instant,
        count: usize,
    ) {
        if matches!(outcome, CacheOutcome::Generated | CacheOutcome::Bypassed) {
            let event = MetricEvent::TokensGenerated {
                duration: start_time.elapsed(),
                count,
                scope: scope.to_string(),
            };
            self.metrics_collector.record_event(event).await;
        }
        let event = MetricEvent::CacheLookup {
            outcome,
            scope: scope.to_string(),
        };
        self.metrics_collector.record_event(event).await;
    }
}
