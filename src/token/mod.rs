// Core architecture components
mod engine;
mod engine_builder;
mod error;
mod options;
mod time_utils;

// Token pipeline, leaf first
pub mod entropy;
pub mod encoding;
pub mod signature;
pub mod metadata;
pub mod config;
pub mod scope;
pub mod cache;
pub mod generator;
pub mod adapter;

// Metrics (optional feature)
#[cfg(feature = "metrics")]
pub mod metrics;

// Core components exports
pub use engine::TokenEngine;
pub use engine_builder::TokenEngineBuilder;
pub use error::TokenError;
pub use generator::{TimeProviderFn, TokenGenerator};

// Pipeline exports
pub use adapter::{OutputTarget, RecordedOutputs, ResponseSink, TokenEmission};
pub use cache::{
    CacheOutcome, CacheStats, CachedTokens, MemoryTokenCache, MintedTokens, SingleFlightPolicy,
    TokenCache,
};
pub use config::{ConfigPreset, ResolvedConfig, ScopeConfig, TokenSpec};
pub use encoding::{Alphabet, Format};
pub use entropy::{EntropySource, OsEntropy};
pub use metadata::{MetadataPayload, SignedMetadata};
pub use scope::{Scope, ScopeChain, ScopeTree, UrlPattern};
pub use signature::{
    DefaultSignatureAlgorithm, SignatureAlgorithm, SigningKey, create_default_algorithm,
};

// Metrics exports (optional feature)
#[cfg(feature = "metrics")]
pub use metrics::{
    ErrorMetrics, InMemoryMetricsCollector, MetricEvent, MetricsCollector, NoOpMetricsCollector,
    PerformanceMetrics, TokenMetrics,
};
