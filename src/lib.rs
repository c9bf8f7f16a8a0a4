//! # Request Token
//!
//! Per-request secret tokens (CSRF tokens, request IDs, one-time codes) for
//! web server request pipelines.
//!
//! For every incoming request the [`TokenEngine`] decides which configuration
//! applies to the URL, whether to mint a fresh random token or reuse a cached
//! one, how to encode it, and whether to attach signed metadata. The host
//! then writes the result to response headers or environment variables
//! through a [`ResponseSink`].
//!
//! ## Features
//!
//! - **Cryptographic randomness**: tokens come from the OS CSPRNG, never from
//!   a predictable fallback
//! - **Multiple encodings**: hex, base64url, base64 and custom alphabets with
//!   optional grouping
//! - **Scoped configuration**: location prefixes and regular expressions,
//!   merged from least to most specific
//! - **Caching with single-flight regeneration**: at most one fresh token per
//!   TTL window, regardless of how many workers ask at once
//! - **Signed metadata**: HMAC-SHA256 authenticated issue time, expiry and
//!   scope next to each token
//! - **Named tokens**: extra tokens per scope, each with its own variable,
//!   overrides and cache entry
//! - **Async Support**: the engine is shared by `Arc` across tokio tasks
//!
//! ## Quick Start
//!
//! ```rust
//! use request_token::{RecordedOutputs, TokenEngine};
//! use request_token::config::ScopeConfig;
//! use request_token::encoding::Format;
//! use request_token::scope::Scope;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), request_token::TokenError> {
//! let engine = TokenEngine::builder()
//!     .with_scope(Scope::prefix("site", "/"))
//!     .with_scope(Scope::prefix("forms", "/forms").with_config(
//!         ScopeConfig::new()
//!             .with_format(Format::Hex)
//!             .with_length(32)
//!             .with_ttl(Duration::from_secs(300))
//!             .with_output_header("X-CSRF-Token"),
//!     ))
//!     .build()?;
//!
//! let mut outputs = RecordedOutputs::new();
//! engine.handle("/forms/login", &mut outputs).await?;
//!
//! let token = outputs.header("X-CSRF-Token").unwrap_or_default();
//! assert_eq!(token.len(), 64);
//! // The parent scope's environment variable is inherited.
//! assert_eq!(outputs.env("UNIQUE_STRING"), Some(token));
//! # Ok(())
//! # }
//! ```
//!
//! ### Signed Metadata
//!
//! ```rust
//! use request_token::TokenEngine;
//! use request_token::config::ScopeConfig;
//! use request_token::metadata;
//! use request_token::scope::Scope;
//! use request_token::signature::SigningKey;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), request_token::TokenError> {
//! let key = SigningKey::new(b"shared-secret")?;
//! let engine = TokenEngine::builder()
//!     .with_scope(Scope::prefix("api", "/api").with_config(
//!         ScopeConfig::new()
//!             .with_signing_key(key.clone())
//!             .with_expiry(Duration::from_secs(600)),
//!     ))
//!     .build()?;
//!
//! if let Some(emission) = engine.mint("/api/orders").await? {
//!     let payload = metadata::verify(&emission.signatures()[0], &key)?;
//!     assert_eq!(payload.token, emission.tokens()[0]);
//!     assert_eq!(payload.scope, "api");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Root defaults come from a [`ConfigPreset`](config::ConfigPreset).
//! `ConfigPreset::FromEnv` reads:
//!
//! ```bash
//! export REQUEST_TOKEN_DEFAULT_LENGTH=32
//! export REQUEST_TOKEN_DEFAULT_FORMAT=hex
//! export REQUEST_TOKEN_DEFAULT_TTL=60
//! ```
//!
//! ## Architecture
//!
//! - **[`TokenEngine`]**: resolution, caching and emission for each request
//! - **[`scope`]**: URL patterns and configuration merging
//! - **[`cache`]**: the single-flight token cache
//! - **[`generator`]**: entropy, encoding and signing for one token set
//! - **[`TokenError`]**: every failure mode

pub mod token;

pub use token::{adapter, cache, config, encoding, entropy, generator, metadata, scope, signature};

#[cfg(feature = "metrics")]
pub use token::metrics;

// Re-export commonly used types
pub use token::{
    RecordedOutputs, ResponseSink, TokenEmission, TokenEngine, TokenEngineBuilder, TokenError,
};
