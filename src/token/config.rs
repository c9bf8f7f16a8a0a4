use crate::TokenError;
use crate::token::encoding::{Alphabet, Format, GROUPING_MAX};
use crate::token::signature::SigningKey;
use regex::Regex;
use std::time::Duration;

/// Smallest token length in bytes.
pub const LENGTH_MIN: usize = 1;
/// Largest token length in bytes.
pub const LENGTH_MAX: usize = 1024;
/// Default token length: 128 bits of entropy.
pub const LENGTH_DEFAULT: usize = 16;
/// Longest cache TTL (24 hours).
pub const TTL_MAX: Duration = Duration::from_secs(86_400);
/// Longest metadata expiry (1 year).
pub const EXPIRY_MAX: Duration = Duration::from_secs(31_536_000);
/// Most tokens a single scope may emit per request.
pub const COUNT_MAX: usize = 50;
/// Most named tokens that may apply to one scope chain.
pub const TOKENS_MAX: usize = 50;
/// Environment variable written when no other output is configured.
pub const DEFAULT_OUTPUT_ENV: &str = "UNIQUE_STRING";

/// Predefined root configurations for common deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPreset {
    /// General purpose request tokens.
    ///
    /// - 16 bytes, base64url
    /// - no caching
    /// - written to the `UNIQUE_STRING` environment variable
    Standard,

    /// Anti-CSRF tokens.
    ///
    /// - 32 bytes, hex
    /// - no caching
    /// - written to the `X-CSRF-Token` header and `CSRF_TOKEN` variable
    Csrf,

    /// Short, human-friendly codes.
    ///
    /// - 8 characters from the Crockford base32 alphabet, grouped by 4
    /// - cached for 60 seconds
    Short,

    /// Standard defaults overridden from environment variables.
    ///
    /// Reads:
    /// - `REQUEST_TOKEN_DEFAULT_LENGTH`: token length in bytes
    /// - `REQUEST_TOKEN_DEFAULT_FORMAT`: `hex`, `base64url`, `base64`
    /// - `REQUEST_TOKEN_DEFAULT_TTL`: cache TTL in seconds
    ///
    /// Unparseable or out-of-range values are ignored.
    FromEnv,
}

/// One layer of token configuration, as declared on a scope.
///
/// Every field is optional: `None` means "not set here, inherit from the
/// enclosing scope". Layers are combined with [`ResolvedConfig::merge`].
///
/// # Signing keys
///
/// `signing_key` is the one field that does not inherit implicitly. A child
/// scope sees its parent's key only if it sets `inherit_signing_key` to
/// `true`; otherwise the key is dropped at the child's boundary. The
/// `inherit_signing_key` flag itself applies to its own scope only.
///
/// # Example
///
/// ```rust
/// use request_token::config::{ResolvedConfig, ScopeConfig};
/// use request_token::encoding::Format;
/// use std::time::Duration;
///
/// let parent = ScopeConfig::new()
///     .with_length(24)
///     .with_ttl(Duration::from_secs(5));
/// let child = ScopeConfig::new().with_format(Format::Hex);
///
/// let resolved = ResolvedConfig::default().merge(&parent).merge(&child);
/// assert_eq!(resolved.format, Format::Hex);
/// assert_eq!(resolved.length, 24);
/// assert_eq!(resolved.ttl, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopeConfig {
    /// Text encoding of the token body.
    pub format: Option<Format>,
    /// Characters used by [`Format::Custom`].
    pub alphabet: Option<String>,
    /// Custom characters between `-` separators (0 = no grouping).
    pub alphabet_grouping: Option<usize>,
    /// Token length: raw bytes, or characters for [`Format::Custom`].
    pub length: Option<usize>,
    /// Cache lifetime; zero mints a fresh token on every request.
    pub ttl: Option<Duration>,
    /// Text placed before the token body.
    pub prefix: Option<String>,
    /// Text placed after the token body.
    pub suffix: Option<String>,
    /// Number of tokens emitted per request.
    pub count: Option<usize>,
    /// Prepend the generation Unix timestamp and a `-`.
    pub include_timestamp: Option<bool>,
    /// Attach signed metadata to each token.
    pub sign: Option<bool>,
    /// Key for signed metadata. Does not inherit implicitly.
    pub signing_key: Option<SigningKey>,
    /// Use the parent scope's signing key at this scope.
    pub inherit_signing_key: Option<bool>,
    /// Lifetime recorded in signed metadata; zero means no expiry.
    pub expiry: Option<Duration>,
    /// `false` turns token output off for the subtree.
    pub enabled: Option<bool>,
    /// Only paths matching this expression receive tokens.
    pub only_for: Option<Regex>,
    /// Header name; an empty string disables an inherited header output.
    pub output_header: Option<String>,
    /// Environment variable name; an empty string disables an inherited one.
    pub output_env: Option<String>,
    /// Named tokens declared here. They are added after the parent's.
    pub tokens: Vec<TokenSpec>,
}

impl ScopeConfig {
    /// Creates an empty layer that inherits everything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.alphabet = Some(alphabet.into());
        self
    }

    /// Inserts a separator every `grouping` custom characters (0 = off).
    pub fn with_grouping(mut self, grouping: usize) -> Self {
        self.alphabet_grouping = Some(grouping);
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets the cache TTL. `Duration::ZERO` disables caching.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Sets how many tokens are emitted per request.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Prepends the generation Unix timestamp and a `-` to each token.
    pub fn with_timestamp(mut self, include: bool) -> Self {
        self.include_timestamp = Some(include);
        self
    }

    /// Enables signed metadata and sets the key used for it.
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.sign = Some(true);
        self.signing_key = Some(key);
        self
    }

    pub fn with_sign(mut self, sign: bool) -> Self {
        self.sign = Some(sign);
        self
    }

    /// Lets this scope use its parent's signing key.
    pub fn with_inherited_signing_key(mut self) -> Self {
        self.inherit_signing_key = Some(true);
        self
    }

    /// Sets the expiry recorded in signed metadata (0 = none).
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Restricts token output to request paths matching `filter`.
    pub fn with_only_for(mut self, filter: Regex) -> Self {
        self.only_for = Some(filter);
        self
    }

    pub fn with_output_header(mut self, name: impl Into<String>) -> Self {
        self.output_header = Some(name.into());
        self
    }

    pub fn with_output_env(mut self, name: impl Into<String>) -> Self {
        self.output_env = Some(name.into());
        self
    }

    /// Declares a named token on this scope.
    pub fn with_token(mut self, spec: TokenSpec) -> Self {
        self.tokens.push(spec);
        self
    }

    /// Checks the values set on this layer against their allowed ranges.
    ///
    /// Cross-field rules (e.g. `custom` needs an alphabet) are checked on
    /// the merged result by [`ResolvedConfig::validate`], because the
    /// missing piece may come from a parent scope.
    pub fn validate(&self) -> Result<(), TokenError> {
        if let Some(length) = self.length {
            if !(LENGTH_MIN..=LENGTH_MAX).contains(&length) {
                return Err(TokenError::InvalidConfig(format!(
                    "length must be between {LENGTH_MIN} and {LENGTH_MAX}"
                )));
            }
        }
        if let Some(ttl) = self.ttl {
            if ttl > TTL_MAX {
                return Err(TokenError::InvalidConfig(format!(
                    "ttl must be between 0 and {} seconds",
                    TTL_MAX.as_secs()
                )));
            }
        }
        if let Some(count) = self.count {
            if !(1..=COUNT_MAX).contains(&count) {
                return Err(TokenError::InvalidConfig(format!(
                    "count must be between 1 and {COUNT_MAX}"
                )));
            }
        }
        if let Some(grouping) = self.alphabet_grouping {
            if grouping > GROUPING_MAX {
                return Err(TokenError::InvalidConfig(format!(
                    "alphabet grouping must be between 0 and {GROUPING_MAX}"
                )));
            }
        }
        if let Some(expiry) = self.expiry {
            if expiry > EXPIRY_MAX {
                return Err(TokenError::InvalidConfig(format!(
                    "expiry must be between 0 and {} seconds",
                    EXPIRY_MAX.as_secs()
                )));
            }
        }
        if let Some(alphabet) = &self.alphabet {
            Alphabet::new(alphabet)?;
        }
        if self.tokens.len() > TOKENS_MAX {
            return Err(TokenError::InvalidConfig(format!(
                "a scope may declare at most {TOKENS_MAX} named tokens"
            )));
        }
        for spec in &self.tokens {
            spec.validate()?;
        }
        Ok(())
    }
}

/// A named token minted next to a scope's main token.
///
/// Each named token is written to its own environment variable (and,
/// optionally, a header) and has its own cache entry. Fields left unset
/// take the value of the merged scope configuration, so a declaration only states
/// what differs.
///
/// # Example
///
/// ```rust
/// use request_token::config::{ResolvedConfig, ScopeConfig, TokenSpec};
/// use request_token::encoding::Format;
///
/// let scope = ScopeConfig::new()
///     .with_length(24)
///     .with_token(TokenSpec::new("CSRF_TOKEN").with_format(Format::Hex));
///
/// let resolved = ResolvedConfig::default().merge(&scope);
/// let csrf = resolved.named_token(&resolved.tokens[0]);
/// assert_eq!(csrf.format, Format::Hex);
/// assert_eq!(csrf.length, 24);
/// assert_eq!(csrf.output_env.as_deref(), Some("CSRF_TOKEN"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    /// Environment variable the token is written to.
    pub name: String,
    pub length: Option<usize>,
    pub format: Option<Format>,
    /// Header the token is also written to.
    pub header: Option<String>,
    pub include_timestamp: Option<bool>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub ttl: Option<Duration>,
}

impl TokenSpec {
    /// A token written to the environment variable `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            format: None,
            header: None,
            include_timestamp: None,
            prefix: None,
            suffix: None,
            ttl: None,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_timestamp(mut self, include: bool) -> Self {
        self.include_timestamp = Some(include);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Checks the name and the values set on this spec.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.name.is_empty() || self.name.contains(char::is_whitespace) {
            return Err(TokenError::InvalidConfig(format!(
                "named token '{}' needs a variable name without whitespace",
                self.name
            )));
        }
        if let Some(length) = self.length {
            if !(LENGTH_MIN..=LENGTH_MAX).contains(&length) {
                return Err(TokenError::InvalidConfig(format!(
                    "named token '{}': length must be between {LENGTH_MIN} and {LENGTH_MAX}",
                    self.name
                )));
            }
        }
        if let Some(ttl) = self.ttl {
            if ttl > TTL_MAX {
                return Err(TokenError::InvalidConfig(format!(
                    "named token '{}': ttl must be between 0 and {} seconds",
                    self.name,
                    TTL_MAX.as_secs()
                )));
            }
        }
        Ok(())
    }
}

/// A fully merged configuration with every field defined.
///
/// Produced by folding the matched scope layers over a root default (see
/// [`ConfigPreset`]). Optional fields here hold a real "none" value, not an
/// unset marker.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub format: Format,
    /// Alphabet for [`Format::Custom`], already validated.
    pub alphabet: Option<Alphabet>,
    pub alphabet_grouping: usize,
    pub length: usize,
    pub ttl: Duration,
    pub prefix: String,
    pub suffix: String,
    pub count: usize,
    pub include_timestamp: bool,
    pub sign: bool,
    /// Key for signed metadata. Always `None` on a root configuration
    /// given to the engine builder.
    pub signing_key: Option<SigningKey>,
    pub expiry: Duration,
    pub enabled: bool,
    pub only_for: Option<Regex>,
    pub output_header: Option<String>,
    pub output_env: Option<String>,
    /// Named tokens of the whole chain, parent scopes first.
    pub tokens: Vec<TokenSpec>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            format: Format::Base64Url,
            alphabet: None,
            alphabet_grouping: 0,
            length: LENGTH_DEFAULT,
            ttl: Duration::ZERO,
            prefix: String::new(),
            suffix: String::new(),
            count: 1,
            include_timestamp: false,
            sign: false,
            signing_key: None,
            expiry: Duration::ZERO,
            enabled: true,
            only_for: None,
            output_header: None,
            output_env: Some(DEFAULT_OUTPUT_ENV.to_string()),
            tokens: Vec::new(),
        }
    }
}

impl ResolvedConfig {
    /// Applies `layer` on top of this configuration.
    ///
    /// Every field the layer sets overwrites the current value; unset fields
    /// pass through unchanged. The signing key is the exception: it survives
    /// only when the layer sets `inherit_signing_key`. Named tokens
    /// accumulate: the layer's specs are appended to the inherited ones.
    ///
    /// Alphabets that fail validation are left out here and reported by
    /// [`ScopeConfig::validate`].
    pub fn merge(&self, layer: &ScopeConfig) -> Self {
        let mut merged = self.clone();

        if let Some(format) = layer.format {
            merged.format = format;
        }
        if let Some(alphabet) = &layer.alphabet {
            merged.alphabet = Alphabet::new(alphabet).ok();
        }
        if let Some(grouping) = layer.alphabet_grouping {
            merged.alphabet_grouping = grouping;
        }
        if let Some(length) = layer.length {
            merged.length = length;
        }
        if let Some(ttl) = layer.ttl {
            merged.ttl = ttl;
        }
        if let Some(prefix) = &layer.prefix {
            merged.prefix = prefix.clone();
        }
        if let Some(suffix) = &layer.suffix {
            merged.suffix = suffix.clone();
        }
        if let Some(count) = layer.count {
            merged.count = count;
        }
        if let Some(include) = layer.include_timestamp {
            merged.include_timestamp = include;
        }
        if let Some(sign) = layer.sign {
            merged.sign = sign;
        }
        merged.signing_key = match (&layer.signing_key, layer.inherit_signing_key) {
            (Some(key), _) => Some(key.clone()),
            (None, Some(true)) => self.signing_key.clone(),
            (None, _) => None,
        };
        if let Some(expiry) = layer.expiry {
            merged.expiry = expiry;
        }
        if let Some(enabled) = layer.enabled {
            merged.enabled = enabled;
        }
        if let Some(filter) = &layer.only_for {
            merged.only_for = Some(filter.clone());
        }
        if let Some(header) = &layer.output_header {
            merged.output_header = non_empty(header);
        }
        if let Some(env) = &layer.output_env {
            merged.output_env = non_empty(env);
        }
        merged.tokens.extend(layer.tokens.iter().cloned());

        merged
    }

    /// The configuration a named token is minted with.
    ///
    /// The spec's own values override this configuration; the result mints
    /// exactly one token and writes it only to the spec's outputs.
    pub fn named_token(&self, spec: &TokenSpec) -> ResolvedConfig {
        let mut config = self.clone();
        config.tokens = Vec::new();
        config.count = 1;
        if let Some(length) = spec.length {
            config.length = length;
        }
        if let Some(format) = spec.format {
            config.format = format;
        }
        if let Some(include) = spec.include_timestamp {
            config.include_timestamp = include;
        }
        if let Some(prefix) = &spec.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(suffix) = &spec.suffix {
            config.suffix = suffix.clone();
        }
        if let Some(ttl) = spec.ttl {
            config.ttl = ttl;
        }
        config.output_env = Some(spec.name.clone());
        config.output_header = spec.header.as_deref().and_then(non_empty);
        config
    }

    /// Checks that this configuration can actually mint tokens.
    pub fn validate(&self) -> Result<(), TokenError> {
        if !(LENGTH_MIN..=LENGTH_MAX).contains(&self.length) {
            return Err(TokenError::InvalidConfig(format!(
                "length must be between {LENGTH_MIN} and {LENGTH_MAX}"
            )));
        }
        if self.format == Format::Custom && self.alphabet.is_none() {
            return Err(TokenError::InvalidConfig(
                "custom format requires an alphabet".to_string(),
            ));
        }
        if self.sign && self.signing_key.is_none() {
            return Err(TokenError::InvalidConfig(
                "signing is enabled but no signing key applies to this scope".to_string(),
            ));
        }
        if !(1..=COUNT_MAX).contains(&self.count) {
            return Err(TokenError::InvalidConfig(format!(
                "count must be between 1 and {COUNT_MAX}"
            )));
        }
        if self.tokens.len() > TOKENS_MAX {
            return Err(TokenError::InvalidConfig(format!(
                "{} named tokens apply to this scope; at most {TOKENS_MAX} are allowed",
                self.tokens.len()
            )));
        }
        for spec in &self.tokens {
            let named = self.named_token(spec);
            if named.format == Format::Custom && named.alphabet.is_none() {
                return Err(TokenError::InvalidConfig(format!(
                    "named token '{}' uses the custom format but no alphabet applies",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Returns warning messages for settings that are valid but risky.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.format != Format::Custom && self.length < LENGTH_DEFAULT {
            warnings.push(format!(
                "Short tokens ({} bytes) carry less than 128 bits of entropy",
                self.length
            ));
        }
        if self.ttl > Duration::from_secs(3600) {
            warnings.push("Long cache TTL (> 1 hour) reuses one token for many requests".to_string());
        }
        if self.sign && self.expiry.is_zero() {
            warnings.push("Signed metadata without an expiry never expires".to_string());
        }
        if !self.sign && !self.expiry.is_zero() {
            warnings.push("Expiry has no effect unless signing is enabled".to_string());
        }
        if self.output_header.is_none() && self.output_env.is_none() {
            warnings.push("No output header or environment variable configured".to_string());
        }

        warnings
    }

    /// Returns a summary of the current configuration.
    ///
    /// Never includes key material.
    pub fn summary(&self) -> String {
        format!(
            "ResolvedConfig {{ format: {}, length: {}, ttl: {}s, count: {}, sign: {}, header: {}, env: {}, named: {} }}",
            self.format,
            self.length,
            self.ttl.as_secs(),
            self.count,
            self.sign,
            self.output_header.as_deref().unwrap_or("-"),
            self.output_env.as_deref().unwrap_or("-"),
            self.tokens.len(),
        )
    }
}

impl From<ConfigPreset> for ResolvedConfig {
    fn from(preset: ConfigPreset) -> Self {
        match preset {
            ConfigPreset::Standard => Self::default(),
            ConfigPreset::Csrf => Self {
                format: Format::Hex,
                length: 32,
                output_header: Some("X-CSRF-Token".to_string()),
                output_env: Some("CSRF_TOKEN".to_string()),
                ..Self::default()
            },
            ConfigPreset::Short => Self {
                format: Format::Custom,
                alphabet: Alphabet::new("0123456789ABCDEFGHJKMNPQRSTVWXYZ").ok(),
                alphabet_grouping: 4,
                length: 8,
                ttl: Duration::from_secs(60),
                ..Self::default()
            },
            ConfigPreset::FromEnv => {
                let mut config = Self::default();
                if let Some(length) = env_parse::<usize>("REQUEST_TOKEN_DEFAULT_LENGTH")
                    .filter(|l| (LENGTH_MIN..=LENGTH_MAX).contains(l))
                {
                    config.length = length;
                }
                if let Some(format) = env_parse::<Format>("REQUEST_TOKEN_DEFAULT_FORMAT")
                    .filter(|f| *f != Format::Custom)
                {
                    config.format = format;
                }
                if let Some(ttl) = env_parse::<u64>("REQUEST_TOKEN_DEFAULT_TTL")
                    .map(Duration::from_secs)
                    .filter(|t| *t <= TTL_MAX)
                {
                    config.ttl = ttl;
                }
                config
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn non_empty(name: &str) -> Option<String> {
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
