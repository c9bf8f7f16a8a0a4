//! String option surface for scope configuration.
//!
//! Hosts that read directives from a configuration file hand each
//! `name value` pair to [`ScopeConfig::set_option`]. Names are
//! case-insensitive and values are range-checked on the spot.

use crate::TokenError;
use crate::token::config::{
    COUNT_MAX, EXPIRY_MAX, LENGTH_MAX, LENGTH_MIN, ScopeConfig, TOKENS_MAX, TTL_MAX, TokenSpec,
};
use crate::token::encoding::{Alphabet, Format, GROUPING_MAX};
use crate::token::signature::SigningKey;
use regex::Regex;
use std::str::FromStr;
use std::time::Duration;

impl ScopeConfig {
    /// Sets one option from its textual form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unknown option name or a value that
    /// cannot be parsed or is out of range.
    ///
    /// # Example
    ///
    /// ```rust
    /// use request_token::config::ScopeConfig;
    ///
    /// let mut config = ScopeConfig::new();
    /// config.set_option("Format", "hex")?;
    /// config.set_option("length", "32")?;
    /// config.set_option("output-header", "X-Request-Token")?;
    /// assert!(config.set_option("length", "0").is_err());
    /// # Ok::<(), request_token::TokenError>(())
    /// ```
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), TokenError> {
        match name.to_ascii_lowercase().as_str() {
            "format" => self.format = Some(value.parse::<Format>()?),
            "alphabet" => {
                Alphabet::new(value)?;
                self.alphabet = Some(value.to_string());
            }
            "alphabet-grouping" => {
                self.alphabet_grouping = Some(parse_in_range(name, value, 0, GROUPING_MAX)?)
            }
            "length" => self.length = Some(parse_in_range(name, value, LENGTH_MIN, LENGTH_MAX)?),
            "ttl" => self.ttl = Some(parse_seconds(name, value, TTL_MAX)?),
            "prefix" => self.prefix = Some(value.to_string()),
            "suffix" => self.suffix = Some(value.to_string()),
            "count" => self.count = Some(parse_in_range(name, value, 1, COUNT_MAX)?),
            "sign" => self.sign = Some(parse_flag(name, value)?),
            "signing-key" => self.signing_key = Some(SigningKey::new(value)?),
            "inherit-signing-key" => self.inherit_signing_key = Some(parse_flag(name, value)?),
            "expiry" => self.expiry = Some(parse_seconds(name, value, EXPIRY_MAX)?),
            "include-timestamp" => self.include_timestamp = Some(parse_flag(name, value)?),
            "enabled" => self.enabled = Some(parse_flag(name, value)?),
            "only-for" => {
                let filter = Regex::new(value).map_err(|e| {
                    TokenError::InvalidConfig(format!("only-for is not a valid regex: {e}"))
                })?;
                self.only_for = Some(filter);
            }
            "output-header" => self.output_header = Some(value.to_string()),
            "output-env" => self.output_env = Some(value.to_string()),
            "add-token" => {
                if self.tokens.len() >= TOKENS_MAX {
                    return Err(TokenError::InvalidConfig(format!(
                        "add-token: at most {TOKENS_MAX} named tokens per scope"
                    )));
                }
                self.tokens.push(value.parse()?);
            }
            other => {
                return Err(TokenError::InvalidConfig(format!(
                    "unknown option '{other}'"
                )));
            }
        }
        Ok(())
    }

    /// Builds a layer from a list of `(name, value)` options.
    pub fn from_options<'a, I>(options: I) -> Result<Self, TokenError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::new();
        for (name, value) in options {
            config.set_option(name, value)?;
        }
        Ok(config)
    }
}

/// Parses `VAR [key=value ...]`.
///
/// Keys are `length`, `format`, `header`, `timestamp`, `prefix`, `suffix`
/// and `ttl`, matched case-insensitively.
///
/// ```rust
/// use request_token::config::TokenSpec;
/// use request_token::encoding::Format;
///
/// let spec: TokenSpec = "CSRF_TOKEN length=32 format=hex header=X-CSRF-Token".parse()?;
/// assert_eq!(spec.name, "CSRF_TOKEN");
/// assert_eq!(spec.length, Some(32));
/// assert_eq!(spec.format, Some(Format::Hex));
/// # Ok::<(), request_token::TokenError>(())
/// ```
impl FromStr for TokenSpec {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let name = words.next().ok_or_else(|| {
            TokenError::InvalidConfig("add-token: variable name is required".to_string())
        })?;

        let mut spec = TokenSpec::new(name);
        for word in words {
            let (key, value) = word.split_once('=').ok_or_else(|| {
                TokenError::InvalidConfig(format!(
                    "add-token: invalid argument '{word}' (expected key=value)"
                ))
            })?;
            match key.to_ascii_lowercase().as_str() {
                "length" => spec.length = Some(parse_in_range(key, value, LENGTH_MIN, LENGTH_MAX)?),
                "format" => spec.format = Some(value.parse::<Format>()?),
                "header" => spec.header = Some(value.to_string()),
                "timestamp" => spec.include_timestamp = Some(parse_flag(key, value)?),
                "prefix" => spec.prefix = Some(value.to_string()),
                "suffix" => spec.suffix = Some(value.to_string()),
                "ttl" => spec.ttl = Some(parse_seconds(key, value, TTL_MAX)?),
                other => {
                    return Err(TokenError::InvalidConfig(format!(
                        "add-token: unknown parameter '{other}'"
                    )));
                }
            }
        }
        Ok(spec)
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, TokenError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(TokenError::InvalidConfig(format!(
            "{name} must be 'on' or 'off'"
        ))),
    }
}

fn parse_in_range(name: &str, value: &str, min: usize, max: usize) -> Result<usize, TokenError> {
    value
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| (min..=max).contains(n))
        .ok_or_else(|| {
            TokenError::InvalidConfig(format!("{name} must be between {min} and {max}"))
        })
}

fn parse_seconds(name: &str, value: &str, max: Duration) -> Result<Duration, TokenError> {
    let secs = value.trim().parse::<u64>().ok().filter(|s| *s <= max.as_secs());
    secs.map(Duration::from_secs).ok_or_else(|| {
        TokenError::InvalidConfig(format!(
            "{name} must be between 0 and {} seconds",
            max.as_secs()
        ))
    })
}
