//! Boundary between the engine and the host's request pipeline.
//!
//! The engine never touches the response itself. It hands back a
//! [`TokenEmission`], and the host writes it out through a
//! [`ResponseSink`].
//!
//! # Output naming
//!
//! With `count == 1` the configured names are used as-is. With `count > 1`
//! token `i` (1-based) goes to `NAME_i` for environment variables and
//! `Name-i` for headers. Signed metadata goes next to its token under
//! `NAME_SIG` / `Name-Signature`, or `NAME_i_SIG` / `Name-i-Signature`.
//!
//! Named tokens follow the scope's own outputs, in declaration order, each
//! under its variable name and optional header.

use crate::token::cache::{CacheOutcome, MintedTokens};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Suffix of environment variables holding signed metadata.
pub const ENV_SIGNATURE_SUFFIX: &str = "_SIG";
/// Suffix of headers holding signed metadata.
pub const HEADER_SIGNATURE_SUFFIX: &str = "-Signature";

/// Where a value is written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputTarget {
    Header(String),
    Env(String),
}

/// Receives finished values for one request.
///
/// Implemented by the host; the engine only calls these two methods.
pub trait ResponseSink {
    /// Set a response header.
    fn set_header(&mut self, name: &str, value: &str);

    /// Set a variable in the request's environment.
    fn set_env(&mut self, name: &str, value: &str);
}

/// A [`ResponseSink`] that records everything it is given.
///
/// Useful for hosts that apply outputs later, and in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedOutputs {
    pub headers: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

impl RecordedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn env(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.env.is_empty()
    }
}

impl ResponseSink for RecordedOutputs {
    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    fn set_env(&mut self, name: &str, value: &str) {
        self.env.insert(name.to_string(), value.to_string());
    }
}

/// The tokens produced for one request and where they should go.
#[derive(Debug, Clone)]
pub struct TokenEmission {
    scope: String,
    minted: Arc<MintedTokens>,
    outcome: CacheOutcome,
    output_header: Option<String>,
    output_env: Option<String>,
    named: Vec<TokenEmission>,
}

impl TokenEmission {
    pub(crate) fn new(
        scope: String,
        minted: Arc<MintedTokens>,
        outcome: CacheOutcome,
        output_header: Option<String>,
        output_env: Option<String>,
    ) -> Self {
        Self {
            scope,
            minted,
            outcome,
            output_header,
            output_env,
            named: Vec::new(),
        }
    }

    pub(crate) fn with_named(mut self, named: Vec<TokenEmission>) -> Self {
        self.named = named;
        self
    }

    /// The finished tokens, in order.
    pub fn tokens(&self) -> &[String] {
        &self.minted.tokens
    }

    /// Signed metadata, one per token, or empty when signing is off.
    pub fn signatures(&self) -> &[String] {
        &self.minted.signatures
    }

    /// Identity of the scope chain that produced the tokens.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether the tokens were served from cache, generated, or awaited.
    pub fn outcome(&self) -> CacheOutcome {
        self.outcome
    }

    /// When the tokens were generated.
    pub fn issued_at(&self) -> Duration {
        self.minted.issued_at
    }

    /// The named tokens minted alongside, in declaration order.
    pub fn named(&self) -> &[TokenEmission] {
        &self.named
    }

    /// The named token written to the variable `name`, if any.
    pub fn named_token(&self, name: &str) -> Option<&TokenEmission> {
        self.named
            .iter()
            .rev()
            .find(|named| named.output_env.as_deref() == Some(name))
    }

    /// Every `(target, value)` pair this emission writes.
    pub fn assignments(&self) -> Vec<(OutputTarget, String)> {
        let tokens = self.tokens();
        let signatures = self.signatures();
        let numbered = tokens.len() > 1;
        let mut out = Vec::with_capacity(2 * (tokens.len() + signatures.len()));

        for (i, token) in tokens.iter().enumerate() {
            let signature = signatures.get(i);

            if let Some(base) = &self.output_header {
                let name = indexed(base, '-', numbered.then_some(i + 1));
                if let Some(signature) = signature {
                    out.push((
                        OutputTarget::Header(format!("{name}{HEADER_SIGNATURE_SUFFIX}")),
                        signature.clone(),
                    ));
                }
                out.push((OutputTarget::Header(name), token.clone()));
            }

            if let Some(base) = &self.output_env {
                let name = indexed(base, '_', numbered.then_some(i + 1));
                if let Some(signature) = signature {
                    out.push((
                        OutputTarget::Env(format!("{name}{ENV_SIGNATURE_SUFFIX}")),
                        signature.clone(),
                    ));
                }
                out.push((OutputTarget::Env(name), token.clone()));
            }
        }

        for named in &self.named {
            out.extend(named.assignments());
        }
        out
    }

    /// Writes every assignment to `sink`.
    pub fn emit(&self, sink: &mut dyn ResponseSink) {
        for (target, value) in self.assignments() {
            match target {
                OutputTarget::Header(name) => sink.set_header(&name, &value),
                OutputTarget::Env(name) => sink.set_env(&name, &value),
            }
        }
    }
}

fn indexed(base: &str, separator: char, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{base}{separator}{i}"),
        None => base.to_string(),
    }
}
