//! URL scopes and configuration resolution.
//!
//! A [`Scope`] binds a [`ScopeConfig`] layer to a URL subtree, given either
//! as a literal location prefix or as a regular expression. For a request
//! path, [`ScopeTree::chain`] selects every matching scope and orders them
//! from least to most specific; [`ScopeTree::resolve`] then folds their
//! layers over the root defaults.
//!
//! # Ordering
//!
//! Matched scopes are applied root to leaf, so later ones win. They are
//! ordered by:
//!
//! 1. nesting depth, counted as the non-empty `/` segments of the pattern's
//!    literal prefix (for a regex, the text before its first metacharacter,
//!    ignoring a leading `^`, and without the last character when that
//!    metacharacter is `?`, `*` or `{`)
//! 2. at equal depth, location prefixes before regular expressions
//! 3. then the shorter literal prefix before the longer one
//! 4. then declaration order

use crate::TokenError;
use crate::token::config::{ResolvedConfig, ScopeConfig};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

/// Separator between scope names in a chain identity.
pub const CHAIN_SEPARATOR: char = '>';
/// Separator between a chain identity and a named token's variable.
pub const NAMED_TOKEN_SEPARATOR: char = '#';

/// Characters that end the literal prefix of a regular expression.
const REGEX_META: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

/// Quantifiers that allow the preceding character to be absent.
const OPTIONAL_QUANTIFIERS: &[char] = &['?', '*', '{'];

/// The part of a scope that decides which paths it covers.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    /// Matches the location itself and everything nested under it at a
    /// segment boundary.
    Prefix(String),
    /// Matches when the expression finds a match anywhere in the path.
    Regex(Regex),
}

impl UrlPattern {
    /// Whether this pattern covers `path`.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            UrlPattern::Prefix(location) => prefix_matches(location, path),
            UrlPattern::Regex(regex) => regex.is_match(path),
        }
    }

    /// The literal text every matching path starts with.
    pub fn literal_prefix(&self) -> &str {
        match self {
            UrlPattern::Prefix(location) => location,
            UrlPattern::Regex(regex) => {
                let source = regex.as_str();
                let source = source.strip_prefix('^').unwrap_or(source);
                let Some(end) = source.find(REGEX_META) else {
                    return source;
                };
                let literal = &source[..end];
                // `?`, `*` and `{` may repeat the last literal zero times.
                if source[end..].starts_with(OPTIONAL_QUANTIFIERS) {
                    match literal.char_indices().last() {
                        Some((last, _)) => &literal[..last],
                        None => literal,
                    }
                } else {
                    literal
                }
            }
        }
    }

    /// Nesting depth used for ordering.
    pub fn depth(&self) -> usize {
        self.literal_prefix()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .count()
    }

    fn is_regex(&self) -> bool {
        matches!(self, UrlPattern::Regex(_))
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Prefix(location) => f.write_str(location),
            UrlPattern::Regex(regex) => write!(f, "~{}", regex.as_str()),
        }
    }
}

fn prefix_matches(location: &str, path: &str) -> bool {
    match path.strip_prefix(location) {
        Some(rest) => rest.is_empty() || location.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// A named configuration layer bound to a URL pattern.
///
/// # Example
///
/// ```rust
/// use request_token::config::ScopeConfig;
/// use request_token::encoding::Format;
/// use request_token::scope::Scope;
///
/// let api = Scope::prefix("api", "/api")
///     .with_config(ScopeConfig::new().with_format(Format::Hex));
/// assert!(api.pattern().matches("/api/users"));
/// assert!(!api.pattern().matches("/apis"));
///
/// let assets = Scope::regex("assets", r"^/static/.*\.js$")?;
/// assert!(assets.pattern().matches("/static/app.js"));
/// # Ok::<(), request_token::TokenError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Scope {
    name: String,
    pattern: UrlPattern,
    config: ScopeConfig,
}

impl Scope {
    /// A scope covering `location` and everything below it.
    pub fn prefix(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: UrlPattern::Prefix(location.into()),
            config: ScopeConfig::default(),
        }
    }

    /// A scope covering every path the expression matches.
    pub fn regex(name: impl Into<String>, expr: &str) -> Result<Self, TokenError> {
        let regex = Regex::new(expr)
            .map_err(|e| TokenError::InvalidConfig(format!("invalid url pattern: {e}")))?;
        Ok(Self {
            name: name.into(),
            pattern: UrlPattern::Regex(regex),
            config: ScopeConfig::default(),
        })
    }

    /// A scope built from a textual url pattern and option list.
    ///
    /// A `url_pattern` starting with `~` is a regular expression; anything
    /// else is a location prefix.
    pub fn from_options<'a, I>(
        name: impl Into<String>,
        url_pattern: &str,
        options: I,
    ) -> Result<Self, TokenError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let scope = match url_pattern.strip_prefix('~') {
            Some(expr) => Self::regex(name, expr.trim_start())?,
            None => Self::prefix(name, url_pattern),
        };
        Ok(scope.with_config(ScopeConfig::from_options(options)?))
    }

    /// Replaces this scope's configuration layer.
    pub fn with_config(mut self, config: ScopeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }
}

/// The ordered list of scopes matching one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChain {
    indices: Vec<usize>,
    key: String,
}

impl ScopeChain {
    /// Identity of the chain, e.g. `site>api>v2`.
    ///
    /// Used as the cache key and recorded in signed metadata.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Declaration indices of the matched scopes, root first.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

/// All declared scopes of an engine.
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    /// Builds a tree, checking every scope's layer.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when two scopes share a name, a name contains one of
    /// the key separators, or a layer fails [`ScopeConfig::validate`].
    pub fn new(scopes: Vec<Scope>) -> Result<Self, TokenError> {
        let mut names = HashSet::new();
        for scope in &scopes {
            if scope.name.is_empty()
                || scope.name.contains([CHAIN_SEPARATOR, NAMED_TOKEN_SEPARATOR])
            {
                return Err(TokenError::InvalidConfig(format!(
                    "scope name '{}' must be non-empty and must not contain \
                     '{CHAIN_SEPARATOR}' or '{NAMED_TOKEN_SEPARATOR}'",
                    scope.name
                )));
            }
            if !names.insert(scope.name.as_str()) {
                return Err(TokenError::InvalidConfig(format!(
                    "duplicate scope name '{}'",
                    scope.name
                )));
            }
            scope.config.validate().map_err(|e| match e {
                TokenError::InvalidConfig(msg) => {
                    TokenError::InvalidConfig(format!("scope '{}': {msg}", scope.name))
                }
                other => other,
            })?;
        }
        Ok(Self { scopes })
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Scope> {
        self.scopes.get(index)
    }

    /// Matches `path` and orders the result.
    ///
    /// # Errors
    ///
    /// `NoMatchingScope` when no scope covers the path.
    pub fn chain(&self, path: &str) -> Result<ScopeChain, TokenError> {
        let mut matched: Vec<(usize, &Scope)> = self
            .scopes
            .iter()
            .enumerate()
            .filter(|(_, scope)| scope.pattern.matches(path))
            .collect();

        if matched.is_empty() {
            return Err(TokenError::NoMatchingScope(path.to_string()));
        }

        matched.sort_by_key(|(index, scope)| {
            (
                scope.pattern.depth(),
                scope.pattern.is_regex(),
                scope.pattern.literal_prefix().len(),
                *index,
            )
        });

        let key = matched
            .iter()
            .map(|(_, scope)| scope.name.as_str())
            .collect::<Vec<_>>()
            .join(CHAIN_SEPARATOR.to_string().as_str());

        Ok(ScopeChain {
            indices: matched.into_iter().map(|(index, _)| index).collect(),
            key,
        })
    }

    /// Folds the chain's layers over `root`.
    pub fn merge_chain(&self, chain: &ScopeChain, root: &ResolvedConfig) -> ResolvedConfig {
        chain
            .indices
            .iter()
            .filter_map(|index| self.scopes.get(*index))
            .fold(root.clone(), |resolved, scope| resolved.merge(&scope.config))
    }

    /// Matches, orders and merges in one step.
    pub fn resolve(
        &self,
        path: &str,
        root: &ResolvedConfig,
    ) -> Result<(ScopeChain, ResolvedConfig), TokenError> {
        let chain = self.chain(path)?;
        let resolved = self.merge_chain(&chain, root);
        Ok((chain, resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::encoding::Format;
    use std::time::Duration;

    fn tree(scopes: Vec<Scope>) -> ScopeTree {
        ScopeTree::new(scopes).unwrap()
    }

    #[test]
    fn test_prefix_matching_respects_segments() {
        let pattern = UrlPattern::Prefix("/a".to_string());
        assert!(pattern.matches("/a"));
        assert!(pattern.matches("/a/"));
        assert!(pattern.matches("/a/b"));
        assert!(!pattern.matches("/ab"));
        assert!(!pattern.matches("/"));

        let root = UrlPattern::Prefix("/".to_string());
        assert!(root.matches("/"));
        assert!(root.matches("/anything/at/all"));

        let trailing = UrlPattern::Prefix("/a/".to_string());
        assert!(trailing.matches("/a/b"));
        assert!(!trailing.matches("/a"));
    }

    #[test]
    fn test_literal_prefix_and_depth() {
        let regex = UrlPattern::Regex(Regex::new(r"^/api/v[0-9]+/").unwrap());
        assert_eq!(regex.literal_prefix(), "/api/v");
        assert_eq!(regex.depth(), 2);

        // The optional "x" is not part of every matching path.
        let optional = UrlPattern::Regex(Regex::new(r"^/admin/x?").unwrap());
        assert_eq!(optional.literal_prefix(), "/admin/");
        assert_eq!(optional.depth(), 1);
        assert!(optional.matches("/admin/"));

        let starred = UrlPattern::Regex(Regex::new(r"^/files/docs*").unwrap());
        assert_eq!(starred.literal_prefix(), "/files/doc");

        let repeated = UrlPattern::Regex(Regex::new(r"^/v{0,1}/api").unwrap());
        assert_eq!(repeated.literal_prefix(), "/");

        // One or more keeps the character.
        let plus = UrlPattern::Regex(Regex::new(r"^/shop/items+").unwrap());
        assert_eq!(plus.literal_prefix(), "/shop/items");

        let unanchored = UrlPattern::Regex(Regex::new(r"\.php$").unwrap());
        assert_eq!(unanchored.literal_prefix(), "");
        assert_eq!(unanchored.depth(), 0);

        assert_eq!(UrlPattern::Prefix("/".to_string()).depth(), 0);
        assert_eq!(UrlPattern::Prefix("/a/b/".to_string()).depth(), 2);
    }

    #[test]
    fn test_no_matching_scope() {
        let tree = tree(vec![Scope::prefix("api", "/api")]);
        assert!(matches!(
            tree.chain("/other"),
            Err(TokenError::NoMatchingScope(_))
        ));
    }

    #[test]
    fn test_chain_orders_by_depth() {
        let tree = tree(vec![
            Scope::prefix("deep", "/a/b"),
            Scope::prefix("root", "/"),
            Scope::prefix("mid", "/a"),
        ]);
        let chain = tree.chain("/a/b/c").unwrap();
        assert_eq!(chain.key(), "root>mid>deep");
        assert_eq!(chain.indices(), &[1, 2, 0]);
    }

    #[test]
    fn test_regex_tie_break() {
        // All four sit at depth 2.
        let shop = tree(vec![
            Scope::regex("re_long", r"^/shop/item").unwrap(),
            Scope::regex("re_short", r"^/shop/i").unwrap(),
            Scope::prefix("loc", "/shop/item"),
            Scope::regex("re_dup", r"^/shop/i").unwrap(),
        ]);
        let chain = shop.chain("/shop/item/42").unwrap();
        assert_eq!(chain.key(), "loc>re_short>re_dup>re_long");

        let short = Scope::prefix("a", "/x").with_config(ScopeConfig::new().with_length(10));
        let long = Scope::regex("b", r"^/x/y")
            .unwrap()
            .with_config(ScopeConfig::new().with_length(20));
        let (_, resolved) = tree(vec![long, short])
            .resolve("/x/y", &ResolvedConfig::default())
            .unwrap();
        // "/x/y" has depth 2 and wins over "/x" at depth 1.
        assert_eq!(resolved.length, 20);
    }

    #[test]
    fn test_later_declaration_wins_on_full_tie() {
        let tree = tree(vec![
            Scope::prefix("first", "/a").with_config(ScopeConfig::new().with_length(8)),
            Scope::prefix("second", "/a").with_config(ScopeConfig::new().with_length(12)),
        ]);
        let (chain, resolved) = tree.resolve("/a/x", &ResolvedConfig::default()).unwrap();
        assert_eq!(chain.key(), "first>second");
        assert_eq!(resolved.length, 12);
    }

    #[test]
    fn test_resolve_inherits_from_parent_scope() {
        let tree = tree(vec![
            Scope::prefix("root", "/").with_config(
                ScopeConfig::new()
                    .with_length(24)
                    .with_ttl(Duration::from_secs(5)),
            ),
            Scope::prefix("api", "/api").with_config(ScopeConfig::new().with_format(Format::Hex)),
        ]);
        let (_, resolved) = tree.resolve("/api/x", &ResolvedConfig::default()).unwrap();
        assert_eq!(resolved.format, Format::Hex);
        assert_eq!(resolved.length, 24);
        assert_eq!(resolved.ttl, Duration::from_secs(5));
    }

    #[test]
    fn test_from_options() {
        let scope = Scope::from_options("js", r"~ \.js$", [("format", "hex")]).unwrap();
        assert!(matches!(scope.pattern(), UrlPattern::Regex(_)));
        assert!(scope.pattern().matches("/app.js"));
        assert_eq!(scope.config().format, Some(Format::Hex));

        let scope = Scope::from_options("site", "/site", [("length", "8")]).unwrap();
        assert!(matches!(scope.pattern(), UrlPattern::Prefix(_)));
        assert_eq!(scope.pattern().to_string(), "/site");

        assert!(Scope::from_options("bad", "~(", []).is_err());
        assert!(Scope::from_options("bad", "/", [("length", "0")]).is_err());
    }

    #[test]
    fn test_tree_rejects_bad_declarations() {
        assert!(ScopeTree::new(vec![Scope::prefix("a", "/"), Scope::prefix("a", "/b")]).is_err());
        assert!(ScopeTree::new(vec![Scope::prefix("a>b", "/")]).is_err());
        assert!(ScopeTree::new(vec![Scope::prefix("a#b", "/")]).is_err());
        assert!(
            ScopeTree::new(vec![
                Scope::prefix("a", "/").with_config(ScopeConfig::new().with_count(0))
            ])
            .is_err()
        );
    }
}
