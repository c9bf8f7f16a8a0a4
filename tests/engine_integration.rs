//! End-to-end tests for the token engine.
//!
//! Run with: cargo test --test engine_integration

use request_token::cache::{CacheOutcome, SingleFlightPolicy};
use request_token::config::ScopeConfig;
use request_token::encoding::Format;
use request_token::entropy::{EntropySource, OsEntropy};
use request_token::metadata;
use request_token::scope::Scope;
use request_token::signature::SigningKey;
use request_token::{RecordedOutputs, TokenEngine, TokenError};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A clock the test moves by hand.
#[derive(Clone)]
struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    fn set(&self, secs: u64) {
        self.0.store(secs, Ordering::SeqCst);
    }

    fn provider(&self) -> impl Fn() -> Result<Duration, TokenError> + Send + Sync + 'static {
        let clock = Arc::clone(&self.0);
        move || Ok(Duration::from_secs(clock.load(Ordering::SeqCst)))
    }
}

/// Counts fills and can be made slow or broken.
#[derive(Default)]
struct InstrumentedSource {
    fills: AtomicUsize,
    delay_ms: AtomicU64,
    broken: AtomicBool,
}

impl EntropySource for InstrumentedSource {
    fn name(&self) -> &'static str {
        "instrumented"
    }

    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError> {
        self.fills.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(TokenError::EntropyUnavailable("source unplugged".to_string()));
        }
        OsEntropy.fill(buf)
    }
}

#[tokio::test]
async fn test_hex_token_cached_for_ttl() {
    init_tracing();
    let clock = ManualClock::new(1_700_000_000);
    let engine = TokenEngine::builder()
        .with_scope(Scope::prefix("a", "/a").with_config(
            ScopeConfig::new()
                .with_format(Format::Hex)
                .with_length(16)
                .with_ttl(Duration::from_secs(5))
                .with_output_header("X-Token"),
        ))
        .with_time_provider(clock.provider())
        .build()
        .unwrap();

    let mut first = RecordedOutputs::new();
    assert!(engine.handle("/a", &mut first).await.unwrap());
    let token = first.header("X-Token").unwrap().to_string();
    assert_eq!(token.len(), 32);
    assert!(
        token
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    );

    clock.set(1_700_000_003);
    let mut second = RecordedOutputs::new();
    engine.handle("/a/page", &mut second).await.unwrap();
    assert_eq!(second.header("X-Token"), Some(token.as_str()));

    clock.set(1_700_000_006);
    let mut third = RecordedOutputs::new();
    engine.handle("/a", &mut third).await.unwrap();
    let renewed = third.header("X-Token").unwrap();
    assert_eq!(renewed.len(), 32);
    assert_ne!(renewed, token);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_single_flight_on_expired_key() {
    init_tracing();
    let clock = ManualClock::new(1_000);
    let source = Arc::new(InstrumentedSource::default());
    let engine = Arc::new(
        TokenEngine::builder()
            .with_scope(
                Scope::prefix("site", "/")
                    .with_config(ScopeConfig::new().with_ttl(Duration::from_secs(5))),
            )
            .with_entropy_source(source.clone())
            .with_time_provider(clock.provider())
            .build()
            .unwrap(),
    );

    let warm = engine.mint("/").await.unwrap().unwrap();
    assert_eq!(source.fills.load(Ordering::SeqCst), 1);

    // Expire the entry and make the next generation slow.
    clock.set(1_010);
    source.delay_ms.store(100, Ordering::SeqCst);

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.mint(&format!("/page/{i}")).await })
        })
        .collect();

    let mut tokens = HashSet::new();
    let mut generated = 0;
    for handle in handles {
        let emission = handle.await.unwrap().unwrap().unwrap();
        if emission.outcome() == CacheOutcome::Generated {
            generated += 1;
        }
        tokens.insert(emission.tokens()[0].clone());
    }

    assert_eq!(source.fills.load(Ordering::SeqCst), 2);
    assert_eq!(generated, 1);
    assert_eq!(tokens.len(), 1);
    assert!(!tokens.contains(&warm.tokens()[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generation_failure_releases_waiters() {
    init_tracing();
    let clock = ManualClock::new(1_000);
    let source = Arc::new(InstrumentedSource::default());
    source.delay_ms.store(100, Ordering::SeqCst);
    source.broken.store(true, Ordering::SeqCst);

    let engine = Arc::new(
        TokenEngine::builder()
            .with_scope(
                Scope::prefix("site", "/")
                    .with_config(ScopeConfig::new().with_ttl(Duration::from_secs(5))),
            )
            .with_entropy_source(source.clone())
            .with_time_provider(clock.provider())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.mint("/").await })
        })
        .collect();

    // Every caller finishes, each with an error.
    for handle in handles {
        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("caller stuck waiting")
            .unwrap();
        assert!(matches!(
            result,
            Err(TokenError::EntropyUnavailable(_)) | Err(TokenError::RegenerationFailed(_))
        ));
    }

    // The key is not wedged: once entropy is back the next request succeeds.
    source.broken.store(false, Ordering::SeqCst);
    source.delay_ms.store(0, Ordering::SeqCst);
    let emission = engine.mint("/").await.unwrap().unwrap();
    assert_eq!(emission.outcome(), CacheOutcome::Generated);
}

#[tokio::test]
async fn test_zero_ttl_mints_every_request() {
    let source = Arc::new(InstrumentedSource::default());
    let engine = TokenEngine::builder()
        .with_scope(Scope::prefix("site", "/"))
        .with_entropy_source(source.clone())
        .build()
        .unwrap();

    let mut tokens = HashSet::new();
    for _ in 0..10 {
        let emission = engine.mint("/").await.unwrap().unwrap();
        assert_eq!(emission.outcome(), CacheOutcome::Bypassed);
        tokens.insert(emission.tokens()[0].clone());
    }
    assert_eq!(tokens.len(), 10);
    assert_eq!(source.fills.load(Ordering::SeqCst), 10);
    assert_eq!(engine.cache_stats().await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn test_child_scope_inherits_parent_settings() {
    let engine = TokenEngine::builder()
        .with_scope(Scope::prefix("site", "/").with_config(
            ScopeConfig::new()
                .with_length(24)
                .with_prefix("tok_")
                .with_output_header("X-Token"),
        ))
        .with_scope(
            Scope::prefix("api", "/api").with_config(ScopeConfig::new().with_format(Format::Hex)),
        )
        .build()
        .unwrap();

    let site = engine.mint("/").await.unwrap().unwrap();
    let api = engine.mint("/api/users").await.unwrap().unwrap();

    // base64url of 24 bytes is 32 characters; hex is 48.
    assert_eq!(site.tokens()[0].len(), 4 + 32);
    assert_eq!(api.tokens()[0].len(), 4 + 48);
    assert!(api.tokens()[0].starts_with("tok_"));
    assert_eq!(api.scope(), "site>api");

    let mut outputs = RecordedOutputs::new();
    engine.handle("/api/users", &mut outputs).await.unwrap();
    assert!(outputs.header("X-Token").is_some());
}

#[tokio::test]
async fn test_regex_scope_ordering() {
    let engine = TokenEngine::builder()
        .with_scope(Scope::prefix("root", "/").with_config(ScopeConfig::new().with_length(8)))
        .with_scope(
            Scope::regex("any_js", r"\.js$")
                .unwrap()
                .with_config(ScopeConfig::new().with_format(Format::Hex)),
        )
        .with_scope(
            Scope::prefix("static", "/static")
                .with_config(ScopeConfig::new().with_format(Format::Base64)),
        )
        .with_scope(
            Scope::regex("static_re", r"^/static/js/")
                .unwrap()
                .with_config(ScopeConfig::new().with_length(4)),
        )
        .build()
        .unwrap();

    // any_js ties with root at depth 0 and sorts after it as a regex.
    let (chain, config) = engine.resolve("/static/js/app.js").await.unwrap();
    assert_eq!(chain.key(), "root>any_js>static>static_re");
    assert_eq!(config.format, Format::Base64);
    assert_eq!(config.length, 4);

    let (chain, config) = engine.resolve("/lib/app.js").await.unwrap();
    assert_eq!(chain.key(), "root>any_js");
    assert_eq!(config.format, Format::Hex);
    assert_eq!(config.length, 8);
}

#[tokio::test]
async fn test_signing_key_inheritance() {
    let key = SigningKey::new(b"site-wide-key").unwrap();
    let engine = TokenEngine::builder()
        .with_scope(Scope::prefix("site", "/").with_config(
            ScopeConfig::new()
                .with_signing_key(key.clone())
                .with_expiry(Duration::from_secs(60)),
        ))
        .with_scope(
            Scope::prefix("shared", "/shared")
                .with_config(ScopeConfig::new().with_inherited_signing_key()),
        )
        .with_scope(Scope::prefix("isolated", "/isolated").with_config(ScopeConfig::new()))
        .with_scope(
            Scope::prefix("unsigned", "/plain").with_config(ScopeConfig::new().with_sign(false)),
        )
        .build()
        .unwrap();

    let shared = engine.mint("/shared/x").await.unwrap().unwrap();
    let payload = metadata::verify(&shared.signatures()[0], &key).unwrap();
    assert_eq!(payload.token, shared.tokens()[0]);
    assert_eq!(payload.scope, "site>shared");
    assert_eq!(payload.expires_at, Some(payload.issued_at + 60));

    // Signing stays on but the key does not cross the boundary.
    assert!(engine.mint("/isolated/x").await.unwrap().is_none());
    assert!(matches!(
        engine.resolve("/isolated").await,
        Err(TokenError::InvalidConfig(_))
    ));

    let plain = engine.mint("/plain").await.unwrap().unwrap();
    assert!(plain.signatures().is_empty());
}

#[tokio::test]
async fn test_multiple_tokens_and_metadata_naming() {
    let key = SigningKey::new(b"k").unwrap();
    let engine = TokenEngine::builder()
        .with_scope(Scope::prefix("site", "/").with_config(
            ScopeConfig::new()
                .with_count(3)
                .with_signing_key(key.clone())
                .with_output_header("X-Token")
                .with_output_env("TOKEN"),
        ))
        .build()
        .unwrap();

    let mut outputs = RecordedOutputs::new();
    engine.handle("/", &mut outputs).await.unwrap();

    for i in 1..=3 {
        let token = outputs.env(&format!("TOKEN_{i}")).unwrap();
        assert_eq!(outputs.header(&format!("X-Token-{i}")), Some(token));

        let signed = outputs.env(&format!("TOKEN_{i}_SIG")).unwrap();
        assert_eq!(
            outputs.header(&format!("X-Token-{i}-Signature")),
            Some(signed)
        );
        assert_eq!(metadata::verify(signed, &key).unwrap().token, token);
    }
    assert_eq!(outputs.env.len(), 6);
    assert_eq!(outputs.headers.len(), 6);
}

#[tokio::test]
async fn test_options_surface_end_to_end() {
    let engine = TokenEngine::builder()
        .with_scope(
            Scope::from_options(
                "codes",
                "/codes",
                [
                    ("format", "custom"),
                    ("alphabet", "0123456789"),
                    ("length", "12"),
                    ("alphabet-grouping", "4"),
                    ("include-timestamp", "on"),
                    ("output-env", "CODE"),
                ],
            )
            .unwrap(),
        )
        .with_time_provider(|| Ok(Duration::from_secs(1_234)))
        .build()
        .unwrap();

    let mut outputs = RecordedOutputs::new();
    engine.handle("/codes/new", &mut outputs).await.unwrap();

    let code = outputs.env("CODE").unwrap();
    let body = code.strip_prefix("1234-").unwrap();
    assert_eq!(body.len(), 14);
    let groups: Vec<_> = body.split('-').collect();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|g| g.len() == 4));
    assert!(body.chars().all(|c| c.is_ascii_digit() || c == '-'));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serve_stale_policy() {
    let clock = ManualClock::new(1_000);
    let source = Arc::new(InstrumentedSource::default());
    let engine = Arc::new(
        TokenEngine::builder()
            .with_single_flight_policy(SingleFlightPolicy::ServeStale)
            .with_scope(
                Scope::prefix("site", "/")
                    .with_config(ScopeConfig::new().with_ttl(Duration::from_secs(5))),
            )
            .with_entropy_source(source.clone())
            .with_time_provider(clock.provider())
            .build()
            .unwrap(),
    );

    let old = engine.mint("/").await.unwrap().unwrap();

    clock.set(1_100);
    source.delay_ms.store(300, Ordering::SeqCst);
    let regenerating = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.mint("/").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stale = engine.mint("/").await.unwrap().unwrap();
    assert_eq!(stale.outcome(), CacheOutcome::Stale);
    assert_eq!(stale.tokens(), old.tokens());

    let fresh = regenerating.await.unwrap().unwrap().unwrap();
    assert_eq!(fresh.outcome(), CacheOutcome::Generated);
    assert_ne!(fresh.tokens(), old.tokens());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_named_tokens_from_options() {
    init_tracing();
    let clock = ManualClock::new(1_000);
    let engine = Arc::new(
        TokenEngine::builder()
            .with_scope(
                Scope::from_options(
                    "site",
                    "/",
                    [
                        ("ttl", "30"),
                        ("add-token", "REQUEST_ID format=hex length=8 ttl=0"),
                    ],
                )
                .unwrap(),
            )
            .with_scope(
                Scope::from_options(
                    "forms",
                    "/forms",
                    [(
                        "add-token",
                        "CSRF_TOKEN length=32 format=hex header=X-CSRF-Token prefix=csrf_",
                    )],
                )
                .unwrap(),
            )
            .with_time_provider(clock.provider())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut outputs = RecordedOutputs::new();
                engine.handle("/forms/login", &mut outputs).await.unwrap();
                outputs
            })
        })
        .collect();

    let mut csrf_tokens = HashSet::new();
    let mut request_ids = HashSet::new();
    for handle in handles {
        let outputs = handle.await.unwrap();
        let csrf = outputs.env("CSRF_TOKEN").unwrap().to_string();
        assert_eq!(outputs.header("X-CSRF-Token"), Some(csrf.as_str()));
        assert!(csrf.starts_with("csrf_"));
        assert_eq!(csrf.len(), 5 + 64);
        csrf_tokens.insert(csrf);
        request_ids.insert(outputs.env("REQUEST_ID").unwrap().to_string());
    }

    // The CSRF token inherits the 30s TTL, the request id opts out of it.
    assert_eq!(csrf_tokens.len(), 1);
    assert_eq!(request_ids.len(), 16);

    clock.set(1_031);
    let mut outputs = RecordedOutputs::new();
    engine.handle("/forms/login", &mut outputs).await.unwrap();
    assert!(!csrf_tokens.contains(outputs.env("CSRF_TOKEN").unwrap()));

    // Outside the child scope only the parent's token is added.
    let mut outputs = RecordedOutputs::new();
    engine.handle("/about", &mut outputs).await.unwrap();
    assert!(outputs.env("REQUEST_ID").is_some());
    assert!(outputs.env("CSRF_TOKEN").is_none());
}
