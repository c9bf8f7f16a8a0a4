//! Monitoring and metrics collection for token minting.
//!
//! This module provides a pluggable metrics system for tracking generation
//! cost, cache effectiveness and error rates. Metrics collection is optional
//! and can be enabled via the `metrics` feature.

use crate::TokenError;
use crate::token::cache::CacheOutcome;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Core metrics tracked by the token engine.
#[derive(Debug, Clone, Default)]
pub struct TokenMetrics {
    /// Cache lookups plus inactive and failed requests. Each named token
    /// is a lookup of its own.
    pub requests: u64,
    /// Total number of tokens generated (a generation may produce several)
    pub tokens_generated: u64,
    /// Lookups served from a fresh cache entry
    pub cache_hits: u64,
    /// Lookups that ran the generator
    pub cache_misses: u64,
    /// Lookups that waited for another request's generation
    pub cache_waits: u64,
    /// Lookups served a stale entry during regeneration
    pub stale_served: u64,
    /// Lookups with caching disabled
    pub cache_bypassed: u64,
    /// Requests for which the engine was inactive
    pub inactive_requests: u64,
    /// Breakdown of errors by type
    pub error_counts: ErrorMetrics,
    /// Performance metrics
    pub performance: PerformanceMetrics,
}

impl TokenMetrics {
    /// Fraction of cached lookups served without generating.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.cache_hits + self.cache_waits + self.stale_served;
        let total = served + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

/// Error metrics broken down by error type.
#[derive(Debug, Clone, Default)]
pub struct ErrorMetrics {
    pub entropy_unavailable: u64,
    pub invalid_config: u64,
    pub regeneration_failed: u64,
    pub crypto_errors: u64,
    pub other_errors: u64,
}

/// Performance-related metrics.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    /// Average time spent generating a token set (microseconds)
    pub avg_generation_time_us: u64,
    /// Number of samples used for averages
    pub sample_count: u64,
}

/// Events that can be tracked by the metrics system.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    /// A token set was generated
    TokensGenerated {
        /// Time taken to generate
        duration: Duration,
        /// Number of tokens in the set
        count: usize,
        /// Scope chain that was served
        scope: String,
    },
    /// A cached lookup completed
    CacheLookup {
        /// How the value was obtained
        outcome: CacheOutcome,
        /// Scope chain that was served
        scope: String,
    },
    /// The engine emitted nothing for a request
    Inactive {
        /// The request path
        path: String,
        /// Short reason, e.g. "disabled" or "no_matching_scope"
        reason: &'static str,
    },
    /// An error occurred
    Error {
        /// The error code that occurred
        error_code: &'static str,
        /// Error message
        error_message: String,
        /// Scope chain, when one was resolved
        scope: Option<String>,
    },
}

/// Trait for metrics collection backends.
///
/// # Thread Safety
///
/// All methods must be thread-safe as they may be called concurrently from
/// every request worker.
///
/// # Example Implementation
///
/// ```rust
/// use request_token::metrics::{MetricEvent, MetricsCollector, TokenMetrics};
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// pub struct GenerationCounter {
///     generated: AtomicU64,
/// }
///
/// #[async_trait]
/// impl MetricsCollector for GenerationCounter {
///     async fn record_event(&self, event: MetricEvent) {
///         if let MetricEvent::TokensGenerated { count, .. } = event {
///             self.generated.fetch_add(count as u64, Ordering::Relaxed);
///         }
///     }
///
///     async fn get_metrics(&self) -> Result<TokenMetrics, request_token::TokenError> {
///         Ok(TokenMetrics {
///             tokens_generated: self.generated.load(Ordering::Relaxed),
///             ..TokenMetrics::default()
///         })
///     }
///
///     async fn reset_metrics(&self) -> Result<(), request_token::TokenError> {
///         self.generated.store(0, Ordering::Relaxed);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Record a metric event.
    ///
    /// This method should be fast and non-blocking. Implementations that
    /// ship events elsewhere should buffer them.
    async fn record_event(&self, event: MetricEvent);

    /// Get current aggregated metrics.
    async fn get_metrics(&self) -> Result<TokenMetrics, TokenError>;

    /// Reset all metrics to zero.
    async fn reset_metrics(&self) -> Result<(), TokenError>;

    /// Flush any buffered metrics.
    ///
    /// The default implementation does nothing.
    async fn flush(&self) -> Result<(), TokenError> {
        Ok(())
    }
}

/// In-memory metrics collector using atomic counters.
///
/// Suitable for single-instance deployments; metrics are lost on restart.
///
/// # Example
///
/// ```rust
/// use request_token::cache::CacheOutcome;
/// use request_token::metrics::{InMemoryMetricsCollector, MetricEvent, MetricsCollector};
///
/// # async fn example() -> Result<(), request_token::TokenError> {
/// let collector = InMemoryMetricsCollector::new();
///
/// collector.record_event(MetricEvent::CacheLookup {
///     outcome: CacheOutcome::Hit,
///     scope: "site".to_string(),
/// }).await;
///
/// let metrics = collector.get_metrics().await?;
/// assert_eq!(metrics.cache_hits, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    requests: AtomicU64,
    tokens_generated: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_waits: AtomicU64,
    stale_served: AtomicU64,
    cache_bypassed: AtomicU64,
    inactive_requests: AtomicU64,

    // Error counts
    entropy_errors: AtomicU64,
    invalid_config_errors: AtomicU64,
    regeneration_errors: AtomicU64,
    crypto_errors: AtomicU64,
    other_errors: AtomicU64,

    // Performance tracking
    generation_time_total: AtomicU64,
    generation_samples: AtomicU64,
}

impl InMemoryMetricsCollector {
    /// Create a new in-memory metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> [&AtomicU64; 15] {
        [
            &self.requests,
            &self.tokens_generated,
            &self.cache_hits,
            &self.cache_misses,
            &self.cache_waits,
            &self.stale_served,
            &self.cache_bypassed,
            &self.inactive_requests,
            &self.entropy_errors,
            &self.invalid_config_errors,
            &self.regeneration_errors,
            &self.crypto_errors,
            &self.other_errors,
            &self.generation_time_total,
            &self.generation_samples,
        ]
    }
}

#[async_trait]
impl MetricsCollector for InMemoryMetricsCollector {
    async fn record_event(&self, event: MetricEvent) {
        match event {
            MetricEvent::TokensGenerated {
                duration, count, ..
            } => {
                self.tokens_generated
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.generation_time_total
                    .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
                self.generation_samples.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::CacheLookup { outcome, .. } => {
                self.requests.fetch_add(1, Ordering::Relaxed);
                let counter = match outcome {
                    CacheOutcome::Hit => &self.cache_hits,
                    CacheOutcome::Generated => &self.cache_misses,
                    CacheOutcome::Awaited => &self.cache_waits,
                    CacheOutcome::Stale => &self.stale_served,
                    CacheOutcome::Bypassed => &self.cache_bypassed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::Inactive { .. } => {
                self.requests.fetch_add(1, Ordering::Relaxed);
                self.inactive_requests.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::Error { error_code, .. } => {
                self.requests.fetch_add(1, Ordering::Relaxed);
                let counter = match error_code {
                    "entropy_unavailable" => &self.entropy_errors,
                    "invalid_config" => &self.invalid_config_errors,
                    "regeneration_failed" => &self.regeneration_errors,
                    "crypto_error" => &self.crypto_errors,
                    _ => &self.other_errors,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn get_metrics(&self) -> Result<TokenMetrics, TokenError> {
        let generation_samples = self.generation_samples.load(Ordering::Relaxed);

        Ok(TokenMetrics {
            requests: self.requests.load(Ordering::Relaxed),
            tokens_generated: self.tokens_generated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_waits: self.cache_waits.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            cache_bypassed: self.cache_bypassed.load(Ordering::Relaxed),
            inactive_requests: self.inactive_requests.load(Ordering::Relaxed),
            error_counts: ErrorMetrics {
                entropy_unavailable: self.entropy_errors.load(Ordering::Relaxed),
                invalid_config: self.invalid_config_errors.load(Ordering::Relaxed),
                regeneration_failed: self.regeneration_errors.load(Ordering::Relaxed),
                crypto_errors: self.crypto_errors.load(Ordering::Relaxed),
                other_errors: self.other_errors.load(Ordering::Relaxed),
            },
            performance: PerformanceMetrics {
                avg_generation_time_us: if generation_samples > 0 {
                    self.generation_time_total.load(Ordering::Relaxed) / generation_samples
                } else {
                    0
                },
                sample_count: generation_samples,
            },
        })
    }

    async fn reset_metrics(&self) -> Result<(), TokenError> {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// No-op metrics collector that discards all metrics.
#[derive(Debug, Default)]
pub struct NoOpMetricsCollector;

impl NoOpMetricsCollector {
    /// Create a new no-op metrics collector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsCollector for NoOpMetricsCollector {
    async fn record_event(&self, _event: MetricEvent) {
        // Do nothing
    }

    async fn get_metrics(&self) -> Result<TokenMetrics, TokenError> {
        Ok(TokenMetrics::default())
    }

    async fn reset_metrics(&self) -> Result<(), TokenError> {
        Ok(())
    }
}
