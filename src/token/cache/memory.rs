//! In-memory token cache.

use super::{
    CacheOutcome, CacheStats, CachedTokens, Generate, MintedTokens, SingleFlightPolicy, TokenCache,
};
use crate::TokenError;
use crate::token::time_utils::{expires_at, is_fresh};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, watch};

type Published = Option<Result<Arc<MintedTokens>, TokenError>>;

#[derive(Default)]
enum SlotState {
    #[default]
    Empty,
    Ready {
        value: Arc<MintedTokens>,
        expires_at: Duration,
    },
    Regenerating {
        previous: Option<(Arc<MintedTokens>, Duration)>,
        done: watch::Receiver<Published>,
    },
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // State transitions never panic halfway, so a poisoned lock still
        // holds a consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Claim {
    Hit(Arc<MintedTokens>),
    Stale(Arc<MintedTokens>),
    Wait(watch::Receiver<Published>),
    Generate(PublishGuard),
}

/// Publishes the winner's outcome to the slot and to every waiter.
///
/// Dropping the guard without calling [`PublishGuard::publish`] (the
/// generator panicked) restores the previous state and fails the waiters.
struct PublishGuard {
    slot: Arc<Slot>,
    tx: Option<watch::Sender<Published>>,
    previous: Option<(Arc<MintedTokens>, Duration)>,
}

impl PublishGuard {
    fn publish(
        mut self,
        result: Result<MintedTokens, TokenError>,
        now: Duration,
        ttl: Duration,
    ) -> Result<Arc<MintedTokens>, TokenError> {
        let Some(tx) = self.tx.take() else {
            return Err(TokenError::RegenerationFailed(
                "regeneration already published".to_string(),
            ));
        };

        match result {
            Ok(minted) => {
                let value = Arc::new(minted);
                *self.slot.lock() = SlotState::Ready {
                    value: Arc::clone(&value),
                    expires_at: expires_at(now, ttl),
                };
                tx.send_replace(Some(Ok(Arc::clone(&value))));
                Ok(value)
            }
            Err(err) => {
                self.restore();
                tx.send_replace(Some(Err(TokenError::RegenerationFailed(err.to_string()))));
                Err(err)
            }
        }
    }

    fn restore(&mut self) {
        *self.slot.lock() = match self.previous.take() {
            Some((value, expires_at)) => SlotState::Ready { value, expires_at },
            None => SlotState::Empty,
        };
    }
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!("Token generator panicked; releasing waiters");
            self.restore();
            tx.send_replace(Some(Err(TokenError::RegenerationFailed(
                "token generator panicked".to_string(),
            ))));
        }
    }
}

/// A [`TokenCache`] held in process memory.
///
/// Keys live in a `tokio::sync::RwLock<HashMap>` that is only held long
/// enough to find or insert a slot. Each slot has its own short mutex, and
/// no lock is held while a generator runs or a caller waits.
///
/// Entries are overwritten on regeneration and never swept, so memory is
/// bounded by the number of distinct scope chains.
///
/// # Example
///
/// ```rust
/// use request_token::cache::{CacheOutcome, MemoryTokenCache, MintedTokens, TokenCache};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), request_token::TokenError> {
/// let cache = MemoryTokenCache::new();
/// let generate = || {
///     Ok::<_, request_token::TokenError>(MintedTokens {
///         tokens: vec!["abc".to_string()],
///         signatures: Vec::new(),
///         issued_at: Duration::from_secs(100),
///     })
/// };
///
/// let now = Duration::from_secs(100);
/// let ttl = Duration::from_secs(5);
/// let first = cache.get_or_generate("site", now, ttl, &generate).await?;
/// assert_eq!(first.outcome, CacheOutcome::Generated);
///
/// let second = cache.get_or_generate("site", now, ttl, &generate).await?;
/// assert_eq!(second.outcome, CacheOutcome::Hit);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryTokenCache {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    policy: SingleFlightPolicy,
}

impl MemoryTokenCache {
    /// Creates an empty cache with the default single-flight policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cache with the given single-flight policy.
    pub fn with_policy(policy: SingleFlightPolicy) -> Self {
        Self {
            slots: RwLock::default(),
            policy,
        }
    }

    pub fn policy(&self) -> SingleFlightPolicy {
        self.policy
    }

    async fn slot(&self, key: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn claim(&self, slot: &Arc<Slot>, now: Duration) -> Claim {
        let mut state = slot.lock();

        let previous = match &*state {
            SlotState::Ready { value, expires_at } if is_fresh(*expires_at, now) => {
                return Claim::Hit(Arc::clone(value));
            }
            SlotState::Ready { value, expires_at } => Some((Arc::clone(value), *expires_at)),
            SlotState::Empty => None,
            SlotState::Regenerating { previous, done } => {
                return match (self.policy, previous) {
                    (SingleFlightPolicy::ServeStale, Some((value, _))) => {
                        Claim::Stale(Arc::clone(value))
                    }
                    _ => Claim::Wait(done.clone()),
                };
            }
        };

        let (tx, rx) = watch::channel(None);
        *state = SlotState::Regenerating {
            previous: previous.clone(),
            done: rx,
        };

        Claim::Generate(PublishGuard {
            slot: Arc::clone(slot),
            tx: Some(tx),
            previous,
        })
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn get_or_generate(
        &self,
        key: &str,
        now: Duration,
        ttl: Duration,
        generate: Generate<'_>,
    ) -> Result<CachedTokens, TokenError> {
        if ttl.is_zero() {
            return Ok(CachedTokens {
                value: Arc::new(generate()?),
                outcome: CacheOutcome::Bypassed,
            });
        }

        let slot = self.slot(key).await;

        match self.claim(&slot, now) {
            Claim::Hit(value) => Ok(CachedTokens {
                value,
                outcome: CacheOutcome::Hit,
            }),
            Claim::Stale(value) => {
                tracing::debug!(key, "Serving stale tokens during regeneration");
                Ok(CachedTokens {
                    value,
                    outcome: CacheOutcome::Stale,
                })
            }
            Claim::Generate(guard) => {
                tracing::debug!(key, "Regenerating tokens");
                let value = guard.publish(generate(), now, ttl)?;
                Ok(CachedTokens {
                    value,
                    outcome: CacheOutcome::Generated,
                })
            }
            Claim::Wait(mut done) => {
                tracing::debug!(key, "Waiting for concurrent regeneration");
                let published = done
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| {
                        TokenError::RegenerationFailed("regeneration abandoned".to_string())
                    })?
                    .clone();

                match published {
                    Some(Ok(value)) => Ok(CachedTokens {
                        value,
                        outcome: CacheOutcome::Awaited,
                    }),
                    Some(Err(err)) => Err(err),
                    None => Err(TokenError::RegenerationFailed(
                        "regeneration abandoned".to_string(),
                    )),
                }
            }
        }
    }

    async fn stats(&self, now: Duration) -> Result<CacheStats, TokenError> {
        let slots = self.slots.read().await;
        let mut stats = CacheStats {
            total_entries: slots.len(),
            backend_info: format!("In-memory token cache ({:?})", self.policy),
            ..CacheStats::default()
        };

        for slot in slots.values() {
            match &*slot.lock() {
                SlotState::Empty => stats.empty += 1,
                SlotState::Ready { expires_at, .. } if is_fresh(*expires_at, now) => {
                    stats.valid += 1
                }
                SlotState::Ready { .. } => stats.stale += 1,
                SlotState::Regenerating { .. } => stats.regenerating += 1,
            }
        }

        Ok(stats)
    }
}
