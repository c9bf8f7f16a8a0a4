//! Time utilities for safe timestamp handling.
//!
//! Timestamps inside the engine are `Duration`s since the Unix epoch so that
//! cache expiry and signed metadata share one clock, which tests can replace
//! through [`TimeProviderFn`](crate::token::TimeProviderFn).

use crate::token::error::TokenError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current time as a duration since the Unix epoch.
///
/// In the extremely rare case where system time is before the Unix epoch,
/// it returns an error instead of panicking.
pub(crate) fn current_time() -> Result<Duration, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| TokenError::ClockError("System time is before Unix epoch".to_string()))
}

/// Absolute expiry for an entry created at `now` with the given TTL.
pub(crate) fn expires_at(now: Duration, ttl: Duration) -> Duration {
    now.saturating_add(ttl)
}

/// An entry is fresh strictly before its expiry instant.
pub(crate) fn is_fresh(expires_at: Duration, now: Duration) -> bool {
    now < expires_at
}
