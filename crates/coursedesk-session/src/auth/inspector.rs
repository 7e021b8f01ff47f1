//! Pure checks deciding whether a stored session can still be trusted.
//!
//! Both checks fail closed: anything that cannot be decoded or is missing
//! counts as expired or inactive.

use chrono::{DateTime, Duration, Utc};

use super::Credential;

/// True if the credential's embedded expiry has passed, or cannot be decoded.
pub fn is_expired(credential: &Credential, now: DateTime<Utc>) -> bool {
    match credential.expires_at() {
        Some(expiry) => now >= expiry,
        None => true,
    }
}

/// True if more than `max_idle` has passed since the last recorded activity.
pub fn is_inactive(last_active: Option<DateTime<Utc>>, now: DateTime<Utc>, max_idle: Duration) -> bool {
    match last_active {
        Some(last_active) => now - last_active > max_idle,
        None => true,
    }
}
