//! # Token Audience Cache
//!
//! Short-lived, process-wide cache of service account JWTs keyed by
//! `(volume, region)`. Purely a latency optimization: a miss makes the
//! orchestrator fall back to the token bundle the driver sent with the
//! request, and backend failures never touch the cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::constants::TOKEN_CACHE_MAX_TTL_SECS;

#[derive(Debug)]
struct CachedToken {
    jwt: String,
    deadline: Instant,
}

/// In-memory TTL map of audience tokens.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<(String, String), CachedToken>>,
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the cached token for a volume/region pair.
    ///
    /// Misses and expired entries are errors; the caller falls back to the
    /// request's token bundle.
    pub fn get(&self, volume: &str, region: &str) -> Result<String> {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (volume.to_string(), region.to_string());
        match entries.get(&key) {
            Some(entry) if entry.deadline > Instant::now() => Ok(entry.jwt.clone()),
            Some(_) => {
                entries.remove(&key);
                Err(anyhow!("cached token for volume {volume} in {region} expired"))
            }
            None => Err(anyhow!("no cached token for volume {volume} in {region}")),
        }
    }

    /// Insert a token, capping its lifetime at one hour. Tokens already at
    /// or past expiry are not inserted.
    pub fn insert(&self, volume: &str, region: &str, jwt: &str, expires_at: DateTime<Utc>) {
        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return;
        }
        let ttl = remaining.min(Duration::from_secs(TOKEN_CACHE_MAX_TTL_SECS));
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(
            (volume.to_string(), region.to_string()),
            CachedToken {
                jwt: jwt.to_string(),
                deadline: Instant::now() + ttl,
            },
        );
    }
}
