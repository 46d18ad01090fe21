//! Quote/route cache
//!
//! Time-bounded memoization of expensive router lookups, keyed by a
//! normalized request fingerprint. Expiry is a read-time check against the
//! injected clock — stale entries are never actively purged, only
//! overwritten by the next `put` (last writer wins per key). A soft
//! capacity cap drops the oldest entry to bound memory.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::config::CacheConfig;
use crate::protocols::types::{GasEstimate, QuoteRequest, Route};
use crate::time::SharedClock;

/// What kind of lookup an entry memoizes; each kind has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Quote,
    Route,
    Gas,
}

/// Normalized request fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Directional quote fingerprint: token order matters for pricing.
    pub fn quote(request: &QuoteRequest) -> Self {
        Self(format!(
            "q|{}>{}|{}|{}|{}",
            norm(&request.token_in),
            norm(&request.token_out),
            request.amount_in.normalize(),
            request
                .slippage_pct
                .map(|s| s.normalize().to_string())
                .unwrap_or_default(),
            request.venue.as_deref().map(norm).unwrap_or_default(),
        ))
    }

    pub fn routes(request: &QuoteRequest) -> Self {
        let Self(inner) = Self::quote(request);
        Self(format!("r|{inner}"))
    }

    pub fn gas(request: &QuoteRequest) -> Self {
        let Self(inner) = Self::quote(request);
        Self(format!("g|{inner}"))
    }
}

fn norm(token: &str) -> String {
    token.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: CacheKind,
    fingerprint: Fingerprint,
}

/// Values the cache may own. Cloned out on hit, never shared.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Quote(Route),
    Routes(Vec<Route>),
    Gas(GasEstimate),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    cached_at: DateTime<Utc>,
}

/// Concurrent TTL cache for router lookups
pub struct QuoteCache {
    entries: DashMap<CacheKey, CacheEntry>,
    config: CacheConfig,
    clock: SharedClock,
}

impl QuoteCache {
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
        }
    }

    fn ttl(&self, kind: CacheKind) -> Duration {
        let secs = match kind {
            CacheKind::Quote => self.config.quote_ttl_secs,
            CacheKind::Route => self.config.route_ttl_secs,
            CacheKind::Gas => self.config.gas_ttl_secs,
        };
        Duration::seconds(secs as i64)
    }

    /// Fresh value for the fingerprint, if any. Returns nothing once
    /// `now - cached_at >= ttl(kind)`; the stale entry stays in place
    /// until the next `put` overwrites it.
    pub fn get(&self, kind: CacheKind, fingerprint: &Fingerprint) -> Option<CachedValue> {
        let key = CacheKey {
            kind,
            fingerprint: fingerprint.clone(),
        };
        let entry = self.entries.get(&key)?;
        let age = self.clock.now() - entry.cached_at;
        if age >= self.ttl(kind) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, kind: CacheKind, fingerprint: Fingerprint, value: CachedValue) {
        if self.entries.len() >= self.config.max_entries
            && !self.entries.contains_key(&CacheKey {
                kind,
                fingerprint: fingerprint.clone(),
            })
        {
            self.drop_oldest();
        }
        self.entries.insert(
            CacheKey { kind, fingerprint },
            CacheEntry {
                value,
                cached_at: self.clock.now(),
            },
        );
    }

    fn drop_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().cached_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
