//! Per-source-address rate limiting for `CreateNetwork`/`JoinNetwork` (spec §4.3).
//!
//! Grounded on `ChainSafe-Delorean-Protocol`'s `ipld/resolver/src/limiter.rs`
//! `RateLimiter<K>`: a [`gcra::GcraState`] per key, evicted on an LRU/TTL basis
//! so an attacker churning through source addresses can't grow the bucket map
//! without bound.

use std::net::IpAddr;
use std::time::Duration;

use gcra::{GcraState, RateLimit};
use lru_time_cache::LruCache;
use tokio::sync::Mutex;

/// Burst of 3 requests, refilling at one token per 20 seconds (3/min), per
/// SPEC_FULL.md §4.3. `CreateNetwork` and `JoinNetwork` share a bucket since
/// both are the operations a PIN-guesser would hammer.
const BURST: u32 = 3;
const PERIOD: Duration = Duration::from_secs(60);
const BUCKET_TTL: Duration = Duration::from_secs(600);
const MAX_BUCKETS: usize = 10_000;

/// Token-bucket limiter keyed by source address.
pub struct RateLimiter {
    limit: RateLimit,
    buckets: Mutex<LruCache<IpAddr, GcraState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limit: RateLimit::new(BURST, PERIOD),
            buckets: Mutex::new(LruCache::with_expiry_duration_and_capacity(
                BUCKET_TTL,
                MAX_BUCKETS,
            )),
        }
    }

    /// Returns `true` if `addr` is within its budget for this call (and
    /// consumes one token), `false` if the request should be rejected.
    pub async fn check(&self, addr: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        let state = buckets.entry(addr).or_insert_with(GcraState::default);
        state.check_and_modify(&self.limit, 1).is_ok()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
