use crate::cache::CacheStats;
use crate::resilience::RateLimiterSnapshot;
use crate::usage::UsageStats;

/// Point-in-time view of one provider/model key as seen by a client.
///
/// Facts only; callers build routing or backoff policy on top.
#[derive(Debug, Clone)]
pub struct SignalsSnapshot {
    pub cache: CacheStats,
    pub rate_limiter: RateLimiterSnapshot,
    pub usage: UsageStats,
}
