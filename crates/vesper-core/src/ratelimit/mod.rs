//! Rate limiter (the C8 backpressure contract)
//!
//! Sliding-window counter keyed by `(user, operation)`, backed by the cache
//! tier's sorted sets: add `(now, nonce)`, drop entries older than the
//! window, count, and expire the key at twice the window.
//!
//! When the backing store is unreachable the limiter fails closed (denial
//! with a 30 second retry hint) unless the operator explicitly opts into
//! fail-open.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::RateTier;
use crate::error::Result;

/// Window length in seconds
pub const WINDOW_SECS: u64 = 60;

/// Retry hint when the limiter itself is unavailable
pub const FAIL_CLOSED_RETRY_SECS: u64 = 30;

/// Operations with distinct quotas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Store,
    Retrieve,
    ListRecent,
    GetStats,
}

impl Operation {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Store => "store",
            Operation::Retrieve => "retrieve",
            Operation::ListRecent => "list_recent",
            Operation::GetStats => "get_stats",
        }
    }
}

/// Per-tier quota table (requests per 60 s window)
pub fn quota(tier: RateTier, operation: Operation) -> u32 {
    match tier {
        RateTier::Standard => match operation {
            Operation::Store => 100,
            Operation::Retrieve => 300,
            Operation::ListRecent => 60,
            Operation::GetStats => 30,
        },
        RateTier::Premium => match operation {
            Operation::Store => 500,
            Operation::Retrieve => 1000,
            Operation::ListRecent => 200,
            Operation::GetStats => 100,
        },
        RateTier::Unlimited => 1_000_000,
    }
}

/// Outcome of one admission check; carries everything the transport needs
/// for the `X-RateLimit-*` and `Retry-After` headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// HTTP-equivalent status: 200, 429, or 503
    pub status: u16,
    /// Window quota (X-RateLimit-Limit)
    pub limit: u32,
    /// Requests left in the window (X-RateLimit-Remaining)
    pub remaining: u32,
    /// Unix timestamp when the window resets (X-RateLimit-Reset)
    pub reset_at: i64,
    /// Retry hint in seconds, present on every denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// The sliding-window rate limiter (C8)
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    fail_closed: bool,
}

impl RateLimiter {
    /// Create a limiter over the cache backend
    pub fn new(cache: Arc<dyn Cache>, fail_closed: bool) -> Self {
        Self { cache, fail_closed }
    }

    /// Admit or deny one request for `(user, operation)` at `tier`
    pub fn check(
        &self,
        tier: RateTier,
        user_id: &str,
        operation: Operation,
    ) -> Result<RateLimitDecision> {
        let limit = quota(tier, operation);
        let now = Utc::now();
        let now_secs = now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0;
        let reset_at = now.timestamp() + WINDOW_SECS as i64;

        match self.count_in_window(user_id, operation, now_secs) {
            Ok(count) => {
                if count <= u64::from(limit) {
                    Ok(RateLimitDecision {
                        allowed: true,
                        status: 200,
                        limit,
                        remaining: limit.saturating_sub(count as u32),
                        reset_at,
                        retry_after_secs: None,
                    })
                } else {
                    tracing::debug!(user_id, operation = operation.as_str(), "Rate limit exceeded");
                    Ok(RateLimitDecision {
                        allowed: false,
                        status: 429,
                        limit,
                        remaining: 0,
                        reset_at,
                        retry_after_secs: Some(WINDOW_SECS.max(1)),
                    })
                }
            }
            Err(e) if self.fail_closed => {
                tracing::warn!(error = %e, "Rate-limit backing store unreachable; failing closed");
                Ok(RateLimitDecision {
                    allowed: false,
                    status: 503,
                    limit,
                    remaining: 0,
                    reset_at,
                    retry_after_secs: Some(FAIL_CLOSED_RETRY_SECS),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rate-limit backing store unreachable; failing open");
                Ok(RateLimitDecision {
                    allowed: true,
                    status: 200,
                    limit,
                    remaining: limit,
                    reset_at,
                    retry_after_secs: None,
                })
            }
        }
    }

    /// Record this request and return the window population including it
    fn count_in_window(&self, user_id: &str, operation: Operation, now_secs: f64) -> Result<u64> {
        let key = format!("ratelimit:{user_id}:{}", operation.as_str());
        let member = format!("{now_secs}-{}", Uuid::new_v4());

        self.cache.zadd(&key, &member, now_secs)?;
        self.cache
            .zremrangebyscore(&key, now_secs - WINDOW_SECS as f64)?;
        let count = self.cache.zcard(&key)?;
        self.cache
            .expire(&key, Duration::from_secs(2 * WINDOW_SECS))?;
        Ok(count)
    }
}

// ============================================================================
// TESTS
// ============================================================================
