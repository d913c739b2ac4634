// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Rate Limiter
//!
//! Fixed-window rate limiting with explicit block escalation, keyed by an
//! arbitrary identity string. Two preconfigured policies cover the two
//! tiers the gate uses: an IP policy for anonymous/abuse protection and a
//! user policy with an additional short burst window.
//!
//! A token bucket was deliberately not used: the two-tier IP/user quota
//! model only needs per-window counters, and fixed windows keep the
//! blocking semantics ("exceed the window, sit out the block duration")
//! easy to reason about.

pub mod store;
pub mod sweeper;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

pub use store::{RateLimitRecord, RateLimitStore};
pub use sweeper::Sweeper;

/// Which preconfigured policy a check runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterKind {
    /// Source-address scoped (anonymous and authenticated traffic alike).
    Ip,
    /// Principal scoped; carries the secondary burst window.
    User,
}

impl LimiterKind {
    fn prefix(self) -> &'static str {
        match self {
            LimiterKind::Ip => "ip",
            LimiterKind::User => "user",
        }
    }
}

/// Secondary short-window cap layered on the primary window.
#[derive(Debug, Clone, Copy)]
pub struct BurstPolicy {
    pub window: Duration,
    pub max_requests: u32,
}

/// A fixed-window policy with block escalation.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    /// Length of the primary counting window.
    pub window: Duration,
    /// Requests allowed per primary window.
    pub max_requests: u32,
    /// How long an identity stays blocked after exceeding the window.
    pub block_duration: Duration,
    /// Burst cap; only set for user-scoped policies.
    pub burst: Option<BurstPolicy>,
}

impl RateLimitPolicy {
    /// IP policy: 50 requests / 15 minutes, 1 hour block.
    pub fn ip_default() -> Self {
        Self {
            window: Duration::minutes(15),
            max_requests: 50,
            block_duration: Duration::hours(1),
            burst: None,
        }
    }

    /// User policy: 100 requests / hour, 2 hour block, 10 req/min burst cap.
    pub fn user_default() -> Self {
        Self {
            window: Duration::hours(1),
            max_requests: 100,
            block_duration: Duration::hours(2),
            burst: Some(BurstPolicy {
                window: Duration::minutes(1),
                max_requests: 10,
            }),
        }
    }
}

/// Why a check denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// A previously escalated block is still live.
    Blocked,
    /// The burst window cap was hit (primary count untouched).
    BurstExceeded,
    /// The primary window cap was hit; a block was escalated.
    RateLimitExceeded,
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests left in the primary window.
    pub remaining: u32,
    /// When the relevant constraint clears: window rollover on allow,
    /// block/burst expiry on the corresponding denial.
    pub reset_at: DateTime<Utc>,
    pub reason: Option<DenyReason>,
}

impl Decision {
    fn allow(remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            reason: None,
        }
    }

    fn deny(reason: DenyReason, remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining,
            reset_at,
            reason: Some(reason),
        }
    }
}

/// Fixed-window rate limiter over a [`RateLimitStore`].
pub struct RateLimiter {
    store: RateLimitStore,
    ip_policy: RateLimitPolicy,
    user_policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_policies(RateLimitPolicy::ip_default(), RateLimitPolicy::user_default())
    }

    pub fn with_policies(ip_policy: RateLimitPolicy, user_policy: RateLimitPolicy) -> Self {
        Self {
            store: RateLimitStore::new(),
            ip_policy,
            user_policy,
        }
    }

    pub fn store(&self) -> &RateLimitStore {
        &self.store
    }

    fn policy(&self, kind: LimiterKind) -> RateLimitPolicy {
        match kind {
            LimiterKind::Ip => self.ip_policy,
            LimiterKind::User => self.user_policy,
        }
    }

    /// Check and count a request for `identity` under the `kind` policy.
    pub fn check(&self, identity: &str, kind: LimiterKind) -> Decision {
        self.check_at(identity, kind, Utc::now())
    }

    /// [`RateLimiter::check`] with an injected clock.
    pub fn check_at(&self, identity: &str, kind: LimiterKind, now: DateTime<Utc>) -> Decision {
        let policy = self.policy(kind);
        let key = format!("{}:{}", kind.prefix(), identity);

        let decision = self.store.with_record(&key, |slot| {
            // A live block dominates everything, including window rollover.
            if let Some(record) = slot.as_ref() {
                if let Some(blocked_until) = record.blocked_until {
                    if now < blocked_until {
                        return Decision::deny(DenyReason::Blocked, 0, blocked_until);
                    }
                }
            }

            let window_expired = slot
                .as_ref()
                .map(|record| now > record.window_reset_at)
                .unwrap_or(true);

            if window_expired {
                let burst_window = policy
                    .burst
                    .map(|b| b.window)
                    .unwrap_or_else(Duration::zero);
                *slot = Some(RateLimitRecord {
                    count: 1,
                    window_reset_at: now + policy.window,
                    blocked_until: None,
                    burst_count: 1,
                    burst_reset_at: now + burst_window,
                });
                return Decision::allow(policy.max_requests - 1, now + policy.window);
            }

            // Not expired and not None, or the branch above would have reset it.
            let Some(record) = slot.as_mut() else {
                return Decision::allow(policy.max_requests - 1, now + policy.window);
            };
            record.blocked_until = None;

            if let Some(burst) = policy.burst {
                if now > record.burst_reset_at {
                    record.burst_count = 0;
                    record.burst_reset_at = now + burst.window;
                }
                if record.burst_count >= burst.max_requests {
                    // Denied before touching the primary counter.
                    return Decision::deny(
                        DenyReason::BurstExceeded,
                        policy.max_requests.saturating_sub(record.count),
                        record.burst_reset_at,
                    );
                }
                record.burst_count += 1;
            }

            if record.count >= policy.max_requests {
                let blocked_until = now + policy.block_duration;
                record.blocked_until = Some(blocked_until);
                return Decision::deny(DenyReason::RateLimitExceeded, 0, blocked_until);
            }

            record.count += 1;
            Decision::allow(
                policy.max_requests - record.count,
                record.window_reset_at,
            )
        });

        if !decision.allowed {
            tracing::debug!(
                identity = %key,
                reason = ?decision.reason,
                reset_at = %decision.reset_at,
                "rate limit denial"
            );
        }
        decision
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limiter() -> RateLimiter {
        RateLimiter::with_policies(
            RateLimitPolicy {
                window: Duration::minutes(15),
                max_requests: 3,
                block_duration: Duration::hours(1),
                burst: None,
            },
            RateLimitPolicy {
                window: Duration::hours(1),
                max_requests: 100,
                block_duration: Duration::hours(2),
                burst: Some(BurstPolicy {
                    window: Duration::minutes(1),
                    max_requests: 10,
                }),
            },
        )
    }

    #[test]
    fn first_observation_allows_and_counts() {
        let limiter = small_limiter();
        let now = Utc::now();
        let decision = limiter.check_at("1.2.3.4", LimiterKind::Ip, now);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.reset_at, now + Duration::minutes(15));
    }

    #[test]
    fn exceeding_the_window_escalates_to_a_block() {
        let limiter = small_limiter();
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.check_at("1.2.3.4", LimiterKind::Ip, now).allowed);
        }
        let denied = limiter.check_at("1.2.3.4", LimiterKind::Ip, now);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(DenyReason::RateLimitExceeded));
        assert_eq!(denied.reset_at, now + Duration::hours(1));
    }

    #[test]
    fn block_persists_across_window_rollover() {
        let limiter = small_limiter();
        let now = Utc::now();

        for _ in 0..4 {
            limiter.check_at("1.2.3.4", LimiterKind::Ip, now);
        }

        // Past the 15-minute window but inside the 1-hour block.
        let after_window = now + Duration::minutes(20);
        let decision = limiter.check_at("1.2.3.4", LimiterKind::Ip, after_window);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::Blocked));
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, now + Duration::hours(1));
    }

    #[test]
    fn expired_block_allows_again() {
        let limiter = small_limiter();
        let now = Utc::now();

        for _ in 0..4 {
            limiter.check_at("1.2.3.4", LimiterKind::Ip, now);
        }

        let after_block = now + Duration::hours(1) + Duration::seconds(1);
        let decision = limiter.check_at("1.2.3.4", LimiterKind::Ip, after_block);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn burst_cap_denies_without_consuming_primary_count() {
        let limiter = small_limiter();
        let now = Utc::now();

        // 10 rapid requests fill the burst window; the hourly count is far
        // from its max of 100.
        for i in 0..10 {
            let decision =
                limiter.check_at("u1", LimiterKind::User, now + Duration::seconds(i));
            assert!(decision.allowed, "request {i} should pass");
        }

        let eleventh = limiter.check_at("u1", LimiterKind::User, now + Duration::seconds(10));
        assert!(!eleventh.allowed);
        assert_eq!(eleventh.reason, Some(DenyReason::BurstExceeded));
        // Ten allowed requests consumed the primary window; the denial
        // consumed nothing.
        assert_eq!(eleventh.remaining, 90);

        // Once the burst window passes, the primary count picks up at 11.
        let after_burst = now + Duration::seconds(61);
        let decision = limiter.check_at("u1", LimiterKind::User, after_burst);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 89);
    }

    #[test]
    fn window_rollover_grants_a_fresh_quota() {
        let limiter = small_limiter();
        let now = Utc::now();

        for _ in 0..3 {
            limiter.check_at("1.2.3.4", LimiterKind::Ip, now);
        }
        // Never exceeded, so no block; next window starts clean.
        let next_window = now + Duration::minutes(16);
        let decision = limiter.check_at("1.2.3.4", LimiterKind::Ip, next_window);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn identities_are_independent() {
        let limiter = small_limiter();
        let now = Utc::now();

        for _ in 0..4 {
            limiter.check_at("1.2.3.4", LimiterKind::Ip, now);
        }
        assert!(limiter.check_at("9.9.9.9", LimiterKind::Ip, now).allowed);
        // Same identity string under a different kind is a different key.
        assert!(limiter.check_at("1.2.3.4", LimiterKind::User, now).allowed);
    }
}
