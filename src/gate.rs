// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Access Gate
//!
//! Single admission decision for inbound requests, composing the key
//! registry and the rate limiter. The two checks are deliberately layered,
//! not redundant: the registry enforces the coarse per-key business quota,
//! the limiter enforces burst/IP abuse protection.
//!
//! Decision flow:
//! - No API key: anonymous traffic, IP-scoped rate limit only.
//! - Unknown key: denied immediately; no rate limit quota is consumed for
//!   bad credentials.
//! - Known key over its window quota: denied; again no limiter quota spent.
//! - Valid key: user-scoped and IP-scoped limits both run; the most
//!   restrictive result wins and the minimum remaining quota is reported.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::keys::{KeyError, KeyRegistry, KeyValidation};
use crate::ratelimit::{Decision, DenyReason, LimiterKind, RateLimiter};

/// Identity of an inbound request, built once at the HTTP boundary.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    /// Raw API key, if the caller presented one.
    pub api_key: Option<String>,
    /// Source address of the request.
    pub source_ip: IpAddr,
}

impl RequestIdentity {
    pub fn anonymous(source_ip: IpAddr) -> Self {
        Self {
            api_key: None,
            source_ip,
        }
    }

    pub fn with_key(api_key: impl Into<String>, source_ip: IpAddr) -> Self {
        Self {
            api_key: Some(api_key.into()),
            source_ip,
        }
    }
}

/// Why a request was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Missing from the registry; maps to 401.
    InvalidKey,
    /// The key's own window quota is spent; maps to 429.
    QuotaExceeded,
    /// Primary rate limit window exceeded; maps to 429.
    RateLimitExceeded,
    /// Burst window exceeded; maps to 429.
    BurstExceeded,
    /// A previously escalated block is live; maps to 429.
    Blocked,
}

impl From<DenyReason> for DenialReason {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Blocked => DenialReason::Blocked,
            DenyReason::BurstExceeded => DenialReason::BurstExceeded,
            DenyReason::RateLimitExceeded => DenialReason::RateLimitExceeded,
        }
    }
}

/// Admission decision plus quota metadata for response headers.
#[derive(Debug, Clone)]
pub struct AdmitDecision {
    pub allowed: bool,
    /// Resolved principal for authenticated requests.
    pub owner_id: Option<String>,
    /// Minimum remaining quota across all checks that ran.
    pub remaining: u32,
    /// When the binding constraint clears.
    pub reset_at: Option<DateTime<Utc>>,
    pub denial: Option<DenialReason>,
}

impl AdmitDecision {
    fn allowed(owner_id: Option<String>, remaining: u32, reset_at: Option<DateTime<Utc>>) -> Self {
        Self {
            allowed: true,
            owner_id,
            remaining,
            reset_at,
            denial: None,
        }
    }

    fn denied(
        reason: DenialReason,
        remaining: u32,
        reset_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            allowed: false,
            owner_id: None,
            remaining,
            reset_at,
            denial: Some(reason),
        }
    }
}

/// Composes [`KeyRegistry`] and [`RateLimiter`] into one admission check.
pub struct AccessGate {
    registry: Arc<KeyRegistry>,
    limiter: Arc<RateLimiter>,
}

impl AccessGate {
    pub fn new(registry: Arc<KeyRegistry>, limiter: Arc<RateLimiter>) -> Self {
        Self { registry, limiter }
    }

    /// Decide admission for `identity`.
    pub fn admit(&self, identity: &RequestIdentity) -> Result<AdmitDecision, KeyError> {
        self.admit_at(identity, Utc::now())
    }

    /// [`AccessGate::admit`] with an injected clock.
    pub fn admit_at(
        &self,
        identity: &RequestIdentity,
        now: DateTime<Utc>,
    ) -> Result<AdmitDecision, KeyError> {
        let ip = identity.source_ip.to_string();

        let Some(raw_key) = identity.api_key.as_deref() else {
            let ip_decision = self.limiter.check_at(&ip, LimiterKind::Ip, now);
            return Ok(from_single(None, ip_decision));
        };

        match self.registry.validate_at(raw_key, now)? {
            KeyValidation::UnknownKey => {
                Ok(AdmitDecision::denied(DenialReason::InvalidKey, 0, None))
            }
            KeyValidation::QuotaExceeded { reset_at } => Ok(AdmitDecision::denied(
                DenialReason::QuotaExceeded,
                0,
                Some(reset_at),
            )),
            KeyValidation::Valid {
                owner_id,
                remaining: key_remaining,
                reset_at: key_reset_at,
            } => {
                let user_decision = self.limiter.check_at(&owner_id, LimiterKind::User, now);
                let ip_decision = self.limiter.check_at(&ip, LimiterKind::Ip, now);

                // Most restrictive wins. When both limiter checks deny, the
                // user-scoped reason is the more specific one to report.
                let failing = match (user_decision.allowed, ip_decision.allowed) {
                    (false, _) => Some(user_decision),
                    (true, false) => Some(ip_decision),
                    (true, true) => None,
                };

                if let Some(denied) = failing {
                    let reason = denied
                        .reason
                        .map(DenialReason::from)
                        .unwrap_or(DenialReason::RateLimitExceeded);
                    return Ok(AdmitDecision::denied(
                        reason,
                        denied.remaining.min(key_remaining),
                        Some(denied.reset_at),
                    ));
                }

                let (remaining, reset_at) = min_remaining(&[
                    (key_remaining, key_reset_at),
                    (user_decision.remaining, user_decision.reset_at),
                    (ip_decision.remaining, ip_decision.reset_at),
                ]);
                Ok(AdmitDecision::allowed(
                    Some(owner_id),
                    remaining,
                    Some(reset_at),
                ))
            }
        }
    }
}

fn from_single(owner_id: Option<String>, decision: Decision) -> AdmitDecision {
    if decision.allowed {
        AdmitDecision::allowed(owner_id, decision.remaining, Some(decision.reset_at))
    } else {
        let reason = decision
            .reason
            .map(DenialReason::from)
            .unwrap_or(DenialReason::RateLimitExceeded);
        AdmitDecision::denied(reason, decision.remaining, Some(decision.reset_at))
    }
}

/// Pick the minimum remaining quota and the reset time that goes with it.
fn min_remaining(checks: &[(u32, DateTime<Utc>)]) -> (u32, DateTime<Utc>) {
    let mut best = checks[0];
    for &candidate in &checks[1..] {
        if candidate.0 < best.0 {
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::InMemoryKeyStore;
    use crate::ratelimit::{BurstPolicy, RateLimitPolicy};
    use chrono::Duration;

    fn ip() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    fn gate() -> (AccessGate, Arc<KeyRegistry>) {
        let registry = Arc::new(KeyRegistry::new(
            Arc::new(InMemoryKeyStore::new()),
            "test-secret",
        ));
        let limiter = Arc::new(RateLimiter::new());
        (AccessGate::new(Arc::clone(&registry), limiter), registry)
    }

    #[test]
    fn anonymous_requests_are_ip_gated_only() {
        let (gate, _) = gate();
        let now = Utc::now();
        let identity = RequestIdentity::anonymous(ip());

        let decision = gate.admit_at(&identity, now).unwrap();
        assert!(decision.allowed);
        assert!(decision.owner_id.is_none());
        assert_eq!(decision.remaining, 49);
    }

    #[test]
    fn invalid_key_denies_without_consuming_limiter_quota() {
        let (gate, _) = gate();
        let now = Utc::now();

        let bad = RequestIdentity::with_key("cg_bogus", ip());
        let decision = gate.admit_at(&bad, now).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.denial, Some(DenialReason::InvalidKey));

        // The failed attempt must not have touched the IP window.
        let anon = RequestIdentity::anonymous(ip());
        let decision = gate.admit_at(&anon, now).unwrap();
        assert_eq!(decision.remaining, 49);
    }

    #[test]
    fn valid_key_runs_user_and_ip_checks() {
        let (gate, registry) = gate();
        let now = Utc::now();
        let key = registry.issue("owner-1", 500).unwrap().key;

        let identity = RequestIdentity::with_key(key, ip());
        let decision = gate.admit_at(&identity, now).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.owner_id.as_deref(), Some("owner-1"));
        // IP policy (50/window) is the tightest of key=500, user=100, ip=50.
        assert_eq!(decision.remaining, 49);
    }

    #[test]
    fn key_quota_denial_reports_quota_exceeded() {
        let (gate, registry) = gate();
        let now = Utc::now();
        let key = registry.issue("owner-1", 2).unwrap().key;
        let identity = RequestIdentity::with_key(key, ip());

        assert!(gate.admit_at(&identity, now).unwrap().allowed);
        assert!(gate.admit_at(&identity, now).unwrap().allowed);

        let third = gate.admit_at(&identity, now).unwrap();
        assert!(!third.allowed);
        assert_eq!(third.denial, Some(DenialReason::QuotaExceeded));
        assert_eq!(third.remaining, 0);
        assert!(third.reset_at.is_some());
    }

    #[test]
    fn ip_denial_wins_over_roomy_user_quota() {
        let registry = Arc::new(KeyRegistry::new(
            Arc::new(InMemoryKeyStore::new()),
            "test-secret",
        ));
        // Tiny IP window, generous user policy without burst.
        let limiter = Arc::new(RateLimiter::with_policies(
            RateLimitPolicy {
                window: Duration::minutes(15),
                max_requests: 2,
                block_duration: Duration::hours(1),
                burst: None,
            },
            RateLimitPolicy::user_default(),
        ));
        let gate = AccessGate::new(Arc::clone(&registry), limiter);

        let now = Utc::now();
        let key = registry.issue("owner-1", 500).unwrap().key;
        let identity = RequestIdentity::with_key(key, ip());

        assert!(gate.admit_at(&identity, now).unwrap().allowed);
        assert!(gate.admit_at(&identity, now).unwrap().allowed);

        let denied = gate.admit_at(&identity, now).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.denial, Some(DenialReason::RateLimitExceeded));
    }

    #[test]
    fn burst_denial_propagates_specific_reason() {
        let registry = Arc::new(KeyRegistry::new(
            Arc::new(InMemoryKeyStore::new()),
            "test-secret",
        ));
        let limiter = Arc::new(RateLimiter::with_policies(
            RateLimitPolicy::ip_default(),
            RateLimitPolicy {
                window: Duration::hours(1),
                max_requests: 100,
                block_duration: Duration::hours(2),
                burst: Some(BurstPolicy {
                    window: Duration::minutes(1),
                    max_requests: 3,
                }),
            },
        ));
        let gate = AccessGate::new(Arc::clone(&registry), limiter);

        let now = Utc::now();
        let key = registry.issue("owner-1", 500).unwrap().key;
        let identity = RequestIdentity::with_key(key, ip());

        for _ in 0..3 {
            assert!(gate.admit_at(&identity, now).unwrap().allowed);
        }
        let denied = gate.admit_at(&identity, now).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.denial, Some(DenialReason::BurstExceeded));
    }

    #[test]
    fn end_to_end_two_per_hour_key() {
        let registry = Arc::new(
            KeyRegistry::new(Arc::new(InMemoryKeyStore::new()), "test-secret")
                .with_window(Duration::hours(1)),
        );
        let limiter = Arc::new(RateLimiter::new());
        let gate = AccessGate::new(Arc::clone(&registry), limiter);

        let now = Utc::now();
        let key = registry.issue("u1", 2).unwrap().key;
        let identity = RequestIdentity::with_key(key, ip());

        let first = gate.admit_at(&identity, now).unwrap();
        assert!(first.allowed);
        let second = gate.admit_at(&identity, now + Duration::minutes(1)).unwrap();
        assert!(second.allowed);

        let third = gate.admit_at(&identity, now + Duration::minutes(2)).unwrap();
        assert!(!third.allowed);
        assert_eq!(third.denial, Some(DenialReason::QuotaExceeded));
        assert_eq!(third.remaining, 0);
    }
}
