// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory rate limit record storage.

use chrono::{DateTime, Utc};

use crate::shards::ShardedMap;

/// Window state for a single limited identity.
///
/// At most one active window exists per key. `blocked_until`, when set and
/// in the future, dominates window counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Requests counted in the current primary window.
    pub count: u32,
    /// When the primary window rolls over.
    pub window_reset_at: DateTime<Utc>,
    /// Escalated block; denies everything until it passes.
    pub blocked_until: Option<DateTime<Utc>>,
    /// Requests counted in the current burst window (user-scoped only).
    pub burst_count: u32,
    /// When the burst window rolls over.
    pub burst_reset_at: DateTime<Utc>,
}

/// Sharded in-memory store of [`RateLimitRecord`]s.
///
/// Records are created lazily on first observation and swept once their
/// window has passed and no block is live. Rate limit state is ephemeral
/// by design; it does not survive a restart and there is no durable
/// backend for it.
#[derive(Default)]
pub struct RateLimitStore {
    records: ShardedMap<RateLimitRecord>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the record for `key`.
    pub fn with_record<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Option<RateLimitRecord>) -> R,
    ) -> R {
        self.records.with_entry(key, f)
    }

    /// Drop records whose window has passed and whose block (if any) has
    /// expired. Holding the same shard locks as `with_record`, so a sweep
    /// cannot race an in-flight check.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            let block_live = record
                .blocked_until
                .map(|until| now < until)
                .unwrap_or(false);
            block_live || now <= record.window_reset_at
        });
        before - self.records.len()
    }

    /// Number of tracked identities (for health/metrics reporting).
    pub fn tracked(&self) -> usize {
        self.records.len()
    }
}
