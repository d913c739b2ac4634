// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory ledger store.
//!
//! Backs tests and secret-less development. A single mutex guards the
//! inner maps: idempotency keys are unique system-wide, so the duplicate
//! check cannot be covered by a per-user lock, and every operation here is
//! a short lock-only computation.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::{
    AppendOutcome, LedgerEntry, LedgerError, LedgerPage, LedgerResult, LedgerStore, NewEntry,
};

#[derive(Default)]
struct Inner {
    next_id: u64,
    /// All entries in append order; ids are indices + 1.
    entries: Vec<LedgerEntry>,
    /// user_id -> entry ids in append order.
    by_user: HashMap<String, Vec<u64>>,
    /// idempotency key -> entry id.
    idempotency: HashMap<String, u64>,
    /// Materialized balances.
    balances: HashMap<String, i64>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Recompute a balance from the raw entries (test/consistency hook).
    pub fn fold_balance(&self, user_id: &str) -> i64 {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.delta)
            .sum()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(&self, new_entry: NewEntry) -> LedgerResult<AppendOutcome> {
        let mut inner = self.lock();

        if let Some(key) = &new_entry.idempotency_key {
            if let Some(&existing_id) = inner.idempotency.get(key) {
                let entry = inner
                    .entries
                    .get((existing_id - 1) as usize)
                    .cloned()
                    .ok_or_else(|| {
                        LedgerError::Corrupt(format!(
                            "idempotency key {key} points at missing entry {existing_id}"
                        ))
                    })?;
                let balance = *inner.balances.get(&entry.user_id).unwrap_or(&0);
                return Ok(AppendOutcome {
                    entry,
                    balance,
                    was_duplicate: true,
                });
            }
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let entry = LedgerEntry {
            id,
            user_id: new_entry.user_id,
            delta: new_entry.delta,
            reason: new_entry.reason,
            source: new_entry.source,
            idempotency_key: new_entry.idempotency_key,
            created_at: Utc::now(),
        };

        if let Some(key) = &entry.idempotency_key {
            inner.idempotency.insert(key.clone(), id);
        }
        inner
            .by_user
            .entry(entry.user_id.clone())
            .or_default()
            .push(id);
        let balance = inner
            .balances
            .entry(entry.user_id.clone())
            .and_modify(|b| *b += entry.delta)
            .or_insert(entry.delta);
        let balance = *balance;
        inner.entries.push(entry.clone());

        Ok(AppendOutcome {
            entry,
            balance,
            was_duplicate: false,
        })
    }

    fn balance_of(&self, user_id: &str) -> LedgerResult<i64> {
        Ok(*self.lock().balances.get(user_id).unwrap_or(&0))
    }

    fn entries_for(
        &self,
        user_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> LedgerResult<LedgerPage> {
        let before: u64 = match cursor {
            Some(raw) => raw.parse().map_err(|_| LedgerError::InvalidCursor)?,
            None => u64::MAX,
        };

        let inner = self.lock();
        let ids = inner.by_user.get(user_id).cloned().unwrap_or_default();

        let mut entries = Vec::with_capacity(limit);
        for &id in ids.iter().rev() {
            if id >= before {
                continue;
            }
            let entry = inner
                .entries
                .get((id - 1) as usize)
                .cloned()
                .ok_or_else(|| LedgerError::Corrupt(format!("missing entry {id}")))?;
            entries.push(entry);
            if entries.len() == limit {
                break;
            }
        }

        let next_cursor = match entries.last() {
            Some(last) if entries.len() == limit => {
                let more = ids.iter().any(|&id| id < last.id);
                more.then(|| last.id.to_string())
            }
            _ => None,
        };

        Ok(LedgerPage {
            entries,
            next_cursor,
        })
    }
}
