// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable ledger store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `ledger_entries`: entry id → serialized LedgerEntry (JSON bytes)
//! - `user_entry_index`: composite key (len_u8 | user_id | !id_be) → entry id
//! - `idempotency_keys`: key → entry id
//! - `balances`: user_id → materialized balance
//! - `ledger_meta`: sequence counter
//!
//! The index key starts with the user id's length byte, so one user's keys
//! can never be a prefix of another's and ids remain fully opaque bytes.
//! The inverted entry id makes a forward range scan yield newest-first
//! ordering. The whole append (duplicate check, entry insert, index
//! insert, balance update, sequence bump) commits as one write
//! transaction; redb's single-writer model gives the required atomicity.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use lru::LruCache;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{
    AppendOutcome, LedgerEntry, LedgerError, LedgerPage, LedgerResult, LedgerStore, NewEntry,
};

/// Primary table: entry id → serialized LedgerEntry (JSON bytes).
const ENTRIES: TableDefinition<u64, &[u8]> = TableDefinition::new("ledger_entries");

/// Index: composite key (user_id|!id_be) → entry id.
const USER_ENTRY_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("user_entry_index");

/// Dedup table: idempotency key → entry id.
const IDEMPOTENCY: TableDefinition<&str, u64> = TableDefinition::new("idempotency_keys");

/// Materialized balances: user_id → balance in minor units.
const BALANCES: TableDefinition<&str, i64> = TableDefinition::new("balances");

/// Store metadata: "last_id" → last issued entry id.
const META: TableDefinition<&str, u64> = TableDefinition::new("ledger_meta");

const LAST_ID_KEY: &str = "last_id";

/// Balance read cache size.
const BALANCE_CACHE_SIZE: usize = 1024;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key for the user_entry_index table.
///
/// Format: `len_u8 | user_id_bytes | !id_be_bytes`. The leading length
/// byte keeps user ids opaque: no byte inside an id can make one user's
/// prefix collide with another's. The inverted id ensures newest-first
/// ordering when scanning forward. The facade caps ids at
/// [`super::MAX_USER_ID_BYTES`], so the length always fits one byte.
fn make_index_key(user_id: &str, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + user_id.len() + 8);
    key.push(user_id.len() as u8);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&(!id).to_be_bytes());
    key
}

/// Prefix for range scanning all entries of a user.
fn make_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(1 + user_id.len());
    prefix.push(user_id.len() as u8);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix
}

/// Upper bound for a range scan (prefix with 0xFF bytes appended).
fn make_prefix_end(user_id: &str) -> Vec<u8> {
    let mut end = make_prefix(user_id);
    end.extend_from_slice(&[0xFF; 9]);
    end
}

fn encode_cursor(key: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(key)
}

fn decode_cursor(cursor: &str) -> LedgerResult<Vec<u8>> {
    Base64UrlUnpadded::decode_vec(cursor).map_err(|_| LedgerError::InvalidCursor)
}

// =============================================================================
// RedbLedgerStore
// =============================================================================

/// Durable, ACID ledger store.
pub struct RedbLedgerStore {
    db: std::sync::Arc<Database>,
    balance_cache: Mutex<LruCache<String, i64>>,
}

impl RedbLedgerStore {
    /// Open (or create) a standalone database at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;
        Self::new(std::sync::Arc::new(db))
    }

    /// Wrap an already open database, pre-creating all tables so later
    /// read transactions don't fail.
    pub fn new(db: std::sync::Arc<Database>) -> LedgerResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTRIES)?;
            let _ = write_txn.open_table(USER_ENTRY_INDEX)?;
            let _ = write_txn.open_table(IDEMPOTENCY)?;
            let _ = write_txn.open_table(BALANCES)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        let cache_size = NonZeroUsize::new(BALANCE_CACHE_SIZE)
            .ok_or_else(|| LedgerError::Corrupt("zero cache size".into()))?;
        Ok(Self {
            db,
            balance_cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    fn cache_put(&self, user_id: &str, balance: i64) {
        let mut cache = self
            .balance_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.put(user_id.to_string(), balance);
    }

    fn cache_get(&self, user_id: &str) -> Option<i64> {
        let mut cache = self
            .balance_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.get(user_id).copied()
    }

    /// Recompute a balance as the fold over all stored entries for the
    /// user, bypassing the materialized value (consistency checks).
    pub fn fold_balance(&self, user_id: &str) -> LedgerResult<i64> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(USER_ENTRY_INDEX)?;
        let entry_table = read_txn.open_table(ENTRIES)?;

        let prefix = make_prefix(user_id);
        let end = make_prefix_end(user_id);
        let mut total = 0i64;
        for item in idx_table.range(prefix.as_slice()..end.as_slice())? {
            let (_, id) = item?;
            let entry = load_entry(&entry_table, id.value())?;
            total += entry.delta;
        }
        Ok(total)
    }
}

fn load_entry(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> LedgerResult<LedgerEntry> {
    let value = table
        .get(id)?
        .ok_or_else(|| LedgerError::Corrupt(format!("index points at missing entry {id}")))?;
    Ok(serde_json::from_slice(value.value())?)
}

impl LedgerStore for RedbLedgerStore {
    fn append(&self, new_entry: NewEntry) -> LedgerResult<AppendOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut entry_table = write_txn.open_table(ENTRIES)?;
            let mut idx_table = write_txn.open_table(USER_ENTRY_INDEX)?;
            let mut idem_table = write_txn.open_table(IDEMPOTENCY)?;
            let mut balance_table = write_txn.open_table(BALANCES)?;
            let mut meta_table = write_txn.open_table(META)?;

            // Duplicate check first: an existing key means the event was
            // already applied and this append is a no-op.
            let existing_id = match &new_entry.idempotency_key {
                Some(key) => idem_table.get(key.as_str())?.map(|v| v.value()),
                None => None,
            };
            if let Some(id) = existing_id {
                let entry = load_entry(&entry_table, id)?;
                let balance = balance_table
                    .get(entry.user_id.as_str())?
                    .map(|v| v.value())
                    .unwrap_or(0);
                AppendOutcome {
                    entry,
                    balance,
                    was_duplicate: true,
                }
            } else {
                let id = meta_table
                    .get(LAST_ID_KEY)?
                    .map(|v| v.value())
                    .unwrap_or(0)
                    + 1;

                let entry = LedgerEntry {
                    id,
                    user_id: new_entry.user_id,
                    delta: new_entry.delta,
                    reason: new_entry.reason,
                    source: new_entry.source,
                    idempotency_key: new_entry.idempotency_key,
                    created_at: Utc::now(),
                };

                let json = serde_json::to_vec(&entry)?;
                entry_table.insert(id, json.as_slice())?;
                let index_key = make_index_key(&entry.user_id, id);
                idx_table.insert(index_key.as_slice(), id)?;
                if let Some(key) = &entry.idempotency_key {
                    idem_table.insert(key.as_str(), id)?;
                }

                let balance = balance_table
                    .get(entry.user_id.as_str())?
                    .map(|v| v.value())
                    .unwrap_or(0)
                    + entry.delta;
                balance_table.insert(entry.user_id.as_str(), balance)?;
                meta_table.insert(LAST_ID_KEY, id)?;

                AppendOutcome {
                    entry,
                    balance,
                    was_duplicate: false,
                }
            }
        };
        write_txn.commit()?;

        self.cache_put(&outcome.entry.user_id, outcome.balance);
        Ok(outcome)
    }

    fn balance_of(&self, user_id: &str) -> LedgerResult<i64> {
        if let Some(balance) = self.cache_get(user_id) {
            return Ok(balance);
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BALANCES)?;
        let balance = table.get(user_id)?.map(|v| v.value()).unwrap_or(0);
        self.cache_put(user_id, balance);
        Ok(balance)
    }

    fn entries_for(
        &self,
        user_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> LedgerResult<LedgerPage> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(USER_ENTRY_INDEX)?;
        let entry_table = read_txn.open_table(ENTRIES)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);

        // Resume strictly after the cursor key by appending a zero byte.
        let start: Vec<u8> = match cursor {
            Some(raw) => {
                let mut key = decode_cursor(raw)?;
                if !key.starts_with(&prefix) {
                    return Err(LedgerError::InvalidCursor);
                }
                key.push(0x00);
                key
            }
            None => prefix.clone(),
        };

        // Fetch limit+1 to know whether a further page exists.
        let mut entries = Vec::with_capacity(limit + 1);
        for item in idx_table.range(start.as_slice()..prefix_end.as_slice())? {
            let (_, id) = item?;
            entries.push(load_entry(&entry_table, id.value())?);
            if entries.len() > limit {
                break;
            }
        }

        let next_cursor = if entries.len() > limit {
            entries.pop();
            entries
                .last()
                .map(|last| encode_cursor(&make_index_key(user_id, last.id)))
        } else {
            None
        };

        Ok(LedgerPage {
            entries,
            next_cursor,
        })
    }
}
