// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Credit Ledger
//!
//! Append-only record of balance-changing events. A user's balance is by
//! definition the sum of their entry deltas; stores keep a materialized
//! balance alongside the entries purely for read performance, and the two
//! must always reconcile.
//!
//! Entries carrying an idempotency key are written at most once
//! system-wide: appending a key that already exists returns the original
//! entry as a successful no-op, which is what lets webhook retries be
//! acknowledged without double-crediting.
//!
//! Entries are immutable once written. Corrections are new offsetting
//! entries, never edits.

pub mod memory;
pub mod redb_store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use memory::InMemoryLedgerStore;
pub use redb_store::RedbLedgerStore;

/// Maximum byte length of a user id. User ids are otherwise opaque; the
/// cap keeps the durable store's length-prefixed index keys to a single
/// length byte.
pub const MAX_USER_ID_BYTES: usize = 255;

/// Where a ledger entry originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// A verified payment provider event.
    Webhook,
    /// A manual admin adjustment.
    Admin,
    /// Internal usage (e.g. a generation debit).
    System,
}

/// An immutable balance-changing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    /// Store-issued sequence number; strictly increasing in append order.
    pub id: u64,
    /// Principal whose balance this entry changes.
    pub user_id: String,
    /// Signed credit delta in minor units.
    pub delta: i64,
    /// Human-readable reason, e.g. `payment:lemonsqueezy`.
    pub reason: String,
    /// Origin of the entry.
    pub source: EntrySource,
    /// Globally unique dedup token; required for webhook entries.
    pub idempotency_key: Option<String>,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

/// Input to [`LedgerStore::append`]; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: String,
    pub delta: i64,
    pub reason: String,
    pub source: EntrySource,
    pub idempotency_key: Option<String>,
}

/// Result of an append: the (new or pre-existing) entry and the balance
/// after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub entry: LedgerEntry,
    pub balance: i64,
    /// True when the idempotency key was already present and nothing was
    /// written. A duplicate is a successful no-op, not an error.
    pub was_duplicate: bool,
}

/// One page of a user's entries, newest first.
#[derive(Debug, Clone)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    /// Opaque cursor for the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("corrupt ledger state: {0}")]
    Corrupt(String),

    #[error("redb error: {0}")]
    Redb(#[from] ::redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] ::redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] ::redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] ::redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] ::redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] ::redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LedgerError {
    /// Whether the immediate caller should retry with the same idempotency
    /// key. Store-level failures leave the operation's effect unknown and
    /// must never be coerced into success or duplicate.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            LedgerError::InvalidInput(_) | LedgerError::InvalidCursor
        )
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Storage interface for ledger entries and materialized balances.
///
/// Implementations must make the duplicate-check + insert + balance update
/// in `append` a single atomic unit.
pub trait LedgerStore: Send + Sync {
    fn append(&self, new_entry: NewEntry) -> LedgerResult<AppendOutcome>;
    fn balance_of(&self, user_id: &str) -> LedgerResult<i64>;
    fn entries_for(
        &self,
        user_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> LedgerResult<LedgerPage>;
}

/// Validating facade over a [`LedgerStore`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Append an entry, enforcing the input invariants the stores assume.
    pub fn append(
        &self,
        user_id: &str,
        delta: i64,
        reason: &str,
        source: EntrySource,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<AppendOutcome> {
        if user_id.is_empty() {
            return Err(LedgerError::InvalidInput("user_id must not be empty".into()));
        }
        if user_id.len() > MAX_USER_ID_BYTES {
            return Err(LedgerError::InvalidInput(format!(
                "user_id must not exceed {MAX_USER_ID_BYTES} bytes"
            )));
        }
        if reason.is_empty() {
            return Err(LedgerError::InvalidInput("reason must not be empty".into()));
        }
        if source == EntrySource::Webhook && idempotency_key.is_none() {
            return Err(LedgerError::InvalidInput(
                "webhook entries require an idempotency key".into(),
            ));
        }
        if let Some(key) = idempotency_key {
            if key.is_empty() {
                return Err(LedgerError::InvalidInput(
                    "idempotency key must not be empty".into(),
                ));
            }
        }

        self.store.append(NewEntry {
            user_id: user_id.to_string(),
            delta,
            reason: reason.to_string(),
            source,
            idempotency_key: idempotency_key.map(str::to_string),
        })
    }

    /// Materialized balance for `user_id` (zero for unknown users).
    pub fn balance_of(&self, user_id: &str) -> LedgerResult<i64> {
        self.store.balance_of(user_id)
    }

    /// Page through a user's entries, newest first.
    pub fn entries_for(
        &self,
        user_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> LedgerResult<LedgerPage> {
        if limit == 0 {
            return Err(LedgerError::InvalidInput("limit must be positive".into()));
        }
        if user_id.len() > MAX_USER_ID_BYTES {
            return Err(LedgerError::InvalidInput(format!(
                "user_id must not exceed {MAX_USER_ID_BYTES} bytes"
            )));
        }
        self.store.entries_for(user_id, limit, cursor)
    }
}
