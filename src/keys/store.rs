// SPDX-License-Identifier: AGPL-3.0-or-later

//! Key storage backends.
//!
//! The registry depends only on the [`KeyStore`] trait. `InMemoryKeyStore`
//! backs tests and secret-less development; `RedbKeyStore` is the durable
//! production store. Both guarantee that [`KeyStore::with_record`] applies
//! its mutation atomically per key: the in-memory store holds a shard lock
//! across the closure, the redb store runs it inside a single write
//! transaction.

use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use super::ApiKeyRecord;
use crate::shards::ShardedMap;

/// Table: raw key -> serialized [`ApiKeyRecord`] (JSON bytes).
const API_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_keys");

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Storage interface for API key records.
pub trait KeyStore: Send + Sync {
    /// Persist a freshly issued key record.
    fn insert(&self, record: ApiKeyRecord) -> KeyStoreResult<()>;

    /// Run `f` with exclusive access to the record for `raw_key`.
    ///
    /// The closure sees `None` for unknown keys and may mutate the record
    /// in place; the updated record is persisted before the call returns.
    /// Concurrent calls for the same key serialize.
    fn with_record(
        &self,
        raw_key: &str,
        f: &mut dyn FnMut(&mut Option<ApiKeyRecord>),
    ) -> KeyStoreResult<()>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// Sharded in-memory key store.
#[derive(Default)]
pub struct InMemoryKeyStore {
    records: ShardedMap<ApiKeyRecord>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn insert(&self, record: ApiKeyRecord) -> KeyStoreResult<()> {
        let key = record.key.clone();
        self.records.with_entry(&key, |slot| {
            *slot = Some(record);
        });
        Ok(())
    }

    fn with_record(
        &self,
        raw_key: &str,
        f: &mut dyn FnMut(&mut Option<ApiKeyRecord>),
    ) -> KeyStoreResult<()> {
        self.records.with_entry(raw_key, f);
        Ok(())
    }
}

// =============================================================================
// redb store
// =============================================================================

/// Durable key store backed by redb.
pub struct RedbKeyStore {
    db: Arc<Database>,
}

impl RedbKeyStore {
    /// Wrap an open database, pre-creating the key table.
    pub fn new(db: Arc<Database>) -> KeyStoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(API_KEYS)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }
}

impl KeyStore for RedbKeyStore {
    fn insert(&self, record: ApiKeyRecord) -> KeyStoreResult<()> {
        let json = serde_json::to_vec(&record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(API_KEYS)?;
            table.insert(record.key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn with_record(
        &self,
        raw_key: &str,
        f: &mut dyn FnMut(&mut Option<ApiKeyRecord>),
    ) -> KeyStoreResult<()> {
        // The whole read-modify-write runs inside one write transaction;
        // redb serializes writers, so concurrent validations of the same
        // key cannot interleave.
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(API_KEYS)?;

            let existing_bytes = match table.get(raw_key)? {
                Some(value) => Some(value.value().to_vec()),
                None => None,
            };
            let mut slot: Option<ApiKeyRecord> = match existing_bytes {
                Some(bytes) => Some(serde_json::from_slice(&bytes)?),
                None => None,
            };

            f(&mut slot);

            match slot {
                Some(record) => {
                    let json = serde_json::to_vec(&record)?;
                    table.insert(raw_key, json.as_slice())?;
                }
                None => {
                    table.remove(raw_key)?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample_record(key: &str) -> ApiKeyRecord {
        let now = Utc::now();
        ApiKeyRecord {
            key: key.to_string(),
            owner_id: "owner-1".to_string(),
            max_requests_per_window: 10,
            window_start: now,
            window_end: now + Duration::hours(1),
            request_count: 0,
        }
    }

    #[test]
    fn memory_store_round_trips_records() {
        let store = InMemoryKeyStore::new();
        store.insert(sample_record("cg_abc")).unwrap();

        let mut seen = None;
        store
            .with_record("cg_abc", &mut |slot| {
                seen = slot.clone();
            })
            .unwrap();
        assert_eq!(seen.unwrap().owner_id, "owner-1");
    }

    #[test]
    fn redb_store_persists_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("keys.redb")).unwrap());
        let store = RedbKeyStore::new(db).unwrap();

        store.insert(sample_record("cg_abc")).unwrap();
        store
            .with_record("cg_abc", &mut |slot| {
                slot.as_mut().unwrap().request_count += 1;
            })
            .unwrap();

        let mut seen = None;
        store
            .with_record("cg_abc", &mut |slot| {
                seen = slot.clone();
            })
            .unwrap();
        assert_eq!(seen.unwrap().request_count, 1);
    }

    #[test]
    fn redb_store_reports_unknown_keys_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("keys.redb")).unwrap());
        let store = RedbKeyStore::new(db).unwrap();

        let mut was_none = false;
        store
            .with_record("cg_missing", &mut |slot| {
                was_none = slot.is_none();
            })
            .unwrap();
        assert!(was_none);
    }
}
