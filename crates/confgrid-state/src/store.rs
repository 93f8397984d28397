//! StateStore — redb-backed persistence for confgrid.
//!
//! The store hands out read snapshots and runs write closures inside a
//! single redb write transaction. redb serializes writers, so every
//! closure sees a consistent view and commits atomically.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableDatabase};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult, map_err};
use crate::tables::*;
use crate::txn::StoreTxn;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

/// A consistent read-only view of the store.
pub struct StoreSnapshot {
    pub(crate) txn: ReadTransaction,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
        txn.open_table(NAMESPACE_INDEX).map_err(map_err!(Table))?;
        txn.open_table(BRANCH_INDEX).map_err(map_err!(Table))?;
        txn.open_table(ITEMS).map_err(map_err!(Table))?;
        txn.open_table(NAMESPACE_LOCKS).map_err(map_err!(Table))?;
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(NAMESPACE_RELEASES).map_err(map_err!(Table))?;
        txn.open_table(RELEASE_KEYS).map_err(map_err!(Table))?;
        txn.open_table(GRAY_RULES).map_err(map_err!(Table))?;
        txn.open_table(GRAY_RULE_INDEX).map_err(map_err!(Table))?;
        txn.open_table(RELEASE_HISTORY).map_err(map_err!(Table))?;
        txn.open_table(HISTORY_BY_RELEASE).map_err(map_err!(Table))?;
        txn.open_table(HISTORY_BY_PREVIOUS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Begin a read-only snapshot.
    pub fn snapshot(&self) -> StateResult<StoreSnapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(StoreSnapshot { txn })
    }

    /// Run `f` inside one write transaction. `Ok` commits, `Err` aborts and
    /// leaves the store untouched.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTxn) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let txn = StoreTxn { txn };
        match f(&txn) {
            Ok(value) => {
                txn.txn.commit().map_err(map_err!(Commit))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort) = txn.txn.abort() {
                    warn!(error = %abort, "failed to abort write transaction");
                }
                Err(err)
            }
        }
    }
}
