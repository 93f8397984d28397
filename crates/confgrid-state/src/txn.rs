//! Write operations available inside [`StateStore::write`](crate::StateStore::write).
//!
//! Every insert allocates its id from the `sequences` table within the same
//! transaction, so ids are never reused even after a namespace is removed.

use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use tracing::debug;

use confgrid_core::{
    GrayReleaseRule, Item, Namespace, NamespaceId, NamespaceLock, Release, ReleaseHistory,
    ReleaseId, epoch_secs,
};

use crate::error::{StateError, StateResult, map_err};
use crate::read::StateRead;
use crate::tables::*;

/// An open write transaction.
pub struct StoreTxn {
    pub(crate) txn: WriteTransaction,
}

type RowTable = TableDefinition<'static, u64, &'static [u8]>;

impl StoreTxn {
    fn next_id(&self, sequence: &str) -> StateResult<u64> {
        let mut table = self.txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        let last = table
            .get(sequence)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = last + 1;
        table.insert(sequence, next).map_err(map_err!(Write))?;
        Ok(next)
    }

    fn put_row<T: Serialize>(&self, def: RowTable, id: u64, row: &T) -> StateResult<()> {
        let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        Ok(())
    }

    // ── Namespaces ─────────────────────────────────────────────────

    /// Insert a namespace, enforcing unique names and at most one branch
    /// per master namespace.
    pub fn insert_namespace(&self, mut namespace: Namespace) -> StateResult<Namespace> {
        let key = namespace.key().table_key();
        let mut index = self.txn.open_table(NAMESPACE_INDEX).map_err(map_err!(Table))?;
        if index.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
            return Err(StateError::Conflict(format!("namespace {key} already exists")));
        }

        let mut branches = self.txn.open_table(BRANCH_INDEX).map_err(map_err!(Table))?;
        if let Some(parent_id) = namespace.parent_id() {
            if branches.get(parent_id).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!(
                    "namespace {parent_id} already has a branch"
                )));
            }
        }

        namespace.id = self.next_id(SEQ_NAMESPACES)?;
        self.put_row(NAMESPACES, namespace.id, &namespace)?;
        index
            .insert(key.as_str(), namespace.id)
            .map_err(map_err!(Write))?;
        if let Some(parent_id) = namespace.parent_id() {
            branches
                .insert(parent_id, namespace.id)
                .map_err(map_err!(Write))?;
        }
        debug!(%key, id = namespace.id, "namespace stored");
        Ok(namespace)
    }

    /// Remove a namespace with its indexes and lock; its items are
    /// soft-deleted. Returns the removed row.
    pub fn remove_namespace(&self, id: NamespaceId) -> StateResult<Option<Namespace>> {
        let Some(namespace) = self.namespace(id)? else {
            return Ok(None);
        };
        let items = self.items(id)?;

        {
            let mut table = self.txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
            table.remove(id).map_err(map_err!(Write))?;
        }
        {
            let mut index = self.txn.open_table(NAMESPACE_INDEX).map_err(map_err!(Table))?;
            index
                .remove(namespace.key().table_key().as_str())
                .map_err(map_err!(Write))?;
        }
        if let Some(parent_id) = namespace.parent_id() {
            let mut branches = self.txn.open_table(BRANCH_INDEX).map_err(map_err!(Table))?;
            branches.remove(parent_id).map_err(map_err!(Write))?;
        }
        self.delete_lock(id)?;

        let now = epoch_secs();
        for mut item in items {
            item.deleted = true;
            item.updated_at = now;
            self.update_item(&item)?;
        }
        debug!(key = %namespace.key(), id, "namespace removed");
        Ok(Some(namespace))
    }

    // ── Items ──────────────────────────────────────────────────────

    pub fn insert_item(&self, mut item: Item) -> StateResult<Item> {
        item.id = self.next_id(SEQ_ITEMS)?;
        self.update_item(&item)?;
        Ok(item)
    }

    /// Overwrite a stored item (also used for soft deletes).
    pub fn update_item(&self, item: &Item) -> StateResult<()> {
        let value = serde_json::to_vec(item).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(ITEMS).map_err(map_err!(Table))?;
        table
            .insert((item.namespace_id, item.id), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    // ── Locks ──────────────────────────────────────────────────────

    pub fn put_lock(&self, lock: &NamespaceLock) -> StateResult<()> {
        self.put_row(NAMESPACE_LOCKS, lock.namespace_id, lock)?;
        debug!(namespace_id = lock.namespace_id, owner = %lock.owner, "namespace locked");
        Ok(())
    }

    /// Returns true if a lock existed.
    pub fn delete_lock(&self, namespace_id: NamespaceId) -> StateResult<bool> {
        let mut table = self.txn.open_table(NAMESPACE_LOCKS).map_err(map_err!(Table))?;
        let existed = table.remove(namespace_id).map_err(map_err!(Write))?.is_some();
        if existed {
            debug!(namespace_id, "namespace unlocked");
        }
        Ok(existed)
    }

    // ── Releases ───────────────────────────────────────────────────

    pub fn insert_release(&self, mut release: Release) -> StateResult<Release> {
        let mut keys = self.txn.open_table(RELEASE_KEYS).map_err(map_err!(Table))?;
        if keys
            .get(release.release_key.as_str())
            .map_err(map_err!(Read))?
            .is_some()
        {
            return Err(StateError::Conflict(format!(
                "release key {} already exists",
                release.release_key
            )));
        }

        release.id = self.next_id(SEQ_RELEASES)?;
        self.put_row(RELEASES, release.id, &release)?;
        keys.insert(release.release_key.as_str(), release.id)
            .map_err(map_err!(Write))?;

        let mut by_namespace = self.txn.open_table(NAMESPACE_RELEASES).map_err(map_err!(Table))?;
        by_namespace
            .insert((release.namespace_id, release.id), !release.abandoned)
            .map_err(map_err!(Write))?;
        debug!(release_id = release.id, key = %release.release_key, "release stored");
        Ok(release)
    }

    /// Flag a release as abandoned. Nothing else about it changes.
    pub fn abandon_release(&self, id: ReleaseId, operator: &str) -> StateResult<Release> {
        let mut release = self
            .release(id)?
            .ok_or_else(|| StateError::NotFound(format!("release {id}")))?;
        release.abandoned = true;
        release.abandoned_by = Some(operator.to_string());
        release.abandoned_at = Some(epoch_secs());
        self.put_row(RELEASES, id, &release)?;

        let mut by_namespace = self.txn.open_table(NAMESPACE_RELEASES).map_err(map_err!(Table))?;
        by_namespace
            .insert((release.namespace_id, id), false)
            .map_err(map_err!(Write))?;
        debug!(release_id = id, %operator, "release abandoned");
        Ok(release)
    }

    // ── Gray rules ─────────────────────────────────────────────────

    /// Store a new rule version; it becomes the current rule of its branch.
    pub fn insert_gray_rule(&self, mut rule: GrayReleaseRule) -> StateResult<GrayReleaseRule> {
        rule.id = self.next_id(SEQ_GRAY_RULES)?;
        self.put_row(GRAY_RULES, rule.id, &rule)?;
        let mut index = self.txn.open_table(GRAY_RULE_INDEX).map_err(map_err!(Table))?;
        index
            .insert(rule.table_key().as_str(), rule.id)
            .map_err(map_err!(Write))?;
        debug!(rule_id = rule.id, branch = %rule.branch_name, release_id = rule.release_id, "gray rule stored");
        Ok(rule)
    }

    // ── History ────────────────────────────────────────────────────

    pub fn append_history(&self, mut history: ReleaseHistory) -> StateResult<ReleaseHistory> {
        history.id = self.next_id(SEQ_HISTORY)?;
        self.put_row(RELEASE_HISTORY, history.id, &history)?;

        let code = history.operation.code();
        {
            let mut by_release = self.txn.open_table(HISTORY_BY_RELEASE).map_err(map_err!(Table))?;
            by_release
                .insert((history.release_id, history.id), code)
                .map_err(map_err!(Write))?;
        }
        let mut by_previous = self.txn.open_table(HISTORY_BY_PREVIOUS).map_err(map_err!(Table))?;
        by_previous
            .insert((history.previous_release_id, history.id), code)
            .map_err(map_err!(Write))?;
        debug!(
            history_id = history.id,
            release_id = history.release_id,
            previous_release_id = history.previous_release_id,
            operation = ?history.operation,
            "release history appended"
        );
        Ok(history)
    }
}
