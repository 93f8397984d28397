//! Typed queries shared by read snapshots and write transactions.

use redb::ReadableTable;
use serde::de::DeserializeOwned;

use confgrid_core::{
    GrayReleaseRule, HistoryId, Item, Namespace, NamespaceId, NamespaceKey, NamespaceLock, Page,
    Release, ReleaseHistory, ReleaseId, ReleaseOperation, rule_key,
};

use crate::error::{StateResult, map_err};
use crate::store::StoreSnapshot;
use crate::tables::*;
use crate::txn::StoreTxn;

/// Read access to the store. Implemented for [`StoreSnapshot`] and for
/// [`StoreTxn`], where reads observe the transaction's own writes.
pub trait StateRead {
    fn namespace(&self, id: NamespaceId) -> StateResult<Option<Namespace>>;

    fn find_namespace(&self, key: &NamespaceKey) -> StateResult<Option<Namespace>>;

    /// The branch of a master namespace, if one exists.
    fn branch_of(&self, parent_id: NamespaceId) -> StateResult<Option<Namespace>>;

    /// Non-deleted items in line-number order.
    fn items(&self, namespace_id: NamespaceId) -> StateResult<Vec<Item>>;

    fn lock(&self, namespace_id: NamespaceId) -> StateResult<Option<NamespaceLock>>;

    fn release(&self, id: ReleaseId) -> StateResult<Option<Release>>;

    fn release_by_key(&self, release_key: &str) -> StateResult<Option<Release>>;

    /// Up to `limit` active releases of a namespace, newest first.
    fn latest_active_releases(
        &self,
        namespace_id: NamespaceId,
        limit: usize,
    ) -> StateResult<Vec<Release>>;

    /// A page of a namespace's releases, newest first.
    fn releases(
        &self,
        namespace_id: NamespaceId,
        active_only: bool,
        page: Page,
    ) -> StateResult<Vec<Release>>;

    /// Active releases with `from <= id <= to`, newest first.
    fn active_releases_between(
        &self,
        namespace_id: NamespaceId,
        from: ReleaseId,
        to: ReleaseId,
    ) -> StateResult<Vec<Release>>;

    /// Latest rule version for `branch_name` under the master `parent`.
    fn current_gray_rule(
        &self,
        parent: &NamespaceKey,
        branch_name: &str,
    ) -> StateResult<Option<GrayReleaseRule>>;

    /// History rows whose `release_id` matches, newest first. An empty
    /// `operations` slice matches every operation.
    fn history_by_release(
        &self,
        release_id: ReleaseId,
        operations: &[ReleaseOperation],
    ) -> StateResult<Vec<ReleaseHistory>>;

    /// History rows whose `previous_release_id` matches, newest first.
    fn history_by_previous_release(
        &self,
        previous_release_id: ReleaseId,
        operations: &[ReleaseOperation],
    ) -> StateResult<Vec<ReleaseHistory>>;

    /// A page of a namespace's history, newest first.
    fn history_for_namespace(
        &self,
        key: &NamespaceKey,
        page: Page,
    ) -> StateResult<Vec<ReleaseHistory>>;

    fn latest_active_release(&self, namespace_id: NamespaceId) -> StateResult<Option<Release>> {
        Ok(self.latest_active_releases(namespace_id, 1)?.pop())
    }
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn get_row<T, Tb>(table: &Tb, id: u64) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn get_rows<T, Tb>(table: &Tb, ids: &[u64]) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<u64, &'static [u8]>,
{
    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(row) = get_row(table, *id)? {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn get_index<Tb>(table: &Tb, key: &str) -> StateResult<Option<u64>>
where
    Tb: ReadableTable<&'static str, u64>,
{
    Ok(table.get(key).map_err(map_err!(Read))?.map(|guard| guard.value()))
}

/// Release ids of one namespace, newest first, filtered by `keep`.
fn scan_namespace_releases<Tb>(
    table: &Tb,
    namespace_id: NamespaceId,
    from: ReleaseId,
    to: ReleaseId,
    keep: impl Fn(bool) -> bool,
) -> StateResult<Vec<ReleaseId>>
where
    Tb: ReadableTable<(u64, u64), bool>,
{
    let mut ids = Vec::new();
    for entry in table
        .range((namespace_id, from)..=(namespace_id, to))
        .map_err(map_err!(Read))?
        .rev()
    {
        let (key, active) = entry.map_err(map_err!(Read))?;
        if keep(active.value()) {
            ids.push(key.value().1);
        }
    }
    Ok(ids)
}

/// History ids attached to `owner_id` in a `(owner, history)` index,
/// newest first, restricted to `operations` when non-empty.
fn scan_history_index<Tb>(
    table: &Tb,
    owner_id: u64,
    operations: &[ReleaseOperation],
) -> StateResult<Vec<HistoryId>>
where
    Tb: ReadableTable<(u64, u64), u8>,
{
    let mut ids = Vec::new();
    for entry in table
        .range((owner_id, 0u64)..=(owner_id, u64::MAX))
        .map_err(map_err!(Read))?
        .rev()
    {
        let (key, code) = entry.map_err(map_err!(Read))?;
        let code = code.value();
        if operations.is_empty() || operations.iter().any(|op| op.code() == code) {
            ids.push(key.value().1);
        }
    }
    Ok(ids)
}

macro_rules! impl_state_read {
    ($ty:ty) => {
        impl StateRead for $ty {
            fn namespace(&self, id: NamespaceId) -> StateResult<Option<Namespace>> {
                let table = self.txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
                get_row(&table, id)
            }

            fn find_namespace(&self, key: &NamespaceKey) -> StateResult<Option<Namespace>> {
                let id = {
                    let index = self.txn.open_table(NAMESPACE_INDEX).map_err(map_err!(Table))?;
                    get_index(&index, &key.table_key())?
                };
                match id {
                    Some(id) => self.namespace(id),
                    None => Ok(None),
                }
            }

            fn branch_of(&self, parent_id: NamespaceId) -> StateResult<Option<Namespace>> {
                let id = {
                    let index = self.txn.open_table(BRANCH_INDEX).map_err(map_err!(Table))?;
                    let found = index.get(parent_id).map_err(map_err!(Read))?;
                    found.map(|guard| guard.value())
                };
                match id {
                    Some(id) => self.namespace(id),
                    None => Ok(None),
                }
            }

            fn items(&self, namespace_id: NamespaceId) -> StateResult<Vec<Item>> {
                let table = self.txn.open_table(ITEMS).map_err(map_err!(Table))?;
                let mut items = Vec::new();
                for entry in table
                    .range((namespace_id, 0u64)..=(namespace_id, u64::MAX))
                    .map_err(map_err!(Read))?
                {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let item: Item = decode(value.value())?;
                    if !item.deleted {
                        items.push(item);
                    }
                }
                items.sort_by_key(|item| (item.line_num, item.id));
                Ok(items)
            }

            fn lock(&self, namespace_id: NamespaceId) -> StateResult<Option<NamespaceLock>> {
                let table = self.txn.open_table(NAMESPACE_LOCKS).map_err(map_err!(Table))?;
                get_row(&table, namespace_id)
            }

            fn release(&self, id: ReleaseId) -> StateResult<Option<Release>> {
                let table = self.txn.open_table(RELEASES).map_err(map_err!(Table))?;
                get_row(&table, id)
            }

            fn release_by_key(&self, release_key: &str) -> StateResult<Option<Release>> {
                let id = {
                    let index = self.txn.open_table(RELEASE_KEYS).map_err(map_err!(Table))?;
                    get_index(&index, release_key)?
                };
                match id {
                    Some(id) => self.release(id),
                    None => Ok(None),
                }
            }

            fn latest_active_releases(
                &self,
                namespace_id: NamespaceId,
                limit: usize,
            ) -> StateResult<Vec<Release>> {
                let mut ids = {
                    let index = self.txn.open_table(NAMESPACE_RELEASES).map_err(map_err!(Table))?;
                    scan_namespace_releases(&index, namespace_id, 0, u64::MAX, |active| active)?
                };
                ids.truncate(limit);
                let table = self.txn.open_table(RELEASES).map_err(map_err!(Table))?;
                get_rows(&table, &ids)
            }

            fn releases(
                &self,
                namespace_id: NamespaceId,
                active_only: bool,
                page: Page,
            ) -> StateResult<Vec<Release>> {
                let ids: Vec<ReleaseId> = {
                    let index = self.txn.open_table(NAMESPACE_RELEASES).map_err(map_err!(Table))?;
                    scan_namespace_releases(&index, namespace_id, 0, u64::MAX, |active| {
                        active || !active_only
                    })?
                    .into_iter()
                    .skip(page.offset())
                    .take(page.size)
                    .collect()
                };
                let table = self.txn.open_table(RELEASES).map_err(map_err!(Table))?;
                get_rows(&table, &ids)
            }

            fn active_releases_between(
                &self,
                namespace_id: NamespaceId,
                from: ReleaseId,
                to: ReleaseId,
            ) -> StateResult<Vec<Release>> {
                if from > to {
                    return Ok(Vec::new());
                }
                let ids = {
                    let index = self.txn.open_table(NAMESPACE_RELEASES).map_err(map_err!(Table))?;
                    scan_namespace_releases(&index, namespace_id, from, to, |active| active)?
                };
                let table = self.txn.open_table(RELEASES).map_err(map_err!(Table))?;
                get_rows(&table, &ids)
            }

            fn current_gray_rule(
                &self,
                parent: &NamespaceKey,
                branch_name: &str,
            ) -> StateResult<Option<GrayReleaseRule>> {
                let id = {
                    let index = self.txn.open_table(GRAY_RULE_INDEX).map_err(map_err!(Table))?;
                    get_index(&index, &rule_key(parent, branch_name))?
                };
                match id {
                    Some(id) => {
                        let table = self.txn.open_table(GRAY_RULES).map_err(map_err!(Table))?;
                        get_row(&table, id)
                    }
                    None => Ok(None),
                }
            }

            fn history_by_release(
                &self,
                release_id: ReleaseId,
                operations: &[ReleaseOperation],
            ) -> StateResult<Vec<ReleaseHistory>> {
                let ids = {
                    let index = self.txn.open_table(HISTORY_BY_RELEASE).map_err(map_err!(Table))?;
                    scan_history_index(&index, release_id, operations)?
                };
                let table = self.txn.open_table(RELEASE_HISTORY).map_err(map_err!(Table))?;
                get_rows(&table, &ids)
            }

            fn history_by_previous_release(
                &self,
                previous_release_id: ReleaseId,
                operations: &[ReleaseOperation],
            ) -> StateResult<Vec<ReleaseHistory>> {
                let ids = {
                    let index = self.txn.open_table(HISTORY_BY_PREVIOUS).map_err(map_err!(Table))?;
                    scan_history_index(&index, previous_release_id, operations)?
                };
                let table = self.txn.open_table(RELEASE_HISTORY).map_err(map_err!(Table))?;
                get_rows(&table, &ids)
            }

            fn history_for_namespace(
                &self,
                key: &NamespaceKey,
                page: Page,
            ) -> StateResult<Vec<ReleaseHistory>> {
                let table = self.txn.open_table(RELEASE_HISTORY).map_err(map_err!(Table))?;
                let mut rows = Vec::new();
                let mut skipped = 0;
                for entry in table.iter().map_err(map_err!(Read))?.rev() {
                    if rows.len() == page.size {
                        break;
                    }
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let history: ReleaseHistory = decode(value.value())?;
                    if history.namespace_key() != *key {
                        continue;
                    }
                    if skipped < page.offset() {
                        skipped += 1;
                        continue;
                    }
                    rows.push(history);
                }
                Ok(rows)
            }
        }
    };
}

impl_state_read!(StoreSnapshot);
impl_state_read!(StoreTxn);
