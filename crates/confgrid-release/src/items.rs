//! Item editing and materialization.

use tracing::debug;

use confgrid_core::{ConfigMap, Item, ItemChangeSet, Namespace, epoch_secs};
use confgrid_state::{StateRead, StoreTxn};

use crate::error::{ReleaseError, ReleaseResult};

/// Ordered key → value map of `items`, skipping blank keys.
pub fn materialize(items: &[Item]) -> ConfigMap {
    items
        .iter()
        .filter(|item| !item.deleted && !item.key.trim().is_empty())
        .map(|item| (item.key.as_str(), item.value.as_str()))
        .collect()
}

/// Apply creates, then updates, then deletes. Returns the namespace's
/// items afterwards, in line order.
pub fn apply_change_set(
    txn: &StoreTxn,
    namespace: &Namespace,
    change_set: &ItemChangeSet,
    operator: &str,
) -> ReleaseResult<Vec<Item>> {
    let mut items = txn.items(namespace.id)?;
    let now = epoch_secs();
    let mut max_line = items.iter().map(|item| item.line_num).max().unwrap_or(0);

    for draft in &change_set.create_items {
        if draft.key.trim().is_empty() {
            return Err(ReleaseError::bad_request("item key must not be blank"));
        }
        if items.iter().any(|item| item.key == draft.key) {
            return Err(ReleaseError::bad_request(format!(
                "item {} already exists in {}",
                draft.key,
                namespace.key()
            )));
        }
        let line_num = match draft.line_num {
            Some(line_num) => line_num,
            None => max_line.checked_add(1).ok_or_else(|| {
                ReleaseError::bad_request(format!(
                    "no line left after {max_line} for item {} in {}",
                    draft.key,
                    namespace.key()
                ))
            })?,
        };
        max_line = max_line.max(line_num);
        let item = txn.insert_item(Item {
            id: 0,
            namespace_id: namespace.id,
            key: draft.key.clone(),
            value: draft.value.clone(),
            comment: draft.comment.clone().unwrap_or_default(),
            line_num,
            deleted: false,
            created_by: operator.to_string(),
            modified_by: operator.to_string(),
            updated_at: now,
        })?;
        items.push(item);
    }

    for draft in &change_set.update_items {
        let item = items
            .iter_mut()
            .find(|item| item.key == draft.key)
            .ok_or_else(|| ReleaseError::not_found(format!("item {} in {}", draft.key, namespace.key())))?;
        item.value = draft.value.clone();
        if let Some(comment) = &draft.comment {
            item.comment = comment.clone();
        }
        if let Some(line_num) = draft.line_num {
            item.line_num = line_num;
        }
        item.modified_by = operator.to_string();
        item.updated_at = now;
        txn.update_item(item)?;
    }

    for key in &change_set.delete_items {
        let pos = items
            .iter()
            .position(|item| &item.key == key)
            .ok_or_else(|| ReleaseError::not_found(format!("item {key} in {}", namespace.key())))?;
        let mut item = items.remove(pos);
        item.deleted = true;
        item.modified_by = operator.to_string();
        item.updated_at = now;
        txn.update_item(&item)?;
    }

    items.sort_by_key(|item| (item.line_num, item.id));
    debug!(
        namespace = %namespace.key(),
        created = change_set.create_items.len(),
        updated = change_set.update_items.len(),
        deleted = change_set.delete_items.len(),
        "item change set applied"
    );
    Ok(items)
}
