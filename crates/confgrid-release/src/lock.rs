//! Namespace lock: the advisory "has unreleased edits" marker.
//!
//! Editing a namespace takes its lock for the editor; a release clears it.
//! The lock's only enforcement is that its owner cannot publish their own
//! edits unless the publish is an emergency.

use tracing::{debug, warn};

use confgrid_core::{ConfigMap, Namespace, NamespaceLock, epoch_secs};
use confgrid_state::{StateRead, StoreTxn};

use crate::error::{ReleaseError, ReleaseResult};
use crate::items::materialize;

/// Reject a non-emergency publish by the operator who holds the lock.
pub fn check_lock(
    reader: &impl StateRead,
    namespace: &Namespace,
    emergency: bool,
    operator: &str,
) -> ReleaseResult<()> {
    if emergency {
        return Ok(());
    }
    if let Some(lock) = reader.lock(namespace.id)? {
        if lock.owner == operator {
            warn!(namespace = %namespace.key(), %operator, "publish by lock owner refused");
            return Err(ReleaseError::bad_request(
                "config can not be published by yourself",
            ));
        }
    }
    Ok(())
}

/// Take the lock for `operator` before an edit. Fails if someone else
/// already holds it.
pub fn acquire_lock(txn: &StoreTxn, namespace: &Namespace, operator: &str) -> ReleaseResult<()> {
    match txn.lock(namespace.id)? {
        None => {
            txn.put_lock(&NamespaceLock {
                namespace_id: namespace.id,
                owner: operator.to_string(),
                created_at: epoch_secs(),
            })?;
            Ok(())
        }
        Some(lock) if lock.owner != operator => Err(ReleaseError::bad_request(format!(
            "namespace:{} is modified by {}",
            namespace.namespace_name, lock.owner
        ))),
        Some(_) => Ok(()),
    }
}

pub fn release_lock(txn: &StoreTxn, namespace: &Namespace) -> ReleaseResult<bool> {
    Ok(txn.delete_lock(namespace.id)?)
}

/// Drop the lock when the namespace's items once again produce exactly
/// its active release. Returns true if a lock was dropped.
pub fn unlock_if_unmodified(txn: &StoreTxn, namespace: &Namespace) -> ReleaseResult<bool> {
    let items = materialize(&txn.items(namespace.id)?);
    let effective = match namespace.parent_id() {
        None => items,
        Some(parent_id) => {
            let parent_config = txn
                .latest_active_release(parent_id)?
                .map(|release| release.configuration)
                .unwrap_or_default();
            parent_config.overlay(&items)
        }
    };
    let released = txn
        .latest_active_release(namespace.id)?
        .map(|release| release.configuration)
        .unwrap_or_else(ConfigMap::new);

    if effective == released {
        let dropped = release_lock(txn, namespace)?;
        if dropped {
            debug!(namespace = %namespace.key(), "edits reverted, lock released");
        }
        return Ok(dropped);
    }
    Ok(false)
}
