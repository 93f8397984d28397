//! Release history: the append-only audit trail.

use confgrid_core::{
    NamespaceKey, OperationContext, ReleaseHistory, ReleaseId, ReleaseOperation, epoch_secs,
};
use confgrid_state::{StateRead, StoreTxn};

use crate::error::ReleaseResult;

/// Builder for one history row.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    namespace: NamespaceKey,
    branch_name: String,
    release_id: ReleaseId,
    previous_release_id: ReleaseId,
    operation: ReleaseOperation,
    context: OperationContext,
    operator: String,
}

impl HistoryRecord {
    /// A record for `namespace` whose branch name defaults to its cluster.
    pub fn new(namespace: NamespaceKey, operation: ReleaseOperation, operator: &str) -> Self {
        Self {
            branch_name: namespace.cluster_name.clone(),
            namespace,
            release_id: 0,
            previous_release_id: 0,
            operation,
            context: OperationContext::new(),
            operator: operator.to_string(),
        }
    }

    pub fn branch(mut self, branch_name: &str) -> Self {
        self.branch_name = branch_name.to_string();
        self
    }

    pub fn releases(mut self, release_id: ReleaseId, previous_release_id: ReleaseId) -> Self {
        self.release_id = release_id;
        self.previous_release_id = previous_release_id;
        self
    }

    pub fn context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    pub fn append(self, txn: &StoreTxn) -> ReleaseResult<ReleaseHistory> {
        Ok(txn.append_history(ReleaseHistory {
            id: 0,
            app_id: self.namespace.app_id,
            cluster_name: self.namespace.cluster_name,
            namespace_name: self.namespace.namespace_name,
            branch_name: self.branch_name,
            release_id: self.release_id,
            previous_release_id: self.previous_release_id,
            operation: self.operation,
            context: self.context,
            operator: self.operator,
            created_at: epoch_secs(),
        })?)
    }
}

/// Keys the branch defined itself when `branch_release_id` was built, as
/// recorded on the newest branch-release history row for it. `None` when
/// no row carries them.
pub fn branch_release_keys(
    reader: &impl StateRead,
    branch_release_id: ReleaseId,
) -> ReleaseResult<Option<Vec<String>>> {
    let rows = reader.history_by_release(branch_release_id, &ReleaseOperation::BRANCH_RELEASES)?;
    Ok(rows
        .into_iter()
        .next()
        .and_then(|row| row.context.branch_release_keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use confgrid_state::StateStore;

    #[test]
    fn record_defaults_branch_to_cluster() {
        let store = StateStore::open_in_memory().unwrap();
        let key = NamespaceKey::new("orderSvc", "default", "application");
        let row = store
            .write(|txn| {
                HistoryRecord::new(key.clone(), ReleaseOperation::NormalRelease, "alice")
                    .releases(2, 1)
                    .append(txn)
            })
            .unwrap();
        assert_eq!(row.branch_name, "default");
        assert_eq!((row.release_id, row.previous_release_id), (2, 1));
        assert!(row.id > 0);
    }

    #[test]
    fn branch_keys_come_from_newest_branch_release_row() {
        let store = StateStore::open_in_memory().unwrap();
        let key = NamespaceKey::new("orderSvc", "default", "application");
        store
            .write(|txn| {
                HistoryRecord::new(key.clone(), ReleaseOperation::GrayRelease, "alice")
                    .branch("gray")
                    .releases(7, 0)
                    .context(OperationContext::new().branch_release_keys(Some(vec!["timeout".into()])))
                    .append(txn)?;
                // Rule changes reference the same release but carry no keys.
                HistoryRecord::new(key.clone(), ReleaseOperation::ApplyGrayRules, "alice")
                    .branch("gray")
                    .releases(7, 7)
                    .append(txn)
            })
            .unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(
            branch_release_keys(&snap, 7).unwrap(),
            Some(vec!["timeout".to_string()])
        );
        assert_eq!(branch_release_keys(&snap, 8).unwrap(), None);
    }
}
