//! Release creation inside a write transaction.
//!
//! These are the building blocks the service composes: a plain release,
//! a master release with its history row, a branch release bound to the
//! branch's gray rule, and the cascade that re-derives a branch release
//! after its master moved.

use tracing::{debug, info};

use confgrid_core::{
    ConfigMap, Namespace, OperationContext, Release, ReleaseId, ReleaseOperation, ReleaseRequest,
    epoch_secs, keys,
};
use confgrid_state::{StateRead, StoreTxn};

use crate::branch;
use crate::error::ReleaseResult;
use crate::history::{self, HistoryRecord};
use crate::lock;
use crate::merge;

/// Insert a release for `namespace` and clear its lock.
pub fn create_release(
    txn: &StoreTxn,
    namespace: &Namespace,
    configuration: ConfigMap,
    title: &str,
    comment: &str,
    operator: &str,
) -> ReleaseResult<Release> {
    let release = txn.insert_release(Release {
        id: 0,
        release_key: keys::generate(&[
            namespace.app_id.as_str(),
            namespace.cluster_name.as_str(),
            namespace.namespace_name.as_str(),
        ]),
        name: title.to_string(),
        comment: comment.to_string(),
        app_id: namespace.app_id.clone(),
        cluster_name: namespace.cluster_name.clone(),
        namespace_name: namespace.namespace_name.clone(),
        namespace_id: namespace.id,
        configuration,
        created_by: operator.to_string(),
        created_at: epoch_secs(),
        abandoned: false,
        abandoned_by: None,
        abandoned_at: None,
    })?;
    lock::release_lock(txn, namespace)?;
    info!(
        namespace = %namespace.key(),
        release_id = release.id,
        release_key = %release.release_key,
        %operator,
        "release created"
    );
    Ok(release)
}

/// Release a master namespace and record it.
pub fn master_release(
    txn: &StoreTxn,
    namespace: &Namespace,
    configuration: ConfigMap,
    request: &ReleaseRequest,
    operation: ReleaseOperation,
    context: OperationContext,
) -> ReleaseResult<Release> {
    let previous_id = txn
        .latest_active_release(namespace.id)?
        .map_or(0, |release| release.id);
    let release = create_release(
        txn,
        namespace,
        configuration,
        &request.title,
        &request.comment,
        &request.operator,
    )?;
    HistoryRecord::new(namespace.key(), operation, &request.operator)
        .releases(release.id, previous_id)
        .context(context)
        .append(txn)?;
    Ok(release)
}

/// Parameters of a branch release beyond its configuration.
#[derive(Debug, Clone)]
pub struct BranchPublish<'a> {
    pub operation: ReleaseOperation,
    /// Master release the configuration was derived from.
    pub base_release_id: ReleaseId,
    pub branch_release_keys: Option<Vec<String>>,
    pub emergency: bool,
    pub title: &'a str,
    pub comment: &'a str,
    pub operator: &'a str,
}

/// Release a branch, rebind its gray rule, and record it under the
/// parent namespace.
pub fn branch_release(
    txn: &StoreTxn,
    parent: &Namespace,
    branch: &Namespace,
    configuration: ConfigMap,
    publish: BranchPublish<'_>,
) -> ReleaseResult<Release> {
    let previous_id = txn
        .latest_active_release(branch.id)?
        .map_or(0, |release| release.id);
    let release = create_release(
        txn,
        branch,
        configuration,
        publish.title,
        publish.comment,
        publish.operator,
    )?;

    let mut context = OperationContext::new()
        .base_release(publish.base_release_id)
        .emergency(publish.emergency)
        .branch_release_keys(publish.branch_release_keys);
    if let Some(rule) = branch::bind_rule_release(txn, parent, branch, release.id, publish.operator)? {
        context = context.rules(rule.rules);
    }

    HistoryRecord::new(parent.key(), publish.operation, publish.operator)
        .branch(&branch.cluster_name)
        .releases(release.id, previous_id)
        .context(context)
        .append(txn)?;
    Ok(release)
}

/// What moved the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeTrigger<'a> {
    Publish {
        emergency: bool,
        title: &'a str,
        comment: &'a str,
    },
    Rollback,
}

/// Re-derive the branch release after the master changed from `old_master`
/// to `new_master`. The branch's overrides are carried over; nothing is
/// released when the result equals the branch's current configuration.
pub fn cascade_to_branch(
    txn: &StoreTxn,
    parent: &Namespace,
    branch: &Namespace,
    old_master: Option<&ConfigMap>,
    new_master: &Release,
    trigger: CascadeTrigger<'_>,
    operator: &str,
) -> ReleaseResult<Option<Release>> {
    let (branch_config, branch_keys) = match txn.latest_active_release(branch.id)? {
        Some(current) => (
            current.configuration,
            history::branch_release_keys(txn, current.id)?,
        ),
        None => (ConfigMap::new(), None),
    };

    let target = merge::child_configuration(
        &new_master.configuration,
        &branch_config,
        old_master,
        branch_keys.as_deref(),
    );
    if target == branch_config {
        debug!(branch = %branch.cluster_name, master_release_id = new_master.id, "branch already up to date");
        return Ok(None);
    }

    let rollback_title;
    let (operation, emergency, title, comment) = match trigger {
        CascadeTrigger::Publish {
            emergency,
            title,
            comment,
        } => (
            ReleaseOperation::MasterNormalReleaseMergeToGray,
            emergency,
            title,
            comment,
        ),
        CascadeTrigger::Rollback => {
            rollback_title = format!("{}-master-rollback-merge-to-gray", keys::timestamp());
            (
                ReleaseOperation::MasterRollbackMergeToGray,
                false,
                rollback_title.as_str(),
                "",
            )
        }
    };

    let release = branch_release(
        txn,
        parent,
        branch,
        target,
        BranchPublish {
            operation,
            base_release_id: new_master.id,
            branch_release_keys: branch_keys,
            emergency,
            title,
            comment,
            operator,
        },
    )?;
    info!(
        branch = %branch.cluster_name,
        release_id = release.id,
        master_release_id = new_master.id,
        operation = ?operation,
        "branch re-derived from master"
    );
    Ok(Some(release))
}
