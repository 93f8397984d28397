//! Gray branch lifecycle: creation, targeting rules, teardown.
//!
//! A master namespace has at most one branch. The branch shares the
//! master's app and namespace name; its cluster name is a generated branch
//! name. Targeting rules are versioned rows keyed by the master's
//! (app, cluster, namespace) plus the branch name.

use tracing::info;

use confgrid_core::{
    BranchStatus, GrayReleaseRule, GrayRuleItem, Namespace, OperationContext, ReleaseId,
    ReleaseOperation, epoch_secs, keys,
};
use confgrid_state::{StateRead, StoreTxn};

use crate::error::{ReleaseError, ReleaseResult};
use crate::history::HistoryRecord;

/// Create the branch of `parent`.
pub fn create_branch(txn: &StoreTxn, parent: &Namespace, operator: &str) -> ReleaseResult<Namespace> {
    if parent.is_branch() {
        return Err(ReleaseError::bad_request(format!(
            "{} is a branch; only master namespaces can be branched",
            parent.key()
        )));
    }
    if txn.branch_of(parent.id)?.is_some() {
        return Err(ReleaseError::bad_request(format!(
            "namespace {} already has branch",
            parent.key()
        )));
    }

    let branch_name = keys::generate(&[
        parent.app_id.as_str(),
        parent.cluster_name.as_str(),
        parent.namespace_name.as_str(),
    ]);
    let branch = txn.insert_namespace(Namespace::branch_of(parent, &branch_name, operator))?;
    info!(parent = %parent.key(), branch = %branch_name, %operator, "branch created");
    Ok(branch)
}

/// The branch of `parent` named `branch_name`.
pub fn require_branch(
    reader: &impl StateRead,
    parent: &Namespace,
    branch_name: &str,
) -> ReleaseResult<Namespace> {
    reader
        .branch_of(parent.id)?
        .filter(|branch| branch.cluster_name == branch_name)
        .ok_or_else(|| {
            ReleaseError::not_found(format!("branch {branch_name} of {}", parent.key()))
        })
}

fn latest_release_id(reader: &impl StateRead, namespace: &Namespace) -> ReleaseResult<ReleaseId> {
    Ok(reader
        .latest_active_release(namespace.id)?
        .map_or(0, |release| release.id))
}

/// Point the branch's current rule at `release_id` by writing a new rule
/// version. A branch without rules gets none.
pub fn bind_rule_release(
    txn: &StoreTxn,
    parent: &Namespace,
    branch: &Namespace,
    release_id: ReleaseId,
    operator: &str,
) -> ReleaseResult<Option<GrayReleaseRule>> {
    let Some(current) = txn.current_gray_rule(&parent.key(), &branch.cluster_name)? else {
        return Ok(None);
    };
    let rule = txn.insert_gray_rule(GrayReleaseRule {
        id: 0,
        release_id,
        branch_status: BranchStatus::Active,
        created_by: operator.to_string(),
        created_at: epoch_secs(),
        ..current
    })?;
    Ok(Some(rule))
}

/// Replace the branch's targeting rules.
pub fn update_rules(
    txn: &StoreTxn,
    parent: &Namespace,
    branch: &Namespace,
    rules: Vec<GrayRuleItem>,
    operator: &str,
) -> ReleaseResult<GrayReleaseRule> {
    let parent_key = parent.key();
    let old_rules = txn
        .current_gray_rule(&parent_key, &branch.cluster_name)?
        .map(|rule| rule.rules)
        .unwrap_or_default();
    let release_id = latest_release_id(txn, branch)?;

    let rule = txn.insert_gray_rule(GrayReleaseRule {
        id: 0,
        app_id: parent.app_id.clone(),
        cluster_name: parent.cluster_name.clone(),
        namespace_name: parent.namespace_name.clone(),
        branch_name: branch.cluster_name.clone(),
        rules: rules.clone(),
        release_id,
        branch_status: BranchStatus::Active,
        created_by: operator.to_string(),
        created_at: epoch_secs(),
    })?;

    HistoryRecord::new(parent_key, ReleaseOperation::ApplyGrayRules, operator)
        .branch(&branch.cluster_name)
        .releases(release_id, release_id)
        .context(OperationContext::new().rules(rules).old_rules(old_rules))
        .append(txn)?;
    info!(branch = %branch.cluster_name, rule_id = rule.id, %operator, "gray rules updated");
    Ok(rule)
}

/// Tear a branch down: a rule tombstone with the final `status`, removal of
/// the branch namespace, and a history row.
pub fn delete_branch(
    txn: &StoreTxn,
    parent: &Namespace,
    branch: &Namespace,
    status: BranchStatus,
    operator: &str,
) -> ReleaseResult<()> {
    let operation = match status {
        BranchStatus::Merged => ReleaseOperation::GrayReleaseDeletedAfterMerge,
        BranchStatus::Deleted => ReleaseOperation::AbandonGrayRelease,
        BranchStatus::Active => {
            return Err(ReleaseError::bad_request(
                "a branch can only be deleted as merged or deleted",
            ));
        }
    };
    let release_id = latest_release_id(txn, branch)?;

    txn.insert_gray_rule(GrayReleaseRule {
        id: 0,
        app_id: parent.app_id.clone(),
        cluster_name: parent.cluster_name.clone(),
        namespace_name: parent.namespace_name.clone(),
        branch_name: branch.cluster_name.clone(),
        rules: Vec::new(),
        release_id,
        branch_status: status,
        created_by: operator.to_string(),
        created_at: epoch_secs(),
    })?;
    txn.remove_namespace(branch.id)?;

    HistoryRecord::new(parent.key(), operation, operator)
        .branch(&branch.cluster_name)
        .releases(release_id, release_id)
        .append(txn)?;
    info!(parent = %parent.key(), branch = %branch.cluster_name, ?status, %operator, "branch deleted");
    Ok(())
}
