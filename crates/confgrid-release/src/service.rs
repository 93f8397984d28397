//! The orchestrator's public API.
//!
//! Each mutating method runs in a single store transaction; on error the
//! transaction is aborted and nothing is written. The affected master
//! namespace is announced once, after commit.

use std::sync::Arc;

use tracing::{info, warn};

use confgrid_core::{
    BranchStatus, ConfgridConfig, ConfigMap, GrayReleaseRule, GrayRuleItem, Item, ItemChangeSet,
    Namespace, NamespaceKey, NamespaceLock, OperationContext, Page, Release, ReleaseHistory,
    ReleaseId, ReleaseOperation, ReleaseRequest,
};
use confgrid_state::{StateRead, StateStore, StoreTxn};

use crate::branch;
use crate::error::{ReleaseError, ReleaseResult};
use crate::history::HistoryRecord;
use crate::items;
use crate::lock;
use crate::merge;
use crate::notify::{ReleaseMessage, ReleaseNotifier};
use crate::publish::{self, BranchPublish, CascadeTrigger};

/// Behavior switches for the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// Take the namespace lock on edits.
    pub lock_enabled: bool,
}

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self { lock_enabled: true }
    }
}

impl From<&ConfgridConfig> for ReleaseOptions {
    fn from(config: &ConfgridConfig) -> Self {
        Self {
            lock_enabled: config.lock.enabled,
        }
    }
}

/// Release orchestrator over a [`StateStore`].
#[derive(Clone)]
pub struct ReleaseService {
    store: StateStore,
    notifier: Arc<dyn ReleaseNotifier>,
    options: ReleaseOptions,
}

fn require_namespace(reader: &impl StateRead, key: &NamespaceKey) -> ReleaseResult<Namespace> {
    reader
        .find_namespace(key)?
        .ok_or_else(|| ReleaseError::not_found(format!("namespace {key}")))
}

fn require_master(reader: &impl StateRead, key: &NamespaceKey) -> ReleaseResult<Namespace> {
    let namespace = require_namespace(reader, key)?;
    if namespace.is_branch() {
        return Err(ReleaseError::bad_request(format!(
            "{key} is a branch, expected a master namespace"
        )));
    }
    Ok(namespace)
}

fn require_parent(reader: &impl StateRead, branch: &Namespace) -> ReleaseResult<Namespace> {
    let parent_id = branch.parent_id().ok_or_else(|| {
        ReleaseError::bad_request(format!("{} is not a branch", branch.key()))
    })?;
    reader
        .namespace(parent_id)?
        .ok_or_else(|| ReleaseError::not_found(format!("parent namespace {parent_id}")))
}

fn require_release(reader: &impl StateRead, id: ReleaseId) -> ReleaseResult<Release> {
    reader
        .release(id)?
        .ok_or_else(|| ReleaseError::not_found(format!("release {id}")))
}

/// The master namespace whose subscribers must hear about `namespace`.
fn announced_key(reader: &impl StateRead, namespace: &Namespace) -> ReleaseResult<NamespaceKey> {
    match namespace.parent_id() {
        None => Ok(namespace.key()),
        Some(_) => Ok(require_parent(reader, namespace)?.key()),
    }
}

/// Master publish of the namespace's current items, followed by the
/// branch cascade when a branch exists.
fn publish_master(
    txn: &StoreTxn,
    namespace: &Namespace,
    request: &ReleaseRequest,
) -> ReleaseResult<Release> {
    let configuration = items::materialize(&txn.items(namespace.id)?);
    let branch = txn.branch_of(namespace.id)?;
    let previous = match &branch {
        Some(_) => txn.latest_active_release(namespace.id)?,
        None => None,
    };

    let release = publish::master_release(
        txn,
        namespace,
        configuration,
        request,
        ReleaseOperation::NormalRelease,
        OperationContext::new().emergency(request.emergency),
    )?;

    if let Some(branch) = branch {
        publish::cascade_to_branch(
            txn,
            namespace,
            &branch,
            previous.as_ref().map(|r| &r.configuration),
            &release,
            CascadeTrigger::Publish {
                emergency: request.emergency,
                title: &request.title,
                comment: &request.comment,
            },
            &request.operator,
        )?;
    }
    Ok(release)
}

/// Gray publish: parent's active configuration overlaid with the branch
/// items, minus the overrides named in `excluded`.
fn publish_branch(
    txn: &StoreTxn,
    parent: &Namespace,
    branch: &Namespace,
    request: &ReleaseRequest,
    excluded: &[String],
) -> ReleaseResult<Release> {
    let branch_items = items::materialize(&txn.items(branch.id)?);
    let (parent_config, base_release_id) = match txn.latest_active_release(parent.id)? {
        Some(release) => (release.configuration, release.id),
        None => (ConfigMap::new(), 0),
    };

    let configuration = merge::gray_configuration(&parent_config, &branch_items, excluded);
    let branch_keys: Vec<String> = branch_items
        .keys()
        .filter(|key| !excluded.iter().any(|ex| ex == key))
        .map(str::to_string)
        .collect();

    publish::branch_release(
        txn,
        parent,
        branch,
        configuration,
        BranchPublish {
            operation: ReleaseOperation::GrayRelease,
            base_release_id,
            branch_release_keys: Some(branch_keys),
            emergency: request.emergency,
            title: &request.title,
            comment: &request.comment,
            operator: &request.operator,
        },
    )
}

impl ReleaseService {
    pub fn new(store: StateStore, notifier: Arc<dyn ReleaseNotifier>) -> Self {
        Self {
            store,
            notifier,
            options: ReleaseOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReleaseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn announce(&self, key: &NamespaceKey) {
        let message = ReleaseMessage::for_namespace(key);
        if let Err(err) = self.notifier.announce(&message) {
            warn!(message = %message.message, error = %err, "release message not delivered");
        }
    }

    // ── Namespaces ─────────────────────────────────────────────────

    pub fn create_namespace(&self, key: &NamespaceKey, operator: &str) -> ReleaseResult<Namespace> {
        key.validate().map_err(ReleaseError::bad_request)?;
        let namespace = self.store.write(|txn| -> ReleaseResult<Namespace> {
            Ok(txn.insert_namespace(Namespace::master(key, operator))?)
        })?;
        info!(namespace = %key, %operator, "namespace created");
        Ok(namespace)
    }

    pub fn find_namespace(&self, key: &NamespaceKey) -> ReleaseResult<Option<Namespace>> {
        Ok(self.store.snapshot()?.find_namespace(key)?)
    }

    // ── Items ──────────────────────────────────────────────────────

    /// Edit a namespace's items. With locking enabled the editor takes the
    /// namespace lock first, and the lock is dropped again if the edit
    /// leaves the namespace identical to its active release.
    pub fn apply_change_set(
        &self,
        key: &NamespaceKey,
        change_set: &ItemChangeSet,
        operator: &str,
    ) -> ReleaseResult<Vec<Item>> {
        self.store.write(|txn| -> ReleaseResult<_> {
            let namespace = require_namespace(txn, key)?;
            if self.options.lock_enabled {
                lock::acquire_lock(txn, &namespace, operator)?;
            }
            let items = items::apply_change_set(txn, &namespace, change_set, operator)?;
            if self.options.lock_enabled {
                lock::unlock_if_unmodified(txn, &namespace)?;
            }
            Ok(items)
        })
    }

    pub fn find_items(&self, key: &NamespaceKey) -> ReleaseResult<Vec<Item>> {
        let snapshot = self.store.snapshot()?;
        let namespace = require_namespace(&snapshot, key)?;
        Ok(snapshot.items(namespace.id)?)
    }

    pub fn find_lock(&self, key: &NamespaceKey) -> ReleaseResult<Option<NamespaceLock>> {
        let snapshot = self.store.snapshot()?;
        let namespace = require_namespace(&snapshot, key)?;
        Ok(snapshot.lock(namespace.id)?)
    }

    // ── Branches ───────────────────────────────────────────────────

    /// Create the gray branch of the master namespace `key`.
    pub fn create_branch(&self, key: &NamespaceKey, operator: &str) -> ReleaseResult<Namespace> {
        self.store.write(|txn| -> ReleaseResult<_> {
            let parent = require_namespace(txn, key)?;
            branch::create_branch(txn, &parent, operator)
        })
    }

    pub fn find_branch(&self, key: &NamespaceKey) -> ReleaseResult<Option<Namespace>> {
        let snapshot = self.store.snapshot()?;
        match snapshot.find_namespace(key)? {
            Some(parent) => Ok(snapshot.branch_of(parent.id)?),
            None => Ok(None),
        }
    }

    pub fn update_branch_rules(
        &self,
        key: &NamespaceKey,
        branch_name: &str,
        rules: Vec<GrayRuleItem>,
        operator: &str,
    ) -> ReleaseResult<GrayReleaseRule> {
        let rule = self.store.write(|txn| -> ReleaseResult<_> {
            let parent = require_master(txn, key)?;
            let branch = branch::require_branch(txn, &parent, branch_name)?;
            branch::update_rules(txn, &parent, &branch, rules, operator)
        })?;
        self.announce(key);
        Ok(rule)
    }

    pub fn current_gray_rule(
        &self,
        key: &NamespaceKey,
        branch_name: &str,
    ) -> ReleaseResult<Option<GrayReleaseRule>> {
        Ok(self.store.snapshot()?.current_gray_rule(key, branch_name)?)
    }

    /// Tear a branch down with the final `status` (`Deleted` when abandoned,
    /// `Merged` after a merge done elsewhere). Returns false if the master
    /// has no branch by that name.
    pub fn delete_branch(
        &self,
        key: &NamespaceKey,
        branch_name: &str,
        status: BranchStatus,
        operator: &str,
    ) -> ReleaseResult<bool> {
        let deleted = self.store.write(|txn| -> ReleaseResult<bool> {
            let parent = require_master(txn, key)?;
            let Some(branch) = txn
                .branch_of(parent.id)?
                .filter(|branch| branch.cluster_name == branch_name)
            else {
                return Ok(false);
            };
            branch::delete_branch(txn, &parent, &branch, status, operator)?;
            Ok(true)
        })?;
        if deleted {
            self.announce(key);
        }
        Ok(deleted)
    }

    // ── Releases ───────────────────────────────────────────────────

    /// Release the namespace's current items. Publishing a branch
    /// namespace performs a gray publish of it.
    pub fn publish(&self, key: &NamespaceKey, request: &ReleaseRequest) -> ReleaseResult<Release> {
        let (release, announce) = self.store.write(|txn| -> ReleaseResult<_> {
            let namespace = require_namespace(txn, key)?;
            lock::check_lock(txn, &namespace, request.emergency, &request.operator)?;
            if namespace.is_branch() {
                let parent = require_parent(txn, &namespace)?;
                let release = publish_branch(txn, &parent, &namespace, request, &[])?;
                Ok((release, parent.key()))
            } else {
                Ok((publish_master(txn, &namespace, request)?, namespace.key()))
            }
        })?;
        self.announce(&announce);
        Ok(release)
    }

    /// Gray publish of the branch `branch_name` of the master `key`.
    /// Keys in `excluded_keys` are no longer overridden by the branch.
    pub fn publish_gray(
        &self,
        key: &NamespaceKey,
        branch_name: &str,
        request: &ReleaseRequest,
        excluded_keys: Option<&[String]>,
    ) -> ReleaseResult<Release> {
        let release = self.store.write(|txn| -> ReleaseResult<_> {
            let parent = require_master(txn, key)?;
            let branch = branch::require_branch(txn, &parent, branch_name)?;
            lock::check_lock(txn, &branch, request.emergency, &request.operator)?;
            publish_branch(txn, &parent, &branch, request, excluded_keys.unwrap_or(&[]))
        })?;
        self.announce(key);
        Ok(release)
    }

    /// Apply `change_set` to the master and release it as a merge of the
    /// branch. The branch is then deleted, or re-derived from the new
    /// master when kept.
    pub fn merge_branch_to_master(
        &self,
        key: &NamespaceKey,
        branch_name: &str,
        change_set: &ItemChangeSet,
        request: &ReleaseRequest,
        delete_branch: bool,
    ) -> ReleaseResult<Release> {
        let release = self.store.write(|txn| -> ReleaseResult<Release> {
            let parent = require_master(txn, key)?;
            let branch = branch::require_branch(txn, &parent, branch_name)?;
            lock::check_lock(txn, &parent, request.emergency, &request.operator)?;

            items::apply_change_set(txn, &parent, change_set, &request.operator)?;
            let branch_release_id = txn
                .latest_active_release(branch.id)?
                .map_or(0, |release| release.id);
            let previous = txn.latest_active_release(parent.id)?;
            let configuration = items::materialize(&txn.items(parent.id)?);

            let release = publish::master_release(
                txn,
                &parent,
                configuration,
                request,
                ReleaseOperation::GrayReleaseMergeToMaster,
                OperationContext::new()
                    .source_branch(&branch.cluster_name)
                    .base_release(branch_release_id)
                    .emergency(request.emergency),
            )?;

            if delete_branch {
                branch::delete_branch(txn, &parent, &branch, BranchStatus::Merged, &request.operator)?;
            } else {
                publish::cascade_to_branch(
                    txn,
                    &parent,
                    &branch,
                    previous.as_ref().map(|r| &r.configuration),
                    &release,
                    CascadeTrigger::Publish {
                        emergency: request.emergency,
                        title: &request.title,
                        comment: &request.comment,
                    },
                    &request.operator,
                )?;
            }
            info!(namespace = %key, branch = %branch_name, release_id = release.id, delete_branch, "branch merged to master");
            Ok(release)
        })?;
        self.announce(key);
        Ok(release)
    }

    /// Abandon the namespace's latest active release, making the one before
    /// it active again. Returns the abandoned release.
    pub fn rollback(&self, release_id: ReleaseId, operator: &str) -> ReleaseResult<Release> {
        let (abandoned, announce) = self.store.write(|txn| -> ReleaseResult<_> {
            let release = require_release(txn, release_id)?;
            if release.abandoned {
                return Err(ReleaseError::bad_request(format!(
                    "release {release_id} is not active"
                )));
            }
            let namespace = txn
                .namespace(release.namespace_id)?
                .ok_or_else(|| ReleaseError::not_found(format!("namespace {}", release.namespace_key())))?;

            let active = txn.latest_active_releases(namespace.id, 2)?;
            if active.len() < 2 {
                return Err(ReleaseError::bad_request(format!(
                    "namespace {} has no previous release to roll back to",
                    namespace.key()
                )));
            }
            if active[0].id != release.id {
                return Err(ReleaseError::bad_request(format!(
                    "release {release_id} is not the latest active release of {}",
                    namespace.key()
                )));
            }
            let restored = &active[1];

            let abandoned = txn.abandon_release(release.id, operator)?;
            HistoryRecord::new(namespace.key(), ReleaseOperation::Rollback, operator)
                .releases(restored.id, abandoned.id)
                .append(txn)?;

            if let Some(branch) = txn.branch_of(namespace.id)? {
                publish::cascade_to_branch(
                    txn,
                    &namespace,
                    &branch,
                    Some(&abandoned.configuration),
                    restored,
                    CascadeTrigger::Rollback,
                    operator,
                )?;
            }
            info!(namespace = %namespace.key(), abandoned = abandoned.id, restored = restored.id, %operator, "release rolled back");
            Ok((abandoned, announced_key(txn, &namespace)?))
        })?;
        self.announce(&announce);
        Ok(abandoned)
    }

    /// Abandon every active release newer than `to_release_id`, up to and
    /// including `release_id`, making `to_release_id` active. Returns the
    /// abandoned `release_id` release.
    pub fn rollback_to(
        &self,
        release_id: ReleaseId,
        to_release_id: ReleaseId,
        operator: &str,
    ) -> ReleaseResult<Release> {
        if release_id == to_release_id {
            return Err(ReleaseError::bad_request(
                "current release equal to target release",
            ));
        }
        let (abandoned, announce) = self.store.write(|txn| -> ReleaseResult<_> {
            let release = require_release(txn, release_id)?;
            let target = require_release(txn, to_release_id)?;
            if release.abandoned || target.abandoned {
                return Err(ReleaseError::bad_request("release is not active"));
            }
            if release.namespace_id != target.namespace_id {
                return Err(ReleaseError::bad_request(
                    "releases belong to different namespaces",
                ));
            }
            if target.id > release.id {
                return Err(ReleaseError::bad_request(
                    "target release is newer than the release to roll back",
                ));
            }
            let namespace = txn
                .namespace(release.namespace_id)?
                .ok_or_else(|| ReleaseError::not_found(format!("namespace {}", release.namespace_key())))?;
            let latest = txn.latest_active_release(namespace.id)?;
            if latest.map(|r| r.id) != Some(release.id) {
                return Err(ReleaseError::bad_request(format!(
                    "release {release_id} is not the latest active release of {}",
                    namespace.key()
                )));
            }

            let mut abandoned = None;
            for stale in txn.active_releases_between(namespace.id, target.id + 1, release.id)? {
                let stale = txn.abandon_release(stale.id, operator)?;
                if stale.id == release.id {
                    abandoned = Some(stale);
                }
            }
            let abandoned = abandoned.ok_or_else(|| {
                ReleaseError::not_found(format!("active release {release_id}"))
            })?;

            HistoryRecord::new(namespace.key(), ReleaseOperation::Rollback, operator)
                .releases(target.id, abandoned.id)
                .append(txn)?;

            if let Some(branch) = txn.branch_of(namespace.id)? {
                publish::cascade_to_branch(
                    txn,
                    &namespace,
                    &branch,
                    Some(&abandoned.configuration),
                    &target,
                    CascadeTrigger::Rollback,
                    operator,
                )?;
            }
            info!(namespace = %namespace.key(), from = release_id, to = to_release_id, %operator, "releases rolled back");
            Ok((abandoned, announced_key(txn, &namespace)?))
        })?;
        self.announce(&announce);
        Ok(abandoned)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn find_active_release(&self, key: &NamespaceKey) -> ReleaseResult<Option<Release>> {
        let snapshot = self.store.snapshot()?;
        match snapshot.find_namespace(key)? {
            Some(namespace) => Ok(snapshot.latest_active_release(namespace.id)?),
            None => Ok(None),
        }
    }

    pub fn find_release(&self, id: ReleaseId) -> ReleaseResult<Option<Release>> {
        Ok(self.store.snapshot()?.release(id)?)
    }

    pub fn find_releases_by_keys(&self, release_keys: &[String]) -> ReleaseResult<Vec<Release>> {
        let snapshot = self.store.snapshot()?;
        let mut releases = Vec::new();
        for release_key in release_keys {
            if let Some(release) = snapshot.release_by_key(release_key)? {
                releases.push(release);
            }
        }
        Ok(releases)
    }

    pub fn find_active_releases(&self, key: &NamespaceKey, page: Page) -> ReleaseResult<Vec<Release>> {
        self.find_releases(key, true, page)
    }

    pub fn find_all_releases(&self, key: &NamespaceKey, page: Page) -> ReleaseResult<Vec<Release>> {
        self.find_releases(key, false, page)
    }

    fn find_releases(
        &self,
        key: &NamespaceKey,
        active_only: bool,
        page: Page,
    ) -> ReleaseResult<Vec<Release>> {
        let snapshot = self.store.snapshot()?;
        match snapshot.find_namespace(key)? {
            Some(namespace) => Ok(snapshot.releases(namespace.id, active_only, page)?),
            None => Ok(Vec::new()),
        }
    }

    /// History recorded under `key`, newest first. Gray events are recorded
    /// under the master namespace with the branch name set.
    pub fn find_history(&self, key: &NamespaceKey, page: Page) -> ReleaseResult<Vec<ReleaseHistory>> {
        Ok(self.store.snapshot()?.history_for_namespace(key, page)?)
    }

    pub fn find_history_by_release(
        &self,
        release_id: ReleaseId,
        operations: &[ReleaseOperation],
    ) -> ReleaseResult<Vec<ReleaseHistory>> {
        Ok(self.store.snapshot()?.history_by_release(release_id, operations)?)
    }
}
