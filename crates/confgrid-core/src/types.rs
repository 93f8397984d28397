//! Domain types for the confgrid release engine.
//!
//! Every type here is persisted as JSON by `confgrid-state`. Ids are `u64`
//! sequences allocated by the store; a value of `0` means "not yet stored"
//! (or, for release references, "no release").

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::configmap::ConfigMap;
use crate::context::OperationContext;

pub type NamespaceId = u64;
pub type ItemId = u64;
pub type ReleaseId = u64;
pub type RuleId = u64;
pub type HistoryId = u64;

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Namespaces ─────────────────────────────────────────────────────

/// Joins the parts of namespace and rule index keys.
pub const KEY_SEPARATOR: char = '/';

/// (appId, clusterName, namespaceName) triple naming one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceKey {
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
}

impl NamespaceKey {
    pub fn new(
        app_id: impl Into<String>,
        cluster_name: impl Into<String>,
        namespace_name: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            cluster_name: cluster_name.into(),
            namespace_name: namespace_name.into(),
        }
    }

    /// Check that each name is non-blank and free of the `/` that joins
    /// index keys, so no two keys share a `table_key`.
    pub fn validate(&self) -> Result<(), String> {
        for (field, name) in [
            ("app id", &self.app_id),
            ("cluster name", &self.cluster_name),
            ("namespace name", &self.namespace_name),
        ] {
            if name.trim().is_empty() {
                return Err(format!("{field} must not be blank"));
            }
            if name.contains(KEY_SEPARATOR) {
                return Err(format!("{field} {name:?} must not contain '{KEY_SEPARATOR}'"));
            }
        }
        Ok(())
    }

    /// Index key: `{app}/{cluster}/{namespace}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}/{}", self.app_id, self.cluster_name, self.namespace_name)
    }

    /// Change-notification key: `{app}+{cluster}+{namespace}`.
    pub fn message_key(&self) -> String {
        format!("{}+{}+{}", self.app_id, self.cluster_name, self.namespace_name)
    }
}

impl fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_id, self.cluster_name, self.namespace_name)
    }
}

/// Whether a namespace is a root namespace or the gray branch of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NamespaceScope {
    Master,
    Branch { parent_id: NamespaceId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: NamespaceId,
    pub app_id: String,
    /// For a branch this is the generated branch name.
    pub cluster_name: String,
    pub namespace_name: String,
    pub scope: NamespaceScope,
    pub created_by: String,
    pub created_at: u64,
}

impl Namespace {
    pub fn master(key: &NamespaceKey, operator: &str) -> Self {
        Self {
            id: 0,
            app_id: key.app_id.clone(),
            cluster_name: key.cluster_name.clone(),
            namespace_name: key.namespace_name.clone(),
            scope: NamespaceScope::Master,
            created_by: operator.to_string(),
            created_at: epoch_secs(),
        }
    }

    pub fn branch_of(parent: &Namespace, branch_name: &str, operator: &str) -> Self {
        Self {
            id: 0,
            app_id: parent.app_id.clone(),
            cluster_name: branch_name.to_string(),
            namespace_name: parent.namespace_name.clone(),
            scope: NamespaceScope::Branch {
                parent_id: parent.id,
            },
            created_by: operator.to_string(),
            created_at: epoch_secs(),
        }
    }

    pub fn key(&self) -> NamespaceKey {
        NamespaceKey::new(&self.app_id, &self.cluster_name, &self.namespace_name)
    }

    pub fn parent_id(&self) -> Option<NamespaceId> {
        match self.scope {
            NamespaceScope::Master => None,
            NamespaceScope::Branch { parent_id } => Some(parent_id),
        }
    }

    pub fn is_branch(&self) -> bool {
        self.parent_id().is_some()
    }
}

// ── Items ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub namespace_id: NamespaceId,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub comment: String,
    pub line_num: u32,
    #[serde(default)]
    pub deleted: bool,
    pub created_by: String,
    pub modified_by: String,
    pub updated_at: u64,
}

/// A requested item value, used for creates and updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Explicit position; creates without one are appended.
    #[serde(default)]
    pub line_num: Option<u32>,
}

impl ItemDraft {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            comment: None,
            line_num: None,
        }
    }
}

/// Batch of item edits applied to one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChangeSet {
    #[serde(default)]
    pub create_items: Vec<ItemDraft>,
    #[serde(default)]
    pub update_items: Vec<ItemDraft>,
    /// Keys to delete.
    #[serde(default)]
    pub delete_items: Vec<String>,
}

impl ItemChangeSet {
    pub fn is_empty(&self) -> bool {
        self.create_items.is_empty() && self.update_items.is_empty() && self.delete_items.is_empty()
    }

    pub fn create(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.create_items.push(ItemDraft::new(key, value));
        self
    }

    pub fn update(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.update_items.push(ItemDraft::new(key, value));
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.delete_items.push(key.into());
        self
    }
}

// ── Locks ──────────────────────────────────────────────────────────

/// Marker that a namespace has unreleased edits by `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceLock {
    pub namespace_id: NamespaceId,
    pub owner: String,
    pub created_at: u64,
}

// ── Releases ───────────────────────────────────────────────────────

/// An immutable configuration snapshot. Only `abandoned` (and the
/// matching modifier fields) ever change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub release_key: String,
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
    pub namespace_id: NamespaceId,
    pub configuration: ConfigMap,
    pub created_by: String,
    pub created_at: u64,
    #[serde(default)]
    pub abandoned: bool,
    #[serde(default)]
    pub abandoned_by: Option<String>,
    #[serde(default)]
    pub abandoned_at: Option<u64>,
}

impl Release {
    pub fn namespace_key(&self) -> NamespaceKey {
        NamespaceKey::new(&self.app_id, &self.cluster_name, &self.namespace_name)
    }
}

/// Caller-supplied metadata for a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub title: String,
    #[serde(default)]
    pub comment: String,
    pub operator: String,
    /// Bypasses the self-approval lock check.
    #[serde(default)]
    pub emergency: bool,
}

impl ReleaseRequest {
    pub fn new(title: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            comment: String::new(),
            operator: operator.into(),
            emergency: false,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn emergency(mut self, emergency: bool) -> Self {
        self.emergency = emergency;
        self
    }
}

// ── Gray rules ─────────────────────────────────────────────────────

/// Wildcard entry in a rule's IP list.
pub const ALL_IP: &str = "*";

/// One targeting entry: a client app and the IPs within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrayRuleItem {
    pub client_app_id: String,
    pub client_ip_list: BTreeSet<String>,
}

impl GrayRuleItem {
    pub fn new<I, S>(client_app_id: impl Into<String>, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client_app_id: client_app_id.into(),
            client_ip_list: ips.into_iter().map(Into::into).collect(),
        }
    }

    /// App ids compare case-insensitively; `*` matches every IP.
    pub fn matches(&self, client_app_id: &str, client_ip: &str) -> bool {
        self.client_app_id.eq_ignore_ascii_case(client_app_id)
            && (self.client_ip_list.contains(ALL_IP) || self.client_ip_list.contains(client_ip))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Deleted,
    Active,
    Merged,
}

impl BranchStatus {
    pub fn code(self) -> u8 {
        match self {
            BranchStatus::Deleted => 0,
            BranchStatus::Active => 1,
            BranchStatus::Merged => 2,
        }
    }
}

/// One immutable version of a branch's targeting rules. The row with the
/// highest id for a (namespace, branch) pair is the current rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrayReleaseRule {
    pub id: RuleId,
    pub app_id: String,
    /// The parent (master) cluster.
    pub cluster_name: String,
    pub namespace_name: String,
    pub branch_name: String,
    pub rules: Vec<GrayRuleItem>,
    /// Branch release served to matching clients; `0` before the first
    /// gray publish.
    pub release_id: ReleaseId,
    pub branch_status: BranchStatus,
    pub created_by: String,
    pub created_at: u64,
}

impl GrayReleaseRule {
    /// Index key: `{app}/{cluster}/{namespace}/{branch}`.
    pub fn table_key(&self) -> String {
        rule_key(
            &NamespaceKey::new(&self.app_id, &self.cluster_name, &self.namespace_name),
            &self.branch_name,
        )
    }

    pub fn matches(&self, client_app_id: &str, client_ip: &str) -> bool {
        self.branch_status == BranchStatus::Active
            && self.rules.iter().any(|r| r.matches(client_app_id, client_ip))
    }
}

/// Index key for the rules of `branch_name` under the master `parent`.
pub fn rule_key(parent: &NamespaceKey, branch_name: &str) -> String {
    format!("{}/{}", parent.table_key(), branch_name)
}

// ── Release history ────────────────────────────────────────────────

/// Kind of release-affecting operation. Codes are stable audit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOperation {
    NormalRelease,
    Rollback,
    GrayRelease,
    ApplyGrayRules,
    GrayReleaseMergeToMaster,
    MasterNormalReleaseMergeToGray,
    MasterRollbackMergeToGray,
    AbandonGrayRelease,
    GrayReleaseDeletedAfterMerge,
}

impl ReleaseOperation {
    /// Operations that produce a branch release.
    pub const BRANCH_RELEASES: [ReleaseOperation; 3] = [
        ReleaseOperation::GrayRelease,
        ReleaseOperation::MasterNormalReleaseMergeToGray,
        ReleaseOperation::MasterRollbackMergeToGray,
    ];

    pub fn code(self) -> u8 {
        match self {
            ReleaseOperation::NormalRelease => 0,
            ReleaseOperation::Rollback => 1,
            ReleaseOperation::GrayRelease => 2,
            ReleaseOperation::ApplyGrayRules => 3,
            ReleaseOperation::GrayReleaseMergeToMaster => 4,
            ReleaseOperation::MasterNormalReleaseMergeToGray => 5,
            ReleaseOperation::MasterRollbackMergeToGray => 6,
            ReleaseOperation::AbandonGrayRelease => 7,
            ReleaseOperation::GrayReleaseDeletedAfterMerge => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ReleaseOperation::NormalRelease,
            1 => ReleaseOperation::Rollback,
            2 => ReleaseOperation::GrayRelease,
            3 => ReleaseOperation::ApplyGrayRules,
            4 => ReleaseOperation::GrayReleaseMergeToMaster,
            5 => ReleaseOperation::MasterNormalReleaseMergeToGray,
            6 => ReleaseOperation::MasterRollbackMergeToGray,
            7 => ReleaseOperation::AbandonGrayRelease,
            8 => ReleaseOperation::GrayReleaseDeletedAfterMerge,
            _ => return None,
        })
    }
}

/// Append-only audit entry for a release-affecting operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseHistory {
    pub id: HistoryId,
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
    /// Branch name for gray events, otherwise the cluster name.
    pub branch_name: String,
    pub release_id: ReleaseId,
    pub previous_release_id: ReleaseId,
    pub operation: ReleaseOperation,
    pub context: OperationContext,
    pub operator: String,
    pub created_at: u64,
}

impl ReleaseHistory {
    pub fn namespace_key(&self) -> NamespaceKey {
        NamespaceKey::new(&self.app_id, &self.cluster_name, &self.namespace_name)
    }
}

// ── Paging ─────────────────────────────────────────────────────────

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }

    pub fn first(size: usize) -> Self {
        Self::new(0, size)
    }

    pub fn offset(&self) -> usize {
        self.number.saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(20)
    }
}
