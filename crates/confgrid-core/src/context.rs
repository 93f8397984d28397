//! Operation context attached to release history entries.

use serde::{Deserialize, Serialize};

use crate::types::{GrayRuleItem, ReleaseId};

/// Metadata recorded alongside a history entry. Absent fields are omitted
/// from the stored JSON so older readers see only the keys that were set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_release_id: Option<ReleaseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_emergency_publish: Option<bool>,
    /// Keys the branch itself defined when its release was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_release_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<GrayRuleItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_rules: Option<Vec<GrayRuleItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_release(mut self, id: ReleaseId) -> Self {
        self.base_release_id = Some(id);
        self
    }

    pub fn emergency(mut self, emergency: bool) -> Self {
        self.is_emergency_publish = Some(emergency);
        self
    }

    pub fn branch_release_keys(mut self, keys: Option<Vec<String>>) -> Self {
        self.branch_release_keys = keys;
        self
    }

    pub fn rules(mut self, rules: Vec<GrayRuleItem>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn old_rules(mut self, rules: Vec<GrayRuleItem>) -> Self {
        self.old_rules = Some(rules);
        self
    }

    pub fn source_branch(mut self, branch: impl Into<String>) -> Self {
        self.source_branch = Some(branch.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
