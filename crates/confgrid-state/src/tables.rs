//! redb table definitions for the confgrid state store.
//!
//! Row tables use `u64` ids and `&[u8]` JSON values. Index tables map
//! natural keys to ids, or hold `(owner_id, row_id)` tuple keys so that a
//! range scan yields one owner's rows in id order.

use redb::TableDefinition;

/// Namespaces keyed by id.
pub const NAMESPACES: TableDefinition<u64, &[u8]> = TableDefinition::new("namespaces");

/// `{app}/{cluster}/{namespace}` → namespace id.
pub const NAMESPACE_INDEX: TableDefinition<&str, u64> = TableDefinition::new("namespace_index");

/// Master namespace id → its branch namespace id.
pub const BRANCH_INDEX: TableDefinition<u64, u64> = TableDefinition::new("branch_index");

/// Items keyed by `(namespace_id, item_id)`.
pub const ITEMS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("items");

/// Namespace locks keyed by namespace id.
pub const NAMESPACE_LOCKS: TableDefinition<u64, &[u8]> = TableDefinition::new("namespace_locks");

/// Releases keyed by id.
pub const RELEASES: TableDefinition<u64, &[u8]> = TableDefinition::new("releases");

/// `(namespace_id, release_id)` → whether the release is still active.
pub const NAMESPACE_RELEASES: TableDefinition<(u64, u64), bool> =
    TableDefinition::new("namespace_releases");

/// Release key → release id.
pub const RELEASE_KEYS: TableDefinition<&str, u64> = TableDefinition::new("release_keys");

/// Gray release rule versions keyed by id.
pub const GRAY_RULES: TableDefinition<u64, &[u8]> = TableDefinition::new("gray_release_rules");

/// `{app}/{cluster}/{namespace}/{branch}` → id of the latest rule version.
pub const GRAY_RULE_INDEX: TableDefinition<&str, u64> = TableDefinition::new("gray_rule_index");

/// Release history keyed by id.
pub const RELEASE_HISTORY: TableDefinition<u64, &[u8]> = TableDefinition::new("release_history");

/// `(release_id, history_id)` → operation code.
pub const HISTORY_BY_RELEASE: TableDefinition<(u64, u64), u8> =
    TableDefinition::new("history_by_release");

/// `(previous_release_id, history_id)` → operation code.
pub const HISTORY_BY_PREVIOUS: TableDefinition<(u64, u64), u8> =
    TableDefinition::new("history_by_previous");

/// Sequence name → last allocated id.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const SEQ_NAMESPACES: &str = "namespaces";
pub const SEQ_ITEMS: &str = "items";
pub const SEQ_RELEASES: &str = "releases";
pub const SEQ_GRAY_RULES: &str = "gray_release_rules";
pub const SEQ_HISTORY: &str = "release_history";
