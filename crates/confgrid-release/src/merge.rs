//! Configuration arithmetic for gray branches.
//!
//! A branch release is its master's configuration with the branch's own
//! overrides laid on top. When the master moves, the overrides are
//! recovered from the current branch release and re-applied to the new
//! master configuration.

use confgrid_core::ConfigMap;

/// Branch configuration for a gray publish: `parent` overlaid with
/// `branch_items`, where keys in `excluded` stop being overridden and fall
/// back to the parent's value (or disappear if the parent lacks them).
pub fn gray_configuration(
    parent: &ConfigMap,
    branch_items: &ConfigMap,
    excluded: &[String],
) -> ConfigMap {
    let overrides: ConfigMap = branch_items
        .iter()
        .filter(|(key, _)| !excluded.iter().any(|ex| ex == key))
        .collect();
    parent.overlay(&overrides)
}

/// The entries of `branch_config` that the branch overrides.
///
/// With `branch_keys` the answer is exact. Without them (branch releases
/// recorded before the keys were tracked) overrides are inferred by
/// comparing against the previous master configuration, which misses an
/// override whose value happens to equal the master's.
pub fn branch_modified_items(
    branch_config: &ConfigMap,
    old_master: Option<&ConfigMap>,
    branch_keys: Option<&[String]>,
) -> ConfigMap {
    if branch_config.is_empty() {
        return ConfigMap::new();
    }

    if let Some(keys) = branch_keys {
        return keys
            .iter()
            .filter_map(|key| branch_config.get(key).map(|value| (key.as_str(), value)))
            .collect();
    }

    match old_master {
        Some(master) if !master.is_empty() => branch_config
            .iter()
            .filter(|(key, value)| master.get(key) != Some(*value))
            .collect(),
        _ => branch_config.clone(),
    }
}

/// Branch configuration after the master changed to `new_master`.
pub fn child_configuration(
    new_master: &ConfigMap,
    branch_config: &ConfigMap,
    old_master: Option<&ConfigMap>,
    branch_keys: Option<&[String]>,
) -> ConfigMap {
    new_master.overlay(&branch_modified_items(branch_config, old_master, branch_keys))
}
