use std::path::Path;

use serde_json::{Value, json};

use confgrid_core::ConfgridConfig;

/// Write a confgrid.toml scaffold at `config_path`. An existing file is
/// left alone.
pub fn init(config_path: &Path, store_path: &Path) -> anyhow::Result<Value> {
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }
    let config = ConfgridConfig::scaffold(store_path);
    std::fs::write(config_path, config.to_toml_string()?)?;
    Ok(json!({
        "config": config_path.display().to_string(),
        "store": store_path.display().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_loadable_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("confgrid.toml");
        let store_path = dir.path().join("state.redb");

        init(&config_path, &store_path).unwrap();
        let config = ConfgridConfig::from_file(&config_path).unwrap();
        assert_eq!(config.store.path, store_path);
        assert!(config.lock.enabled);

        assert!(init(&config_path, &store_path).is_err());
    }
}
