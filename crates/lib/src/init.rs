//! Initialize the configuration directory: create ~/.wellchat, a default config, and the state file's directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the parent directory of the resolved state file.
///
/// Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let state_path = config::resolve_state_path(&config, config_path);
    if let Some(state_dir) = state_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !state_dir.exists() {
            std::fs::create_dir_all(state_dir)
                .with_context(|| format!("creating state directory {}", state_dir.display()))?;
            log::info!("created state directory at {}", state_dir.display());
        }
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_config_and_state_dir_once() {
        let dir = std::env::temp_dir().join(format!("wellchat-init-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&config_path, br#"{"storage":{"path":"data/state.json"}}"#).unwrap();

        let out = init_config_dir(&config_path).unwrap();
        assert_eq!(out, dir);
        assert!(dir.join("data").is_dir());
        // existing config is left alone
        let s = std::fs::read_to_string(&config_path).unwrap();
        assert!(s.contains("data/state.json"));

        let fresh = dir.join("nested").join("config.json");
        init_config_dir(&fresh).unwrap();
        assert_eq!(std::fs::read_to_string(&fresh).unwrap(), "{}");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
