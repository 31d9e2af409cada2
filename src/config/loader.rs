//! Config file loader and serialization.

use super::DeployConfig;
use crate::error::ConfigError;
use crate::models::AuthMode;
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "terrarium.toml";

/// Get the global config path: ~/.config/terrarium/terrarium.toml
pub fn get_global_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;
    Ok(home.join(".config/terrarium").join(CONFIG_FILE_NAME))
}

/// Load config from a TOML file.
pub fn load_config_from_file(path: &Path) -> Result<DeployConfig, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.display().to_string())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: DeployConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save config to a TOML file.
pub fn save_config_to_file(config: &DeployConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| ConfigError::ValidationFailed(format!("Failed to serialize config: {}", e)))?;
    fs::write(path, content)?;
    Ok(())
}

/// Resolve and load the effective config.
///
/// An explicit path must exist. Otherwise `./terrarium.toml`, then the global
/// file, are tried; with neither present the defaults are used.
pub fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<DeployConfig, ConfigError> {
    if let Some(path) = explicit {
        log::debug!("[Config] Loading {}", path.display());
        return load_config_from_file(path);
    }

    let mut candidates = vec![cwd.join(CONFIG_FILE_NAME)];
    if let Ok(global) = get_global_config_path() {
        candidates.push(global);
    }

    for candidate in candidates {
        if candidate.is_file() {
            log::debug!("[Config] Loading {}", candidate.display());
            return load_config_from_file(&candidate);
        }
    }

    log::debug!("[Config] No config file found, using defaults");
    Ok(DeployConfig::default())
}

/// Apply `VAULT_ADDR`, `VAULT_TOKEN`, `TERRARIUM_AUTH_MODE` and `TERRARIUM_NAMESPACE`.
///
/// `lookup` is `std::env::var` in production.
pub fn apply_env_overrides<F>(config: &mut DeployConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("VAULT_ADDR").filter(|v| !v.is_empty()) {
        config.vault.addr = addr.trim_end_matches('/').to_string();
    }
    if let Some(token) = lookup("VAULT_TOKEN").filter(|v| !v.is_empty()) {
        config.vault.token = token;
    }
    if let Some(mode) = lookup("TERRARIUM_AUTH_MODE").filter(|v| !v.is_empty()) {
        config.vault.auth_mode = mode
            .parse::<AuthMode>()
            .map_err(ConfigError::ValidationFailed)?;
    }
    if let Some(ns) = lookup("TERRARIUM_NAMESPACE").filter(|v| !v.is_empty()) {
        config.namespace = ns;
    }
    config.validate()
}

/// Validate config path (.toml extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }
    match path.extension() {
        Some(ext) if ext == "toml" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .toml extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .toml extension".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("terrarium.toml");
        fs::write(
            &path,
            r#"
namespace = "staging"

[vault]
addr = "http://vault.internal:8200"
health_attempts = 5
"#,
        )
        .unwrap();

        let config = load_config_from_file(&path).unwrap();
        assert_eq!(config.namespace, "staging");
        assert_eq!(config.vault.addr, "http://vault.internal:8200");
        assert_eq!(config.vault.health_attempts, 5);
        assert_eq!(config.vault.token, "root");
        assert_eq!(config.images.len(), 4);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("terrarium.toml");
        let mut original = DeployConfig::default();
        original.namespace = "qa".to_string();
        original.vault.auth_mode = AuthMode::Static;

        save_config_to_file(&original, &path).unwrap();
        let loaded = load_config_from_file(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_config(Some(&temp_dir.path().join("nope.toml")), temp_dir.path());
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "namespace = [").unwrap();
        assert!(matches!(
            load_config_from_file(&path),
            Err(ConfigError::InvalidToml(_))
        ));
    }

    #[test]
    fn test_wrong_extension_rejected() {
        assert!(validate_config_path(Path::new("config.json")).is_err());
        assert!(validate_config_path(Path::new("config")).is_err());
        assert!(validate_config_path(Path::new("terrarium.toml")).is_ok());
    }

    #[test]
    fn test_env_overrides_applied() {
        let env: HashMap<&str, &str> = [
            ("VAULT_ADDR", "http://127.0.0.1:18200/"),
            ("VAULT_TOKEN", "s.dev"),
            ("TERRARIUM_AUTH_MODE", "rbac"),
            ("TERRARIUM_NAMESPACE", "edge-dev"),
        ]
        .into_iter()
        .collect();

        let mut config = DeployConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.vault.addr, "http://127.0.0.1:18200");
        assert_eq!(config.vault.token, "s.dev");
        assert_eq!(config.vault.auth_mode, AuthMode::Rbac);
        assert_eq!(config.namespace, "edge-dev");
    }

    #[test]
    fn test_bad_auth_mode_env_rejected() {
        let mut config = DeployConfig::default();
        let result = apply_env_overrides(&mut config, |k| {
            (k == "TERRARIUM_AUTH_MODE").then(|| "sometimes".to_string())
        });
        assert!(result.is_err());
    }
}
