//! Secret set written into Vault during provisioning.
//!
//! Read from `configs/vault-secrets.json`:
//!
//! ```json
//! { "secrets": { "custom-client/config": { "api_key": "..." } } }
//! ```
//!
//! A missing or unparseable file falls back to the built-in development set.

use crate::error::ConfigError;
use crate::models::SecretRecord;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SecretsFile {
    #[serde(default)]
    secrets: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

/// Parse a secrets document. Non-string values are stored as their JSON text.
pub fn parse_secrets(content: &str) -> Result<Vec<SecretRecord>, ConfigError> {
    let file: SecretsFile = serde_json::from_str(content)?;
    let records = file
        .secrets
        .into_iter()
        .map(|(path, values)| SecretRecord {
            path,
            data: values
                .into_iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, value)
                })
                .collect(),
        })
        .collect();
    Ok(records)
}

/// Load from `path`, falling back to [`default_secrets`] with a warning.
pub fn load_secrets(path: &Path) -> Vec<SecretRecord> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!(
                "[Vault] Secrets file {} not found, using built-in development secrets",
                path.display()
            );
            return default_secrets();
        }
        Err(e) => {
            log::warn!(
                "[Vault] Cannot read {}: {}, using built-in development secrets",
                path.display(),
                e
            );
            return default_secrets();
        }
    };

    match parse_secrets(&content) {
        Ok(records) if !records.is_empty() => {
            log::debug!("[Vault] Loaded {} secret(s) from {}", records.len(), path.display());
            records
        }
        Ok(_) => {
            log::warn!(
                "[Vault] {} defines no secrets, using built-in development secrets",
                path.display()
            );
            default_secrets()
        }
        Err(e) => {
            log::warn!(
                "[Vault] Invalid secrets file {}: {}, using built-in development secrets",
                path.display(),
                e
            );
            default_secrets()
        }
    }
}

/// Development secrets the sample services expect.
pub fn default_secrets() -> Vec<SecretRecord> {
    vec![
        SecretRecord::new("custom-client/config")
            .with("api_key", "mock-api-key-12345")
            .with("database_url", "postgresql://user:pass@db:5432/app")
            .with("jwt_secret", "mock-jwt-secret-67890")
            .with("encryption_key", "mock-encryption-key-abcdef")
            .with("log_level", "INFO")
            .with("max_connections", "100"),
        SecretRecord::new("custom-client/external-apis")
            .with("file_storage_url", "http://file-storage:9000")
            .with("logthon_url", "http://logthon:5000"),
        SecretRecord::new("terrarium/tls")
            .with("cert", "mock-tls-cert")
            .with("key", "mock-tls-key"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stringifies_numbers() {
        let records = parse_secrets(
            r#"{"secrets": {"app/config": {"name": "x", "max_connections": 100, "debug": true}}}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "app/config");
        assert_eq!(records[0].data["max_connections"], "100");
        assert_eq!(records[0].data["debug"], "true");
        assert_eq!(records[0].data["name"], "x");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let temp = tempfile::tempdir().unwrap();
        let records = load_secrets(&temp.path().join("vault-secrets.json"));
        assert_eq!(records, default_secrets());
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("vault-secrets.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_secrets(&path), default_secrets());
    }

    #[test]
    fn test_valid_file_is_used() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("vault-secrets.json");
        std::fs::write(&path, r#"{"secrets": {"svc/a": {"k": "v"}}}"#).unwrap();
        let records = load_secrets(&path);
        assert_eq!(records, vec![SecretRecord::new("svc/a").with("k", "v")]);
    }

    #[test]
    fn test_defaults_include_tls_path() {
        assert!(default_secrets().iter().any(|s| s.path == "terrarium/tls"));
    }
}
