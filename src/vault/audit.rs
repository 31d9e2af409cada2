//! Read-back audit of the secrets a deploy writes.
//!
//! Used by the `secrets` action: every expected record is read back and its
//! keys compared; values are never reported.

use super::VaultClient;
use crate::error::VaultError;
use crate::models::SecretRecord;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of comparing expected secrets with what Vault holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretAudit {
    /// Paths stored with every expected key
    pub present: Vec<String>,
    /// Paths with no secret at all
    pub missing: Vec<String>,
    /// Paths stored without some expected keys, with those keys
    pub incomplete: Vec<(String, Vec<String>)>,
    /// Keys listed under each top-level prefix
    pub stored: BTreeMap<String, Vec<String>>,
}

impl SecretAudit {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.incomplete.is_empty()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for path in &self.present {
            lines.push(format!("  [OK]      {}", path));
        }
        for (path, keys) in &self.incomplete {
            lines.push(format!("  [PARTIAL] {} (missing keys: {})", path, keys.join(", ")));
        }
        for path in &self.missing {
            lines.push(format!("  [MISSING] {}", path));
        }
        for (prefix, keys) in &self.stored {
            lines.push(format!("  {}/: {}", prefix, keys.join(" ")));
        }
        lines
    }
}

/// First path segment, the unit Vault listings are grouped by.
fn top_level(path: &str) -> &str {
    let path = path.trim_matches('/');
    path.split('/').next().unwrap_or(path)
}

/// Read back every expected secret and list the prefixes they live under.
pub async fn audit_secrets(
    vault: &VaultClient,
    expected: &[SecretRecord],
) -> Result<SecretAudit, VaultError> {
    let mut audit = SecretAudit::default();

    for record in expected {
        match vault.read_secret(&record.path).await? {
            None => audit.missing.push(record.path.clone()),
            Some(stored) => {
                let absent: Vec<String> = record
                    .data
                    .keys()
                    .filter(|k| !stored.contains_key(*k))
                    .cloned()
                    .collect();
                if absent.is_empty() {
                    audit.present.push(record.path.clone());
                } else {
                    audit.incomplete.push((record.path.clone(), absent));
                }
            }
        }
    }

    let prefixes: BTreeSet<&str> = expected.iter().map(|r| top_level(&r.path)).collect();
    for prefix in prefixes {
        let keys = vault.list_secrets(prefix).await?;
        audit.stored.insert(prefix.to_string(), keys);
    }

    Ok(audit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level() {
        assert_eq!(top_level("custom-client/config"), "custom-client");
        assert_eq!(top_level("/terrarium/tls/"), "terrarium");
        assert_eq!(top_level("flat"), "flat");
    }

    #[test]
    fn test_summary_never_shows_values() {
        let audit = SecretAudit {
            present: vec!["custom-client/config".to_string()],
            missing: vec!["terrarium/tls".to_string()],
            incomplete: vec![("logthon/config".to_string(), vec!["level".to_string()])],
            stored: BTreeMap::from([(
                "custom-client".to_string(),
                vec!["config".to_string()],
            )]),
        };
        assert!(!audit.is_complete());
        let lines = audit.summary_lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("missing keys: level"));
        assert!(lines[2].starts_with("  [MISSING]"));
        assert!(SecretAudit::default().is_complete());
    }
}
