//! Manifest discovery and apply ordering.
//!
//! Storage claims must exist before pods are scheduled and config before the
//! deployments that mount it, so manifests are grouped by file name and each
//! group is applied in sorted order.

use std::path::{Path, PathBuf};

/// Apply groups, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ManifestGroup {
    PersistentVolumeClaims,
    ConfigMapsAndSecrets,
    Deployments,
    Services,
    Other,
}

impl ManifestGroup {
    pub fn label(&self) -> &'static str {
        match self {
            ManifestGroup::PersistentVolumeClaims => "PVCs",
            ManifestGroup::ConfigMapsAndSecrets => "ConfigMaps and Secrets",
            ManifestGroup::Deployments => "Deployments",
            ManifestGroup::Services => "Services",
            ManifestGroup::Other => "Other resources",
        }
    }

    /// Classify by file name. The first matching group wins.
    pub fn classify(file_name: &str) -> Self {
        let name = file_name.to_lowercase();
        if name.contains("pvc") {
            ManifestGroup::PersistentVolumeClaims
        } else if name.contains("configmap") || name.contains("secret") {
            ManifestGroup::ConfigMapsAndSecrets
        } else if name.contains("deployment") {
            ManifestGroup::Deployments
        } else if name.contains("service") {
            ManifestGroup::Services
        } else {
            ManifestGroup::Other
        }
    }
}

fn is_manifest(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Vault manifests that exist in `dir`, in the configured order.
pub fn vault_manifests(dir: &Path, names: &[String]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|n| dir.join(n))
        .filter(|p| is_manifest(p))
        .collect()
}

/// All remaining manifests in `dir`, grouped and sorted for apply.
///
/// Files named in `exclude` (the Vault set and the skip list) are left out.
pub fn ordered_manifests(
    dir: &Path,
    exclude: &[String],
) -> std::io::Result<Vec<(ManifestGroup, Vec<PathBuf>)>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_manifest(p))
        .filter(|p| !exclude.contains(&file_name(p)))
        .collect();
    files.sort();

    let mut groups: Vec<(ManifestGroup, Vec<PathBuf>)> = Vec::new();
    for group in [
        ManifestGroup::PersistentVolumeClaims,
        ManifestGroup::ConfigMapsAndSecrets,
        ManifestGroup::Deployments,
        ManifestGroup::Services,
        ManifestGroup::Other,
    ] {
        let members: Vec<PathBuf> = files
            .iter()
            .filter(|p| ManifestGroup::classify(&file_name(p)) == group)
            .cloned()
            .collect();
        if !members.is_empty() {
            groups.push((group, members));
        }
    }
    Ok(groups)
}
