//! Configuration module for deployment runs.
//!
//! `DeployConfig` carries every tunable the driver uses. Every field has a
//! default, so the config file (`terrarium.toml`) is optional and may be
//! partial.
//!
//! # Configuration Flow
//!
//! 1. `loader` reads the TOML file (project-local, then `~/.config/terrarium/`)
//! 2. `validate()` rejects inconsistent settings
//! 3. Environment overrides (`VAULT_ADDR`, `VAULT_TOKEN`, ...) are applied
//! 4. CLI overrides are applied last by `main`
//! 5. `secrets` provides the secret set to write into Vault

pub mod loader;
pub mod secrets;

use crate::error::ConfigError;
use crate::models::{
    AuthMode, ClusterProvider, ImageDescriptor, PathRule, PolicyDescriptor, RoleDescriptor,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use loader::{apply_env_overrides, load_config, load_config_from_file};

/// Cluster (k3d / Minikube) settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub provider: ClusterProvider,
    pub name: String,
    /// Load-balancer port mappings, `host:container`
    pub ports: Vec<String>,
    pub api_port: u16,
    /// Directory of Kubernetes manifests, relative to the project root
    pub manifests_dir: PathBuf,
    /// Manifests applied before Vault provisioning, in order
    pub vault_manifests: Vec<String>,
    /// Manifests never applied directly
    pub skip_manifests: Vec<String>,
    pub tls_secret_name: String,
    /// Deployment name of the in-cluster Vault
    pub vault_deployment: String,
}

impl ClusterSettings {
    /// Host ports the cluster publishes itself (the k3d load balancer).
    pub fn published_host_ports(&self) -> Vec<u16> {
        match self.provider {
            ClusterProvider::K3d => self.ports.iter().filter_map(|p| host_port(p)).collect(),
            ClusterProvider::Minikube => Vec::new(),
        }
    }
}

/// Host port of a k3d `[ip:]host:container[@node]` mapping.
fn host_port(mapping: &str) -> Option<u16> {
    let mapping = mapping.split('@').next().unwrap_or(mapping);
    let parts: Vec<&str> = mapping.split(':').collect();
    match parts.as_slice() {
        [_, host, _] | [host, _] => host.trim().parse().ok(),
        _ => None,
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            provider: ClusterProvider::K3d,
            name: "edge-terrarium".to_string(),
            ports: vec![
                "80:80".to_string(),
                "443:443".to_string(),
                "8200:8200".to_string(),
                "5001:5001".to_string(),
            ],
            api_port: 6443,
            manifests_dir: PathBuf::from("configs/k3s"),
            vault_manifests: vec![
                "vault-pvc.yaml".to_string(),
                "vault-deployment.yaml".to_string(),
                "vault-service.yaml".to_string(),
            ],
            skip_manifests: vec![
                "kustomization.yaml".to_string(),
                "namespace.yaml".to_string(),
            ],
            tls_secret_name: "nginx-ssl".to_string(),
            vault_deployment: "vault".to_string(),
        }
    }
}

/// docker compose settings for the local environment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeSettings {
    pub file: PathBuf,
    pub project: String,
    /// Service started first so Vault can be provisioned before the rest
    pub vault_service: String,
    pub log_tail: u32,
}

impl Default for ComposeSettings {
    fn default() -> Self {
        ComposeSettings {
            file: PathBuf::from("configs/docker/docker-compose.yml"),
            project: "edge-terrarium".to_string(),
            vault_service: "vault".to_string(),
            log_tail: 100,
        }
    }
}

/// Access token issued for the Vault UI
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiTokenSettings {
    pub enabled: bool,
    pub policies: Vec<String>,
    pub ttl: String,
    pub display_name: String,
}

impl Default for UiTokenSettings {
    fn default() -> Self {
        UiTokenSettings {
            enabled: true,
            policies: vec!["terrarium-admin".to_string()],
            ttl: "24h".to_string(),
            display_name: "terrarium-ui".to_string(),
        }
    }
}

/// Vault connection and provisioning settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    pub addr: String,
    pub token: String,
    /// KV v2 mount path
    pub mount: String,
    pub auth_mode: AuthMode,
    pub health_attempts: u32,
    pub health_interval_secs: u64,
    /// Service account whose token Vault uses to review logins
    pub reviewer_service_account: String,
    /// Vault path the discovered TLS pair is stored under
    pub tls_secret_path: String,
    pub policies: Vec<PolicyDescriptor>,
    pub roles: Vec<RoleDescriptor>,
    pub ui_token: UiTokenSettings,
}

impl Default for VaultSettings {
    fn default() -> Self {
        VaultSettings {
            addr: "http://localhost:8200".to_string(),
            token: "root".to_string(),
            mount: "secret".to_string(),
            auth_mode: AuthMode::Both,
            health_attempts: 30,
            health_interval_secs: 2,
            reviewer_service_account: "vault".to_string(),
            tls_secret_path: "terrarium/tls".to_string(),
            policies: default_policies(),
            roles: default_roles(),
            ui_token: UiTokenSettings::default(),
        }
    }
}

fn rule(path: &str, caps: &[&str]) -> PathRule {
    PathRule {
        path: path.to_string(),
        capabilities: caps.iter().map(|c| c.to_string()).collect(),
    }
}

/// Port Vault listens on inside its pod.
pub const VAULT_CONTAINER_PORT: u16 = 8200;

/// Replaced by `vault.mount` in policy paths.
pub const MOUNT_PLACEHOLDER: &str = "{mount}";

fn default_policies() -> Vec<PolicyDescriptor> {
    vec![
        PolicyDescriptor {
            name: "custom-client-policy".to_string(),
            rules: vec![
                rule("{mount}/data/custom-client/*", &["read", "list"]),
                rule("{mount}/metadata/custom-client/*", &["read", "list"]),
            ],
        },
        PolicyDescriptor {
            name: "terrarium-tls-policy".to_string(),
            rules: vec![rule("{mount}/data/terrarium/tls", &["read"])],
        },
        PolicyDescriptor {
            name: "terrarium-admin".to_string(),
            rules: vec![
                rule("{mount}/*", &["create", "read", "update", "delete", "list"]),
                rule("sys/mounts", &["read", "list"]),
                rule("sys/policies/acl/*", &["read", "list"]),
            ],
        },
    ]
}

/// Roles with no namespaces bind the deploy namespace.
fn default_roles() -> Vec<RoleDescriptor> {
    vec![
        RoleDescriptor {
            name: "custom-client".to_string(),
            service_accounts: vec!["custom-client".to_string()],
            namespaces: Vec::new(),
            policies: vec!["custom-client-policy".to_string()],
            ttl: "24h".to_string(),
        },
        RoleDescriptor {
            name: "nginx".to_string(),
            service_accounts: vec!["nginx".to_string()],
            namespaces: Vec::new(),
            policies: vec!["terrarium-tls-policy".to_string()],
            ttl: "24h".to_string(),
        },
    ]
}

/// Certificate discovery and generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertSettings {
    /// Base file name: `<name>.crt` / `<name>.key`
    pub name: String,
    /// Scratch directories searched before the project certs dir
    pub search_dirs: Vec<PathBuf>,
    /// Generate a self-signed pair with openssl when none is found
    pub generate: bool,
    pub common_name: String,
    pub validity_days: u32,
}

impl Default for CertSettings {
    fn default() -> Self {
        CertSettings {
            name: "edge-terrarium".to_string(),
            search_dirs: vec![PathBuf::from("/tmp/certs")],
            generate: true,
            common_name: "edge-terrarium.local".to_string(),
            validity_days: 365,
        }
    }
}

/// A `kubectl port-forward` to keep open
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardSpec {
    pub service: String,
    pub local_port: u16,
    pub remote_port: u16,
    /// Outlives the run (pid recorded); otherwise torn down on exit
    #[serde(default)]
    pub persistent: bool,
}

/// Bounded waits for external calls, in seconds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub command_secs: u64,
    pub build_secs: u64,
    pub http_secs: u64,
    /// Passed to `kubectl wait --timeout`
    pub wait_secs: u64,
    pub cluster_create_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            command_secs: 120,
            build_secs: 1800,
            http_secs: 10,
            wait_secs: 120,
            cluster_create_secs: 300,
        }
    }
}

impl Timeouts {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn http(&self) -> Duration {
        Duration::from_secs(self.http_secs)
    }
}

/// Smoke-test settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeSettings {
    /// Probe definitions; built-in probes are used when absent
    pub file: Option<PathBuf>,
    pub attempts: u32,
    pub delay_secs: u64,
    pub host_header: String,
    pub gateway_url: String,
}

impl Default for SmokeSettings {
    fn default() -> Self {
        SmokeSettings {
            file: None,
            attempts: 3,
            delay_secs: 2,
            host_header: "edge-terrarium.local".to_string(),
            gateway_url: "https://localhost:8443".to_string(),
        }
    }
}

/// Complete deployment configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub namespace: String,
    /// Project root; discovered from the working directory when unset
    pub project_root: Option<PathBuf>,
    pub images: Vec<ImageDescriptor>,
    pub cluster: ClusterSettings,
    pub compose: ComposeSettings,
    pub vault: VaultSettings,
    pub certs: CertSettings,
    pub port_forwards: Vec<PortForwardSpec>,
    pub timeouts: Timeouts,
    pub smoke: SmokeSettings,
    /// Ignore image timestamps and rebuild everything (CLI only)
    #[serde(skip)]
    pub no_cache: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            namespace: "edge-terrarium".to_string(),
            project_root: None,
            images: default_images(),
            cluster: ClusterSettings::default(),
            compose: ComposeSettings::default(),
            vault: VaultSettings::default(),
            certs: CertSettings::default(),
            port_forwards: vec![PortForwardSpec {
                service: "nginx".to_string(),
                local_port: 8443,
                remote_port: 443,
                persistent: true,
            }],
            timeouts: Timeouts::default(),
            smoke: SmokeSettings::default(),
            no_cache: false,
        }
    }
}

fn default_images() -> Vec<ImageDescriptor> {
    ["custom-client", "service-sink", "logthon", "file-storage"]
        .iter()
        .map(|app| {
            ImageDescriptor::new(format!("edge-terrarium-{}", app), format!("apps/{}", app))
        })
        .collect()
}

impl DeployConfig {
    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "namespace cannot be empty".to_string(),
            ));
        }
        if !crate::system::is_safe_name(&self.namespace) {
            return Err(ConfigError::ValidationFailed(format!(
                "namespace '{}' contains invalid characters",
                self.namespace
            )));
        }
        if !(self.vault.addr.starts_with("http://") || self.vault.addr.starts_with("https://")) {
            return Err(ConfigError::ValidationFailed(format!(
                "vault.addr must be an http(s) URL, got '{}'",
                self.vault.addr
            )));
        }
        if self.vault.mount.trim_matches('/').is_empty() {
            return Err(ConfigError::ValidationFailed(
                "vault.mount cannot be empty".to_string(),
            ));
        }
        if self.vault.health_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "vault.health_attempts must be at least 1".to_string(),
            ));
        }
        if self.smoke.attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "smoke.attempts must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for image in &self.images {
            if !crate::system::is_safe_name(&image.reference()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "invalid image reference '{}'",
                    image.reference()
                )));
            }
            if !seen.insert(image.reference()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "image '{}' declared twice",
                    image.reference()
                )));
            }
        }

        let policy_names: Vec<&str> = self.vault.policies.iter().map(|p| p.name.as_str()).collect();
        for role in &self.vault.roles {
            if role.service_accounts.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "role '{}' binds no service accounts",
                    role.name
                )));
            }
            for policy in &role.policies {
                if !policy_names.contains(&policy.as_str()) && policy != "default" {
                    return Err(ConfigError::ValidationFailed(format!(
                        "role '{}' references unknown policy '{}'",
                        role.name, policy
                    )));
                }
            }
            if !role.namespaces.is_empty() && !role.namespaces.contains(&self.namespace) {
                return Err(ConfigError::ValidationFailed(format!(
                    "role '{}' is not bound to deploy namespace '{}'",
                    role.name, self.namespace
                )));
            }
        }

        let published = self.cluster.published_host_ports();
        let mut ports = std::collections::HashSet::new();
        for pf in &self.port_forwards {
            if !ports.insert(pf.local_port) {
                return Err(ConfigError::ValidationFailed(format!(
                    "local port {} forwarded twice",
                    pf.local_port
                )));
            }
            if published.contains(&pf.local_port) {
                return Err(ConfigError::ValidationFailed(format!(
                    "port-forward for '{}' uses local port {}, already published by the cluster",
                    pf.service, pf.local_port
                )));
            }
        }

        Ok(())
    }

    /// UI-token policies that grant `sudo` somewhere.
    pub fn administrative_ui_policies(&self) -> Vec<&PolicyDescriptor> {
        self.vault
            .policies
            .iter()
            .filter(|p| self.vault.ui_token.policies.contains(&p.name) && p.is_administrative())
            .collect()
    }

    /// Fully qualified KV path for a secret under the configured mount.
    pub fn secret_data_path(&self, path: &str) -> String {
        format!("{}/data/{}", self.vault.mount.trim_matches('/'), path.trim_matches('/'))
    }

    pub fn port_forward(&self, service: &str) -> Option<&PortForwardSpec> {
        self.port_forwards.iter().find(|pf| pf.service == service)
    }

    /// Session forward that makes `vault.addr` reachable, if one is needed.
    ///
    /// An explicit `[[port_forwards]]` entry for the Vault deployment wins.
    /// Otherwise a forward is derived from a loopback `vault.addr`, unless the
    /// cluster already publishes that port on the host.
    pub fn vault_port_forward(&self) -> Option<PortForwardSpec> {
        let service = &self.cluster.vault_deployment;
        if let Some(spec) = self.port_forward(service) {
            return Some(spec.clone());
        }

        let url = reqwest::Url::parse(&self.vault.addr).ok()?;
        if !matches!(url.host_str(), Some("localhost") | Some("127.0.0.1")) {
            return None;
        }
        let port = url.port_or_known_default()?;
        if self.cluster.published_host_ports().contains(&port) {
            return None;
        }
        Some(PortForwardSpec {
            service: service.clone(),
            local_port: port,
            remote_port: VAULT_CONTAINER_PORT,
            persistent: false,
        })
    }

    /// Roles with unset namespaces bound to the deploy namespace.
    pub fn effective_roles(&self) -> Vec<RoleDescriptor> {
        self.vault
            .roles
            .iter()
            .cloned()
            .map(|mut role| {
                if role.namespaces.is_empty() {
                    role.namespaces = vec![self.namespace.clone()];
                }
                role
            })
            .collect()
    }

    /// Policies with `{mount}` expanded to the configured KV mount.
    pub fn effective_policies(&self) -> Vec<PolicyDescriptor> {
        let mount = self.vault.mount.trim_matches('/');
        self.vault
            .policies
            .iter()
            .cloned()
            .map(|mut policy| {
                for rule in &mut policy.rules {
                    rule.path = rule.path.replace(MOUNT_PLACEHOLDER, mount);
                }
                policy
            })
            .collect()
    }
}
