//! Core data types for the Terrarium deployment driver.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// Target environment selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Single host, services run under docker compose
    Local,
    /// Local Kubernetes cluster (k3d or Minikube)
    Cluster,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Cluster => "cluster",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "docker" | "compose" => Ok(Environment::Local),
            "cluster" | "k3s" | "k3d" | "k8s" | "minikube" => Ok(Environment::Cluster),
            other => Err(format!(
                "unknown environment '{}' (expected local or cluster)",
                other
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action to run against the selected environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Deploy,
    Test,
    Clean,
    Logs,
    /// Vault status plus a read-back of the deployed secrets
    Secrets,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Deploy => "deploy",
            Action::Test => "test",
            Action::Clean => "clean",
            Action::Logs => "logs",
            Action::Secrets => "secrets",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deploy" => Ok(Action::Deploy),
            "test" => Ok(Action::Test),
            "clean" => Ok(Action::Clean),
            "logs" => Ok(Action::Logs),
            "secrets" => Ok(Action::Secrets),
            other => Err(format!(
                "unknown action '{}' (expected deploy, test, clean, logs or secrets)",
                other
            )),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How services authenticate to Vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Static root-token access only; secrets are written, no auth wiring
    Static,
    /// Kubernetes service-account auth with per-service roles
    Rbac,
    /// Both of the above
    #[default]
    Both,
}

impl AuthMode {
    /// Whether Kubernetes auth, policies and roles get provisioned.
    pub fn wants_rbac(&self) -> bool {
        matches!(self, AuthMode::Rbac | AuthMode::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Static => "static",
            AuthMode::Rbac => "rbac",
            AuthMode::Both => "both",
        }
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(AuthMode::Static),
            "rbac" | "role" | "kubernetes" => Ok(AuthMode::Rbac),
            "both" => Ok(AuthMode::Both),
            other => Err(format!(
                "unknown auth mode '{}' (expected static, rbac or both)",
                other
            )),
        }
    }
}

/// Local cluster flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterProvider {
    #[default]
    K3d,
    Minikube,
}

impl ClusterProvider {
    /// CLI binary that manages this provider.
    pub fn binary(&self) -> &'static str {
        match self {
            ClusterProvider::K3d => "k3d",
            ClusterProvider::Minikube => "minikube",
        }
    }
}

/// An image to build: `name:tag` from `context` using `dockerfile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub name: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    pub context: PathBuf,
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
    /// Passed as `--build-arg KEY=VALUE`
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

fn default_tag() -> String {
    "latest".to_string()
}

impl ImageDescriptor {
    pub fn new(name: impl Into<String>, context: impl Into<PathBuf>) -> Self {
        ImageDescriptor {
            name: name.into(),
            tag: default_tag(),
            context: context.into(),
            dockerfile: None,
            build_args: BTreeMap::new(),
        }
    }

    pub fn with_dockerfile(mut self, dockerfile: impl Into<PathBuf>) -> Self {
        self.dockerfile = Some(dockerfile.into());
        self
    }

    /// Full image reference, `name:tag`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// Dockerfile path, defaulting to `<context>/Dockerfile`.
    pub fn dockerfile_path(&self) -> PathBuf {
        match &self.dockerfile {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.context.join(path),
            None => self.context.join("Dockerfile"),
        }
    }
}

/// Outcome of comparing build-context mtimes against the image creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildDecision {
    /// No image with this reference exists
    Absent,
    /// Sources changed after the image was built
    Stale {
        newest_source: SystemTime,
        image_created: SystemTime,
    },
    /// Image is at least as new as every source file
    Fresh {
        newest_source: SystemTime,
        image_created: SystemTime,
    },
    /// Caller asked to ignore the cache
    Forced,
}

impl RebuildDecision {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, RebuildDecision::Fresh { .. })
    }

    pub fn describe(&self) -> &'static str {
        match self {
            RebuildDecision::Absent => "image absent",
            RebuildDecision::Stale { .. } => "sources newer than image",
            RebuildDecision::Fresh { .. } => "cache hit",
            RebuildDecision::Forced => "rebuild forced",
        }
    }
}

/// A versioned key-value secret: `path` is `<namespace>/<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub path: String,
    pub data: BTreeMap<String, String>,
}

impl SecretRecord {
    pub fn new(path: impl Into<String>) -> Self {
        SecretRecord {
            path: path.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// One path-scoped grant inside a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    pub path: String,
    pub capabilities: Vec<String>,
}

/// Named set of path rules, rendered to Vault's policy language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    pub name: String,
    pub rules: Vec<PathRule>,
}

impl PolicyDescriptor {
    /// Render as HCL accepted by `sys/policies/acl`.
    pub fn to_hcl(&self) -> String {
        self.rules
            .iter()
            .map(|rule| {
                let caps = rule
                    .capabilities
                    .iter()
                    .map(|c| format!("\"{}\"", c))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("path \"{}\" {{\n  capabilities = [{}]\n}}\n", rule.path, caps)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// True when any rule grants `sudo`, i.e. administrative reach.
    pub fn is_administrative(&self) -> bool {
        self.rules
            .iter()
            .any(|r| r.capabilities.iter().any(|c| c == "sudo"))
    }
}

/// Binding between service accounts and policies for Kubernetes auth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub name: String,
    pub service_accounts: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    pub policies: Vec<String>,
    #[serde(default = "default_ttl")]
    pub ttl: String,
}

fn default_ttl() -> String {
    "24h".to_string()
}

/// Terminal state of a single workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Succeeded,
    /// Nothing to do (resource present, feature disabled)
    Skipped,
    /// Optional step failed; workflow continues
    SoftFailed,
    /// Required step failed; workflow aborts
    Failed,
}

impl StepOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepOutcome::Failed)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            StepOutcome::Succeeded => "✓",
            StepOutcome::Skipped => "-",
            StepOutcome::SoftFailed => "⚠",
            StepOutcome::Failed => "✗",
        }
    }
}

/// Recorded result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub name: String,
    pub outcome: StepOutcome,
    pub detail: Option<String>,
    pub elapsed: Duration,
}

impl StepResult {
    pub fn success(&self) -> bool {
        !self.outcome.is_fatal()
    }
}
