//! Edge Terrarium deployment driver
//!
//! Builds the stack's container images only when their sources changed, brings
//! up a local compose stack or k3d/Minikube cluster, provisions Vault, and runs
//! HTTP smoke tests. Every heavy operation is delegated to an external tool
//! (`docker`, `kubectl`, `k3d`/`minikube`, `openssl`) or the Vault HTTP API.
//!
//! The system is organized into functional modules:
//! - **error**: Error enums per concern
//! - **models**: Environments, actions, images, secrets, policies, step results
//! - **hardware**: Host architecture to build platform mapping
//! - **system**: Bounded command execution, prerequisite checks, project paths
//! - **config**: `terrarium.toml` loading, overrides and the secret set
//! - **vault**: Typed client for the Vault HTTP API
//! - **cluster**: kubectl control plane, cluster provider, compose, manifests
//! - **orchestrator**: Build driver and the provisioning workflow
//! - **smoke**: HTTP smoke tests
//! - **log_collector**: Console and file logging backend

// Core foundational modules
pub mod error;
pub mod models;

pub mod hardware;
pub mod system;
pub mod config;

// External services
pub mod vault;
pub mod cluster;

pub mod log_collector;
pub mod orchestrator;
pub mod smoke;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogHandle};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    AppError, BuildError, ClusterError, ConfigError, Result, SmokeError, VaultError, WorkflowError,
};

pub use models::{
    Action, AuthMode, ClusterProvider, Environment, ImageDescriptor, PolicyDescriptor,
    RebuildDecision, RoleDescriptor, SecretRecord, StepOutcome, StepResult,
};

pub use config::DeployConfig;
pub use orchestrator::{BuildDriver, Orchestrator, ProvisionContext, WorkflowReport};
pub use vault::VaultClient;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
