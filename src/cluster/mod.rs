//! Cluster and compose control planes.
//!
//! - `kubectl`: [`Kubectl`], the production [`ControlPlane`]
//! - `provider`: k3d / Minikube lifecycle and image import
//! - `compose`: docker compose stack for the local environment
//! - `manifests`: manifest discovery and apply ordering

pub mod compose;
pub mod kubectl;
pub mod manifests;
pub mod provider;

use crate::error::ClusterError;
use async_trait::async_trait;
use std::path::Path;

pub use compose::Compose;
pub use kubectl::Kubectl;
pub use provider::ClusterManager;

/// Kubernetes operations the provisioning workflow needs.
///
/// Implemented over the `kubectl` CLI; tests substitute an in-memory fake.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError>;

    async fn create_namespace(&self, namespace: &str) -> Result<(), ClusterError>;

    async fn apply_manifest(&self, manifest: &Path, namespace: &str) -> Result<(), ClusterError>;

    /// Block until the deployment reports `Available` or the wait times out.
    async fn wait_for_deployment(&self, name: &str, namespace: &str) -> Result<(), ClusterError>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<String>, ClusterError>;

    /// Delete a secret; absence is not an error.
    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<(), ClusterError>;

    async fn create_tls_secret(
        &self,
        name: &str,
        namespace: &str,
        cert: &Path,
        key: &Path,
    ) -> Result<(), ClusterError>;

    /// Short-lived token for a service account.
    async fn create_service_account_token(
        &self,
        service_account: &str,
        namespace: &str,
    ) -> Result<String, ClusterError>;

    /// Run a command in the first pod of a deployment and return stdout.
    async fn exec_in_deployment(
        &self,
        deployment: &str,
        namespace: &str,
        command: &[&str],
    ) -> Result<String, ClusterError>;

    async fn deployment_logs(
        &self,
        deployment: &str,
        namespace: &str,
        tail: u32,
    ) -> Result<String, ClusterError>;

    /// Program and arguments for a `port-forward` child process.
    fn port_forward_command(
        &self,
        service: &str,
        namespace: &str,
        local_port: u16,
        remote_port: u16,
    ) -> (String, Vec<String>);
}
