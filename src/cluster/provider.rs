//! Local cluster lifecycle: k3d or Minikube.

use crate::config::ClusterSettings;
use crate::error::{BuildError, ClusterError};
use crate::models::ClusterProvider;
use crate::system::{run_checked, run_command};
use serde::Deserialize;
use std::time::Duration;

/// Observed cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Missing,
    /// Known to the provider but not serving (stopped or corrupted)
    Unhealthy,
    Healthy,
}

#[derive(Debug, Deserialize)]
struct K3dCluster {
    name: String,
    #[serde(rename = "serversRunning", default)]
    servers_running: u32,
}

#[derive(Debug, Deserialize)]
struct MinikubeStatus {
    #[serde(rename = "Host", default)]
    host: String,
    #[serde(rename = "APIServer", default)]
    api_server: String,
}

/// Parse `k3d cluster list -o json` for `name`.
pub fn parse_k3d_state(json: &str, name: &str) -> ClusterState {
    let clusters: Vec<K3dCluster> = match serde_json::from_str(json) {
        Ok(c) => c,
        Err(e) => {
            log::debug!("[Cluster] Cannot parse k3d cluster list: {}", e);
            return ClusterState::Missing;
        }
    };
    match clusters.iter().find(|c| c.name == name) {
        None => ClusterState::Missing,
        Some(c) if c.servers_running == 0 => ClusterState::Unhealthy,
        Some(_) => ClusterState::Healthy,
    }
}

/// Parse `minikube status -o json`.
pub fn parse_minikube_state(json: &str) -> ClusterState {
    match serde_json::from_str::<MinikubeStatus>(json) {
        Ok(s) if s.host == "Running" && s.api_server == "Running" => ClusterState::Healthy,
        Ok(s) if s.host.is_empty() => ClusterState::Missing,
        Ok(_) => ClusterState::Unhealthy,
        Err(_) => ClusterState::Missing,
    }
}

/// Manages the local cluster through its provider CLI
#[derive(Debug, Clone)]
pub struct ClusterManager {
    settings: ClusterSettings,
    command_timeout: Duration,
    create_timeout: Duration,
}

impl ClusterManager {
    pub fn new(settings: ClusterSettings, command_timeout: Duration, create_timeout: Duration) -> Self {
        ClusterManager {
            settings,
            command_timeout,
            create_timeout,
        }
    }

    pub fn provider(&self) -> ClusterProvider {
        self.settings.provider
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Arguments for creating the cluster.
    pub fn create_args(&self) -> Vec<String> {
        match self.settings.provider {
            ClusterProvider::K3d => {
                let mut args = vec![
                    "cluster".to_string(),
                    "create".to_string(),
                    self.settings.name.clone(),
                ];
                for port in &self.settings.ports {
                    args.push("--port".to_string());
                    args.push(format!("{}@loadbalancer", port));
                }
                args.push("--api-port".to_string());
                args.push(self.settings.api_port.to_string());
                // Ingress is provided by the stack's own nginx
                args.push("--k3s-arg".to_string());
                args.push("--disable=traefik@server:0".to_string());
                args.push("--wait".to_string());
                args
            }
            ClusterProvider::Minikube => vec![
                "start".to_string(),
                "-p".to_string(),
                self.settings.name.clone(),
                format!("--apiserver-port={}", self.settings.api_port),
            ],
        }
    }

    pub async fn state(&self) -> Result<ClusterState, ClusterError> {
        let binary = self.settings.provider.binary();
        let state = match self.settings.provider {
            ClusterProvider::K3d => {
                let out = run_command(
                    binary,
                    &["cluster", "list", "-o", "json"],
                    None,
                    self.command_timeout,
                )
                .await?;
                if !out.success() {
                    return Ok(ClusterState::Missing);
                }
                parse_k3d_state(&out.stdout, &self.settings.name)
            }
            ClusterProvider::Minikube => {
                let out = run_command(
                    binary,
                    &["status", "-p", &self.settings.name, "-o", "json"],
                    None,
                    self.command_timeout,
                )
                .await?;
                parse_minikube_state(&out.stdout)
            }
        };

        if state != ClusterState::Healthy {
            return Ok(state);
        }

        // Provider says running; confirm the API answers
        let info = run_command(
            "kubectl",
            &["cluster-info"],
            None,
            Duration::from_secs(10),
        )
        .await;
        match info {
            Ok(out) if out.success() => Ok(ClusterState::Healthy),
            _ => Ok(ClusterState::Unhealthy),
        }
    }

    /// Create the cluster when missing; recreate when unhealthy.
    ///
    /// Returns `true` when a cluster was created.
    pub async fn ensure(&self) -> Result<bool, ClusterError> {
        match self.state().await? {
            ClusterState::Healthy => {
                log::info!("[Cluster] Cluster '{}' is healthy", self.settings.name);
                Ok(false)
            }
            ClusterState::Unhealthy => {
                log::warn!(
                    "[Cluster] Cluster '{}' exists but is unhealthy, recreating",
                    self.settings.name
                );
                self.delete().await?;
                self.create().await?;
                Ok(true)
            }
            ClusterState::Missing => {
                self.create().await?;
                Ok(true)
            }
        }
    }

    pub async fn create(&self) -> Result<(), ClusterError> {
        log::info!(
            "[Cluster] Creating {} cluster '{}'",
            self.settings.provider.binary(),
            self.settings.name
        );
        let args = self.create_args();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked(
            self.settings.provider.binary(),
            &arg_refs,
            None,
            self.create_timeout,
        )
        .await?;
        crate::log_success!("[Cluster] Cluster '{}' created", self.settings.name);
        Ok(())
    }

    /// Delete the cluster. A missing cluster is not an error.
    pub async fn delete(&self) -> Result<(), ClusterError> {
        let name = self.settings.name.as_str();
        let args: Vec<&str> = match self.settings.provider {
            ClusterProvider::K3d => vec!["cluster", "delete", name],
            ClusterProvider::Minikube => vec!["delete", "-p", name],
        };
        let out = run_command(
            self.settings.provider.binary(),
            &args,
            None,
            self.create_timeout,
        )
        .await?;
        if !out.success() {
            log::warn!(
                "[Cluster] Delete of '{}' reported: {}",
                name,
                out.stderr.trim()
            );
        }
        Ok(())
    }

    /// Make a locally built image visible to the cluster's container runtime.
    pub async fn import_image(&self, reference: &str) -> Result<(), BuildError> {
        let name = self.settings.name.as_str();
        let args: Vec<&str> = match self.settings.provider {
            ClusterProvider::K3d => vec!["image", "import", reference, "-c", name],
            ClusterProvider::Minikube => vec!["-p", name, "image", "load", reference],
        };
        run_checked(
            self.settings.provider.binary(),
            &args,
            None,
            self.create_timeout,
        )
        .await
        .map(|_| ())
        .map_err(|e| BuildError::ImportFailed {
            image: reference.to_string(),
            reason: e.to_string(),
        })
    }
}
