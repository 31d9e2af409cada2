//! Workflow phase tracking and the provisioning context.
//!
//! **Architecture**:
//! - `WorkflowPhase`: discrete stages of a deploy, strictly linear
//! - `ProvisionContext`: everything steps read or discover, threaded by `&mut`
//!   through every step in place of shared globals

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use super::phases::port_forward::PortForward;
use crate::cluster::ControlPlane;
use crate::config::DeployConfig;
use crate::models::{Environment, SecretRecord};
use crate::system::paths::ProjectPaths;
use crate::vault::VaultClient;

/// Deploy phase enumeration.
///
/// Phases advance one way; any phase may fail, and failure is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowPhase {
    /// Prerequisites and certificates
    Preparation,
    /// Cluster or compose stack brought up
    Infrastructure,
    /// Change-aware image builds
    Building,
    /// Vault secrets, auth, policies, roles
    Provisioning,
    /// Remaining manifests / services started
    Rollout,
    Completed,
    Failed,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Preparation => "preparation",
            WorkflowPhase::Infrastructure => "infrastructure",
            WorkflowPhase::Building => "building",
            WorkflowPhase::Provisioning => "provisioning",
            WorkflowPhase::Rollout => "rollout",
            WorkflowPhase::Completed => "completed",
            WorkflowPhase::Failed => "failed",
        }
    }

    /// Valid phase transitions FROM this phase.
    pub fn valid_next_phases(&self) -> Vec<WorkflowPhase> {
        match self {
            WorkflowPhase::Preparation => vec![WorkflowPhase::Infrastructure, WorkflowPhase::Building, WorkflowPhase::Failed],
            WorkflowPhase::Infrastructure => vec![WorkflowPhase::Building, WorkflowPhase::Provisioning, WorkflowPhase::Failed],
            WorkflowPhase::Building => vec![WorkflowPhase::Infrastructure, WorkflowPhase::Provisioning, WorkflowPhase::Failed],
            WorkflowPhase::Provisioning => vec![WorkflowPhase::Rollout, WorkflowPhase::Completed, WorkflowPhase::Failed],
            WorkflowPhase::Rollout => vec![WorkflowPhase::Completed, WorkflowPhase::Failed],
            WorkflowPhase::Completed => vec![],
            WorkflowPhase::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: WorkflowPhase) -> bool {
        self.valid_next_phases().contains(&next)
    }
}

/// A discovered certificate/key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPair {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// State threaded through every provisioning step
pub struct ProvisionContext {
    pub config: DeployConfig,
    pub paths: ProjectPaths,
    pub environment: Environment,
    pub vault: VaultClient,
    /// Absent for the local environment
    pub control_plane: Option<Arc<dyn ControlPlane>>,
    pub secrets: Vec<SecretRecord>,

    pub phase: WorkflowPhase,
    pub started: SystemTime,

    // Discovered by steps
    pub cert: Option<CertPair>,
    pub ui_token: Option<String>,
    /// Session-scoped forwarders, torn down when the context drops
    pub port_forwards: Vec<PortForward>,
}

impl ProvisionContext {
    pub fn new(
        config: DeployConfig,
        paths: ProjectPaths,
        environment: Environment,
        vault: VaultClient,
    ) -> Self {
        ProvisionContext {
            config,
            paths,
            environment,
            vault,
            control_plane: None,
            secrets: Vec::new(),
            phase: WorkflowPhase::Preparation,
            started: SystemTime::now(),
            cert: None,
            ui_token: None,
            port_forwards: Vec::new(),
        }
    }

    pub fn with_control_plane(mut self, control_plane: Arc<dyn ControlPlane>) -> Self {
        self.control_plane = Some(control_plane);
        self
    }

    pub fn with_secrets(mut self, secrets: Vec<SecretRecord>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Advance to `next`, rejecting out-of-order transitions.
    pub fn transition_to(&mut self, next: WorkflowPhase) -> Result<(), String> {
        if self.phase == next {
            return Ok(());
        }
        if !self.phase.can_transition_to(next) {
            return Err(format!(
                "Invalid phase transition: {} -> {}",
                self.phase.as_str(),
                next.as_str()
            ));
        }
        log::debug!("[Workflow] Phase {} -> {}", self.phase.as_str(), next.as_str());
        self.phase = next;
        Ok(())
    }

    pub fn mark_failed(&mut self) {
        self.phase = WorkflowPhase::Failed;
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Control plane for cluster-only steps.
    pub fn cluster(&self) -> Option<Arc<dyn ControlPlane>> {
        self.control_plane.clone()
    }
}
