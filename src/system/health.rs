/// Prerequisite checks
///
/// Silent tool discovery before any workflow step runs.
/// Reports missing required and optional CLIs per environment.

use crate::error::AppError;
use crate::models::{ClusterProvider, Environment};
use crate::system::command_exists;
use serde::{Deserialize, Serialize};

/// Health status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// All required and optional tools installed
    Excellent,
    /// All required tools installed, some optional tools missing
    Good,
    /// Required tools missing
    Poor,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "Excellent",
            HealthStatus::Good => "Good",
            HealthStatus::Poor => "Poor",
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, HealthStatus::Poor)
    }
}

/// Prerequisite report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub missing_required: Vec<String>,
    pub missing_optional: Vec<String>,
    pub message: String,
}

impl Default for HealthReport {
    fn default() -> Self {
        HealthReport {
            status: HealthStatus::Excellent,
            missing_required: Vec::new(),
            missing_optional: Vec::new(),
            message: "All prerequisites installed".to_string(),
        }
    }
}

impl HealthReport {
    /// First missing required tool as an error, if any.
    pub fn into_result(self) -> Result<Self, AppError> {
        match self.missing_required.first() {
            Some(tool) => Err(AppError::PrerequisiteMissing(tool.clone())),
            None => Ok(self),
        }
    }
}

/// Tool discovery for a deployment environment
pub struct HealthManager;

impl HealthManager {
    /// Tools that must be present for `env`.
    pub fn required_tools(env: Environment, provider: ClusterProvider) -> Vec<&'static str> {
        match env {
            Environment::Local => vec!["docker", "curl"],
            Environment::Cluster => vec!["docker", "kubectl", provider.binary()],
        }
    }

    /// Tools whose absence only disables a feature.
    pub fn optional_tools() -> Vec<&'static str> {
        vec!["openssl"]
    }

    /// Check the host with the real `command -v` probe.
    pub fn check_prerequisites(env: Environment, provider: ClusterProvider) -> HealthReport {
        Self::check_with(env, provider, command_exists)
    }

    /// Check with an injectable probe.
    pub fn check_with<F>(env: Environment, provider: ClusterProvider, exists: F) -> HealthReport
    where
        F: Fn(&str) -> bool,
    {
        let mut report = HealthReport::default();

        for tool in Self::required_tools(env, provider) {
            if !exists(tool) {
                report.missing_required.push(tool.to_string());
            }
        }
        for tool in Self::optional_tools() {
            if !exists(tool) {
                report.missing_optional.push(tool.to_string());
            }
        }

        if !report.missing_required.is_empty() {
            report.status = HealthStatus::Poor;
            report.message = format!(
                "Missing {} required tool(s): {}",
                report.missing_required.len(),
                report.missing_required.join(", ")
            );
        } else if !report.missing_optional.is_empty() {
            report.status = HealthStatus::Good;
            report.message = format!(
                "Ready (optional tools missing: {})",
                report.missing_optional.join(", ")
            );
        }

        report
    }
}
