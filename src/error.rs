//! Unified error type hierarchy for the Terrarium deployment driver
//!
//! Provides structured error handling with ConfigError, BuildError, VaultError,
//! ClusterError, WorkflowError, and AppError.

use std::io;
use thiserror::Error;

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Image build errors raised by the change-aware build driver.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Required tool missing: {0}")]
    PrerequisiteMissing(String),

    #[error("Dockerfile not found: {0}")]
    DockerfileMissing(String),

    #[error("Build context not readable: {0}")]
    ContextUnreadable(String),

    #[error("Image build failed for {image}: {reason}")]
    ImageBuildFailed { image: String, reason: String },

    #[error("Image import failed for {image}: {reason}")]
    ImportFailed { image: String, reason: String },
}

/// Secret store (Vault HTTP API) errors.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Connection refused, DNS failure or timeout
    #[error("Vault unreachable at {addr}: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("Vault returned unexpected status {status} for {path}: {body}")]
    UnexpectedStatus {
        path: String,
        status: u16,
        body: String,
    },

    /// Response decoded fine but the expected field was missing
    #[error("Vault response for {path} has no field '{field}'")]
    FieldAbsent { path: String, field: String },

    #[error("Failed to decode Vault response for {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Cluster control-plane and compose CLI errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Command '{cmd}' failed (exit {code}): {stderr}")]
    CommandFailed {
        cmd: String,
        code: i32,
        stderr: String,
    },

    #[error("Command '{cmd}' timed out after {secs}s")]
    Timeout { cmd: String, secs: u64 },

    #[error("Failed to spawn '{cmd}': {reason}")]
    Spawn { cmd: String, reason: String },

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("Cluster resource unavailable: {0}")]
    Unavailable(String),
}

/// Provisioning workflow errors.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Workflow aborted after {completed} step(s): {reason}")]
    Aborted { completed: usize, reason: String },
}

/// HTTP smoke-test errors.
#[derive(Error, Debug)]
pub enum SmokeError {
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("{failed} of {total} required smoke test(s) failed")]
    RequiredFailed { failed: usize, total: usize },
}

/// CLI-level failures with a user-facing message
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// A required external tool is not on PATH
    #[error("Missing prerequisite: {0}")]
    PrerequisiteMissing(String),
}

impl AppError {
    /// Get a user-facing error message suitable for terminal display
    pub fn user_message(&self) -> String {
        match self {
            AppError::PrerequisiteMissing(tool) => {
                format!("'{}' is required but was not found on PATH", tool)
            }
        }
    }
}

impl From<VaultError> for WorkflowError {
    fn from(e: VaultError) -> Self {
        WorkflowError::StepFailed {
            step: "vault".to_string(),
            reason: e.to_string(),
        }
    }
}

impl From<ClusterError> for WorkflowError {
    fn from(e: ClusterError) -> Self {
        WorkflowError::StepFailed {
            step: "cluster".to_string(),
            reason: e.to_string(),
        }
    }
}

impl From<BuildError> for WorkflowError {
    fn from(e: BuildError) -> Self {
        WorkflowError::StepFailed {
            step: "build".to_string(),
            reason: e.to_string(),
        }
    }
}

/// Top-level result type for operations that may fail.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::FileNotFound("terrarium.toml".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration file not found: terrarium.toml"
        );
    }

    #[test]
    fn test_vault_field_absent_is_distinct() {
        let err = VaultError::FieldAbsent {
            path: "auth/token/create".to_string(),
            field: "auth.client_token".to_string(),
        };
        assert!(matches!(err, VaultError::FieldAbsent { .. }));
        assert!(err.to_string().contains("auth.client_token"));
    }

    #[test]
    fn test_vault_error_converts_to_step_failure() {
        let err: WorkflowError = VaultError::Http("boom".to_string()).into();
        match err {
            WorkflowError::StepFailed { step, reason } => {
                assert_eq!(step, "vault");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_app_error_user_message() {
        let err = AppError::PrerequisiteMissing("kubectl".to_string());
        assert!(err.user_message().contains("kubectl"));
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err("test error".into());
        assert!(result.is_err());
    }
}
