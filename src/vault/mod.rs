//! Vault HTTP API access.
//!
//! - `client`: [`VaultClient`] with idempotent create semantics
//! - `types`: typed request/response payloads
//! - `audit`: read-back check of the deployed secret set

pub mod audit;
pub mod client;
pub mod types;

pub use audit::{audit_secrets, SecretAudit};
pub use client::{is_already_exists, VaultClient, ACCEPTED_HEALTH_STATUSES};
pub use types::{KubernetesAuthConfig, Provisioned, VaultHealth};
