//! Workflow steps, grouped by what they touch.
//!
//! - `prep`: prerequisite tools and certificates
//! - `cluster`: cluster, namespace, manifests, compose services
//! - `vault`: secrets engine, secrets, auth, policies, roles, tokens
//! - `port_forward`: supervised `kubectl port-forward` children
//!
//! Each step takes the [`ProvisionContext`](super::state::ProvisionContext)
//! by `&mut` and reports a [`Completion`]; an `Err` is a hard failure.

pub mod cluster;
pub mod port_forward;
pub mod prep;
pub mod vault;

use crate::models::StepOutcome;

pub use port_forward::PortForward;
pub use prep::{discover_certificates, ensure_certificates};

/// How a step finished when it did not fail hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub outcome: StepOutcome,
    pub detail: Option<String>,
}

impl Completion {
    pub fn done_with(detail: impl Into<String>) -> Self {
        Completion {
            outcome: StepOutcome::Succeeded,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Completion {
            outcome: StepOutcome::Skipped,
            detail: Some(reason.into()),
        }
    }

    /// Warning only; the workflow continues.
    pub fn soft_failed(reason: impl Into<String>) -> Self {
        Completion {
            outcome: StepOutcome::SoftFailed,
            detail: Some(reason.into()),
        }
    }
}
