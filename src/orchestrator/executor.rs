//! Step execution: named steps, uniform logging, fail-fast.
//!
//! A plan is an ordered `&[ProvisionStep]`. `run_steps` executes it against a
//! `ProvisionContext`, records a `StepResult` per step and stops at the first
//! hard failure of a required step. Optional steps that fail are downgraded
//! to warnings.

use super::checkpoint::WorkflowReport;
use super::phases::{cluster, prep, vault, Completion};
use super::state::ProvisionContext;
use crate::error::WorkflowError;
use crate::models::{AuthMode, Environment, StepOutcome, StepResult};
use std::time::Instant;

/// One unit of provisioning work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionStep {
    Prerequisites,
    Certificates,
    EnsureCluster,
    Namespace,
    TlsSecret,
    /// `docker compose up -d`; all services when empty
    StartServices(Vec<String>),
    ApplyVaultManifests,
    WaitForVault,
    PortForward { service: String, required: bool },
    VaultHealth,
    SecretsEngine,
    WriteSecrets,
    StoreTls,
    KubernetesAuth,
    KubernetesAuthConfig,
    Policies,
    Roles,
    UiToken,
    ApplyManifests,
    WaitForDeployments,
}

impl ProvisionStep {
    pub fn name(&self) -> String {
        match self {
            ProvisionStep::Prerequisites => "prerequisites".to_string(),
            ProvisionStep::Certificates => "certificates".to_string(),
            ProvisionStep::EnsureCluster => "cluster".to_string(),
            ProvisionStep::Namespace => "namespace".to_string(),
            ProvisionStep::TlsSecret => "tls-secret".to_string(),
            ProvisionStep::StartServices(services) if services.is_empty() => {
                "compose-up".to_string()
            }
            ProvisionStep::StartServices(services) => format!("compose-up {}", services.join(",")),
            ProvisionStep::ApplyVaultManifests => "vault-manifests".to_string(),
            ProvisionStep::WaitForVault => "vault-rollout".to_string(),
            ProvisionStep::PortForward { service, .. } => format!("port-forward {}", service),
            ProvisionStep::VaultHealth => "vault-health".to_string(),
            ProvisionStep::SecretsEngine => "secrets-engine".to_string(),
            ProvisionStep::WriteSecrets => "write-secrets".to_string(),
            ProvisionStep::StoreTls => "store-tls".to_string(),
            ProvisionStep::KubernetesAuth => "kubernetes-auth".to_string(),
            ProvisionStep::KubernetesAuthConfig => "kubernetes-auth-config".to_string(),
            ProvisionStep::Policies => "policies".to_string(),
            ProvisionStep::Roles => "roles".to_string(),
            ProvisionStep::UiToken => "ui-token".to_string(),
            ProvisionStep::ApplyManifests => "manifests".to_string(),
            ProvisionStep::WaitForDeployments => "rollout".to_string(),
        }
    }

    /// Whether a hard failure of this step aborts the workflow.
    pub fn required(&self) -> bool {
        match self {
            ProvisionStep::Certificates | ProvisionStep::StoreTls | ProvisionStep::UiToken => false,
            ProvisionStep::PortForward { required, .. } => *required,
            _ => true,
        }
    }
}

/// Execute one step.
pub async fn execute(
    step: &ProvisionStep,
    ctx: &mut ProvisionContext,
) -> Result<Completion, WorkflowError> {
    match step {
        ProvisionStep::Prerequisites => prep::check_prerequisites(ctx),
        ProvisionStep::Certificates => prep::ensure_certificates(ctx).await,
        ProvisionStep::EnsureCluster => cluster::ensure_cluster(ctx).await,
        ProvisionStep::Namespace => cluster::ensure_namespace(ctx).await,
        ProvisionStep::TlsSecret => cluster::ensure_tls_secret(ctx).await,
        ProvisionStep::StartServices(services) => cluster::start_services(ctx, services).await,
        ProvisionStep::ApplyVaultManifests => cluster::apply_vault_manifests(ctx).await,
        ProvisionStep::WaitForVault => cluster::wait_for_vault(ctx).await,
        ProvisionStep::PortForward { service, .. } => cluster::open_port_forward(ctx, service).await,
        ProvisionStep::VaultHealth => vault::gate_health(ctx).await,
        ProvisionStep::SecretsEngine => vault::enable_kv(ctx).await,
        ProvisionStep::WriteSecrets => vault::write_secrets(ctx).await,
        ProvisionStep::StoreTls => vault::store_tls(ctx).await,
        ProvisionStep::KubernetesAuth => vault::enable_kubernetes_auth(ctx).await,
        ProvisionStep::KubernetesAuthConfig => vault::configure_kubernetes_auth(ctx).await,
        ProvisionStep::Policies => vault::write_policies(ctx).await,
        ProvisionStep::Roles => vault::write_roles(ctx).await,
        ProvisionStep::UiToken => vault::issue_ui_token(ctx).await,
        ProvisionStep::ApplyManifests => cluster::apply_manifests(ctx).await,
        ProvisionStep::WaitForDeployments => cluster::wait_for_deployments(ctx).await,
    }
}

fn failure_reason(err: WorkflowError) -> String {
    match err {
        WorkflowError::StepFailed { reason, .. } => reason,
        other => other.to_string(),
    }
}

/// Run `steps` in order, appending one result per executed step to `report`.
///
/// Fail-fast: the first required step that fails marks the context failed and
/// returns `WorkflowError::StepFailed`; later steps are not run.
pub async fn run_steps(
    steps: &[ProvisionStep],
    ctx: &mut ProvisionContext,
    report: &mut WorkflowReport,
) -> Result<(), WorkflowError> {
    let total = steps.len();
    for (index, step) in steps.iter().enumerate() {
        let name = step.name();
        log::info!("[Workflow] [{}/{}] {} ...", index + 1, total, name);
        let start = Instant::now();
        let result = execute(step, ctx).await;
        let elapsed = start.elapsed();

        let completion = match result {
            Ok(completion) => completion,
            Err(e) if !step.required() => Completion::soft_failed(failure_reason(e)),
            Err(e) => {
                let reason = failure_reason(e);
                log::error!(
                    "[Workflow] {} failed after {:.1}s: {}",
                    name,
                    elapsed.as_secs_f64(),
                    reason
                );
                report.record(StepResult {
                    name: name.clone(),
                    outcome: StepOutcome::Failed,
                    detail: Some(reason.clone()),
                    elapsed,
                });
                ctx.mark_failed();
                return Err(WorkflowError::StepFailed { step: name, reason });
            }
        };

        let detail = completion.detail.clone().unwrap_or_default();
        match completion.outcome {
            StepOutcome::Succeeded => {
                crate::log_success!("[Workflow] {} ({:.1}s) {}", name, elapsed.as_secs_f64(), detail);
            }
            StepOutcome::Skipped => log::info!("[Workflow] {} skipped: {}", name, detail),
            StepOutcome::SoftFailed | StepOutcome::Failed => {
                log::warn!("[Workflow] {} incomplete, continuing: {}", name, detail);
            }
        }
        report.record(StepResult {
            name,
            outcome: completion.outcome,
            detail: completion.detail,
            elapsed,
        });
    }
    Ok(())
}

// ============================================================================
// Plans
// ============================================================================

/// Prerequisites and certificates, for every environment.
pub fn preparation_plan() -> Vec<ProvisionStep> {
    vec![ProvisionStep::Prerequisites, ProvisionStep::Certificates]
}

/// Cluster bring-up before images are built.
pub fn cluster_infrastructure_plan() -> Vec<ProvisionStep> {
    vec![
        ProvisionStep::EnsureCluster,
        ProvisionStep::Namespace,
        ProvisionStep::TlsSecret,
    ]
}

/// Vault in-cluster rollout, plus the session port-forward that reaches it
/// when the cluster does not publish the Vault port itself.
pub fn cluster_vault_plan(vault_forward: Option<&str>) -> Vec<ProvisionStep> {
    let mut steps = vec![ProvisionStep::ApplyVaultManifests, ProvisionStep::WaitForVault];
    if let Some(service) = vault_forward {
        steps.push(ProvisionStep::PortForward {
            service: service.to_string(),
            required: true,
        });
    }
    steps
}

/// Vault provisioning for the given environment and auth mode.
///
/// `static` writes secrets only; `rbac` and `both` add Kubernetes auth (in a
/// cluster), policies and roles.
pub fn vault_plan(env: Environment, auth_mode: AuthMode, ui_token: bool) -> Vec<ProvisionStep> {
    let mut steps = vec![
        ProvisionStep::VaultHealth,
        ProvisionStep::SecretsEngine,
        ProvisionStep::WriteSecrets,
        ProvisionStep::StoreTls,
    ];
    if auth_mode.wants_rbac() {
        if env == Environment::Cluster {
            steps.push(ProvisionStep::KubernetesAuth);
            steps.push(ProvisionStep::KubernetesAuthConfig);
        }
        steps.push(ProvisionStep::Policies);
        if env == Environment::Cluster {
            steps.push(ProvisionStep::Roles);
        }
    }
    if ui_token {
        steps.push(ProvisionStep::UiToken);
    }
    steps
}

/// Reach Vault for a read-only inspection: session forward when needed, then health.
pub fn inspection_plan(vault_forward: Option<&str>) -> Vec<ProvisionStep> {
    let mut steps = Vec::new();
    if let Some(service) = vault_forward {
        steps.push(ProvisionStep::PortForward { service: service.to_string(), required: true });
    }
    steps.push(ProvisionStep::VaultHealth);
    steps
}

/// Remaining manifests, rollout wait and the persistent ingress forwards.
pub fn cluster_rollout_plan(persistent_services: &[String]) -> Vec<ProvisionStep> {
    let mut steps = vec![ProvisionStep::ApplyManifests, ProvisionStep::WaitForDeployments];
    steps.extend(persistent_services.iter().map(|service| ProvisionStep::PortForward {
        service: service.clone(),
        required: false,
    }));
    steps
}

/// Local stack: Vault first, everything else after provisioning.
pub fn local_infrastructure_plan(vault_service: &str) -> Vec<ProvisionStep> {
    vec![ProvisionStep::StartServices(vec![vault_service.to_string()])]
}

pub fn local_rollout_plan() -> Vec<ProvisionStep> {
    vec![ProvisionStep::StartServices(Vec::new())]
}

/// Names of a plan's steps, for dry listings and tests.
pub fn plan_names(steps: &[ProvisionStep]) -> Vec<String> {
    steps.iter().map(ProvisionStep::name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_mode_writes_secrets_only() {
        let names = plan_names(&vault_plan(Environment::Cluster, AuthMode::Static, false));
        assert_eq!(
            names,
            vec!["vault-health", "secrets-engine", "write-secrets", "store-tls"]
        );
    }

    #[test]
    fn test_rbac_cluster_plan_order() {
        let names = plan_names(&vault_plan(Environment::Cluster, AuthMode::Both, true));
        let auth = names.iter().position(|n| n == "kubernetes-auth").unwrap();
        let config = names.iter().position(|n| n == "kubernetes-auth-config").unwrap();
        let roles = names.iter().position(|n| n == "roles").unwrap();
        assert!(auth < config && config < roles);
        assert_eq!(names.first().unwrap(), "vault-health");
        assert_eq!(names.last().unwrap(), "ui-token");
    }

    #[test]
    fn test_local_rbac_has_policies_without_roles() {
        let names = plan_names(&vault_plan(Environment::Local, AuthMode::Rbac, false));
        assert!(names.contains(&"policies".to_string()));
        assert!(!names.contains(&"roles".to_string()));
        assert!(!names.contains(&"kubernetes-auth".to_string()));
    }

    #[test]
    fn test_optional_steps() {
        assert!(!ProvisionStep::UiToken.required());
        assert!(!ProvisionStep::Certificates.required());
        assert!(ProvisionStep::WriteSecrets.required());
        assert!(ProvisionStep::PortForward {
            service: "vault".to_string(),
            required: true
        }
        .required());
    }

    #[test]
    fn test_rollout_plan_appends_forwards() {
        let plan = cluster_rollout_plan(&["nginx".to_string()]);
        assert_eq!(plan_names(&plan), vec!["manifests", "rollout", "port-forward nginx"]);
    }

    #[test]
    fn test_cluster_vault_plan_forward_is_conditional() {
        assert_eq!(
            plan_names(&cluster_vault_plan(None)),
            vec!["vault-manifests", "vault-rollout"]
        );
        let plan = cluster_vault_plan(Some("vault"));
        assert_eq!(
            plan.last(),
            Some(&ProvisionStep::PortForward {
                service: "vault".to_string(),
                required: true
            })
        );
    }

    #[test]
    fn test_inspection_plan_ends_at_health() {
        assert_eq!(plan_names(&inspection_plan(None)), vec!["vault-health"]);
        assert_eq!(
            plan_names(&inspection_plan(Some("vault"))),
            vec!["port-forward vault", "vault-health"]
        );
    }

    #[test]
    fn test_step_names() {
        assert_eq!(ProvisionStep::StartServices(vec![]).name(), "compose-up");
        assert_eq!(
            ProvisionStep::StartServices(vec!["vault".to_string()]).name(),
            "compose-up vault"
        );
    }
}
