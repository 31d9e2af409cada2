//! Vault provisioning steps.
//!
//! Every step is idempotent: engines and auth methods that already exist
//! count as success, and secrets, policies and roles are overwritten.

use super::Completion;
use crate::cluster::kubectl::{API_SERVER_ENV_COMMAND, IN_CLUSTER_API_SERVER, SERVICE_ACCOUNT_TOKEN_PATH};
use crate::error::WorkflowError;
use crate::models::{Environment, SecretRecord};
use crate::orchestrator::state::ProvisionContext;
use crate::vault::{KubernetesAuthConfig, Provisioned};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;

fn failed(step: &str, reason: impl ToString) -> WorkflowError {
    WorkflowError::StepFailed {
        step: step.to_string(),
        reason: reason.to_string(),
    }
}

fn provisioned(outcome: Provisioned, what: &str) -> Completion {
    match outcome {
        Provisioned::Created => Completion::done_with(format!("{} enabled", what)),
        Provisioned::AlreadyExists => Completion::done_with(format!("{} already enabled", what)),
    }
}

/// Poll `sys/health` until Vault answers 200 or 503.
pub async fn gate_health(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let attempts = ctx.config.vault.health_attempts;
    let interval = Duration::from_secs(ctx.config.vault.health_interval_secs);
    log::info!(
        "[Vault] Waiting for {} (up to {} attempts)",
        ctx.vault.addr(),
        attempts
    );
    let health = ctx
        .vault
        .wait_until_healthy(attempts, interval)
        .await
        .map_err(|e| failed("vault-health", e))?;

    let detail = match health.body.version.as_deref() {
        Some(version) => format!("status {}, version {}", health.status, version),
        None => format!("status {}", health.status),
    };
    Ok(Completion::done_with(detail))
}

pub async fn enable_kv(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let outcome = ctx
        .vault
        .enable_kv_engine()
        .await
        .map_err(|e| failed("secrets-engine", e))?;
    Ok(provisioned(outcome, &format!("kv-v2 at {}/", ctx.vault.mount())))
}

pub async fn write_secrets(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    if ctx.secrets.is_empty() {
        return Ok(Completion::skipped("no secrets configured"));
    }
    for secret in &ctx.secrets {
        ctx.vault
            .write_secret(secret)
            .await
            .map_err(|e| failed("write-secrets", e))?;
        log::debug!(
            "[Vault] Wrote {} ({} keys)",
            ctx.config.secret_data_path(&secret.path),
            secret.data.len()
        );
    }
    Ok(Completion::done_with(format!("{} secret(s)", ctx.secrets.len())))
}

/// Base64-encoded TLS pair for storage in Vault.
pub fn tls_record(path: &str, cert_pem: &[u8], key_pem: &[u8]) -> SecretRecord {
    SecretRecord::new(path)
        .with("tls.crt", STANDARD.encode(cert_pem))
        .with("tls.key", STANDARD.encode(key_pem))
}

/// Store the discovered certificate pair, base64-encoded.
pub async fn store_tls(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let Some(pair) = ctx.cert.clone() else {
        return Ok(Completion::skipped("no certificate"));
    };
    let cert = std::fs::read(&pair.cert).map_err(|e| failed("store-tls", e))?;
    let key = std::fs::read(&pair.key).map_err(|e| failed("store-tls", e))?;
    let record = tls_record(&ctx.config.vault.tls_secret_path, &cert, &key);
    ctx.vault
        .write_secret(&record)
        .await
        .map_err(|e| failed("store-tls", e))?;
    Ok(Completion::done_with(ctx.config.secret_data_path(&record.path)))
}

pub async fn enable_kubernetes_auth(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let outcome = ctx
        .vault
        .enable_auth_method("kubernetes")
        .await
        .map_err(|e| failed("kubernetes-auth", e))?;
    Ok(provisioned(outcome, "kubernetes auth"))
}

/// `https://host:port` from the Vault pod's service environment, if it names a host.
pub fn in_cluster_host(echoed: &str) -> Option<String> {
    let echoed = echoed.trim();
    let url = reqwest::Url::parse(echoed).ok()?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Some(echoed.to_string()),
        _ => None,
    }
}

/// Point Kubernetes auth at the API server with a reviewer token.
///
/// The host is the one Vault itself reaches, read from the Vault pod's
/// environment and falling back to the cluster DNS name. The token comes
/// from `kubectl create token`; when that fails, the token mounted into the
/// Vault pod is read instead.
pub async fn configure_kubernetes_auth(
    ctx: &mut ProvisionContext,
) -> Result<Completion, WorkflowError> {
    const STEP: &str = "kubernetes-auth-config";
    let Some(cp) = ctx.cluster() else {
        return Ok(Completion::skipped("no cluster in this environment"));
    };
    let namespace = ctx.namespace().to_string();

    let vault_deployment = ctx.config.cluster.vault_deployment.clone();

    let api_server = match cp
        .exec_in_deployment(&vault_deployment, &namespace, &API_SERVER_ENV_COMMAND)
        .await
    {
        Ok(echoed) => in_cluster_host(&echoed).unwrap_or_else(|| {
            log::warn!(
                "[Vault] Pod environment gave no API server ('{}'), using {}",
                echoed.trim(),
                IN_CLUSTER_API_SERVER
            );
            IN_CLUSTER_API_SERVER.to_string()
        }),
        Err(e) => {
            log::warn!(
                "[Vault] Cannot read API server from the Vault pod: {}, using {}",
                e,
                IN_CLUSTER_API_SERVER
            );
            IN_CLUSTER_API_SERVER.to_string()
        }
    };

    let reviewer = &ctx.config.vault.reviewer_service_account;
    let token = match cp.create_service_account_token(reviewer, &namespace).await {
        Ok(token) => token,
        Err(e) => {
            log::warn!(
                "[Vault] Cannot create token for {}: {}, reading mounted token",
                reviewer,
                e
            );
            cp.exec_in_deployment(
                &vault_deployment,
                &namespace,
                &["cat", SERVICE_ACCOUNT_TOKEN_PATH],
            )
            .await
            .map(|t| t.trim().to_string())
            .map_err(|e| failed(STEP, format!("no reviewer token available: {}", e)))?
        }
    };
    if token.is_empty() {
        return Err(failed(STEP, "reviewer token is empty"));
    }

    let config = KubernetesAuthConfig {
        kubernetes_host: api_server.clone(),
        token_reviewer_jwt: Some(token),
        kubernetes_ca_cert: None,
        disable_local_ca_jwt: false,
    };
    ctx.vault
        .configure_kubernetes_auth(&config)
        .await
        .map_err(|e| failed(STEP, e))?;

    Ok(Completion::done_with(api_server))
}

pub async fn write_policies(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let policies = ctx.config.effective_policies();
    for policy in &policies {
        ctx.vault
            .write_policy(policy)
            .await
            .map_err(|e| failed("policies", e))?;
        log::debug!("[Vault] Policy {} written", policy.name);
    }
    Ok(Completion::done_with(format!("{} polic(ies)", policies.len())))
}

pub async fn write_roles(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    if ctx.environment == Environment::Local {
        return Ok(Completion::skipped("kubernetes roles need a cluster"));
    }
    let roles = ctx.config.effective_roles();
    for role in &roles {
        ctx.vault
            .write_role(role)
            .await
            .map_err(|e| failed("roles", e))?;
        log::debug!(
            "[Vault] Role {} -> {:?} in {:?}",
            role.name,
            role.policies,
            role.namespaces
        );
    }
    Ok(Completion::done_with(format!("{} role(s)", roles.len())))
}

/// Issue the UI access token. Failure here never aborts a deploy.
pub async fn issue_ui_token(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let settings = ctx.config.vault.ui_token.clone();
    if !settings.enabled {
        return Ok(Completion::skipped("disabled"));
    }
    for policy in ctx.config.administrative_ui_policies() {
        log::warn!(
            "[Vault] UI token policy '{}' grants sudo; the token is effectively root",
            policy.name
        );
    }
    match ctx
        .vault
        .create_token(&settings.policies, &settings.ttl, &settings.display_name)
        .await
    {
        Ok(token) => {
            ctx.ui_token = Some(token);
            Ok(Completion::done_with(format!(
                "policies {}, ttl {}",
                settings.policies.join(","),
                settings.ttl
            )))
        }
        Err(e) => Ok(Completion::soft_failed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_record_is_base64() {
        let record = tls_record("terrarium/tls", b"CERT", b"KEY");
        assert_eq!(record.path, "terrarium/tls");
        assert_eq!(record.data["tls.crt"], "Q0VSVA==");
        assert_eq!(record.data["tls.key"], "S0VZ");
    }

    #[test]
    fn test_in_cluster_host() {
        assert_eq!(
            in_cluster_host("https://10.43.0.1:443\n").as_deref(),
            Some("https://10.43.0.1:443")
        );
        // Unset service variables leave only the separators
        assert_eq!(in_cluster_host("https://:\n"), None);
        assert_eq!(in_cluster_host(""), None);
    }

    #[test]
    fn test_provisioned_detail() {
        let c = provisioned(Provisioned::AlreadyExists, "kubernetes auth");
        assert_eq!(c.detail.as_deref(), Some("kubernetes auth already enabled"));
    }
}
