//! Infrastructure and rollout steps: cluster, namespace, TLS secret,
//! manifests, deployments, compose services and port-forwards.

use super::port_forward::PortForward;
use super::Completion;
use crate::cluster::manifests::{ordered_manifests, vault_manifests};
use crate::cluster::{ClusterManager, Compose, ControlPlane};
use crate::config::DeployConfig;
use crate::error::WorkflowError;
use crate::orchestrator::state::ProvisionContext;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn failed(step: &str, reason: impl ToString) -> WorkflowError {
    WorkflowError::StepFailed {
        step: step.to_string(),
        reason: reason.to_string(),
    }
}

fn control_plane(ctx: &ProvisionContext, step: &str) -> Result<Arc<dyn ControlPlane>, WorkflowError> {
    ctx.cluster()
        .ok_or_else(|| failed(step, "no cluster control plane in this environment"))
}

/// Cluster manager for the configured provider.
pub fn cluster_manager_for(config: &DeployConfig) -> ClusterManager {
    ClusterManager::new(
        config.cluster.clone(),
        config.timeouts.command(),
        Duration::from_secs(config.timeouts.cluster_create_secs),
    )
}

/// Compose project for the local environment.
pub fn compose_for(config: &DeployConfig, project_root: &Path) -> Compose {
    Compose::new(&config.compose, project_root, config.timeouts.build())
}

pub async fn ensure_cluster(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let manager = cluster_manager_for(&ctx.config);
    let created = manager
        .ensure()
        .await
        .map_err(|e| failed("cluster", e))?;
    Ok(if created {
        Completion::done_with(format!("created {}", manager.name()))
    } else {
        Completion::done_with(format!("{} already running", manager.name()))
    })
}

pub async fn ensure_namespace(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let cp = control_plane(ctx, "namespace")?;
    let namespace = ctx.namespace().to_string();
    if cp
        .namespace_exists(&namespace)
        .await
        .map_err(|e| failed("namespace", e))?
    {
        return Ok(Completion::done_with(format!("{} exists", namespace)));
    }
    cp.create_namespace(&namespace)
        .await
        .map_err(|e| failed("namespace", e))?;
    Ok(Completion::done_with(format!("{} created", namespace)))
}

/// Replace the TLS secret with the discovered pair.
pub async fn ensure_tls_secret(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let Some(pair) = ctx.cert.clone() else {
        return Ok(Completion::skipped("no certificate"));
    };
    let cp = control_plane(ctx, "tls-secret")?;
    let name = ctx.config.cluster.tls_secret_name.clone();
    let namespace = ctx.namespace().to_string();

    cp.delete_secret(&name, &namespace)
        .await
        .map_err(|e| failed("tls-secret", e))?;
    cp.create_tls_secret(&name, &namespace, &pair.cert, &pair.key)
        .await
        .map_err(|e| failed("tls-secret", e))?;
    Ok(Completion::done_with(format!("{}/{}", namespace, name)))
}

/// `docker compose up -d` for `services`, or the whole stack when empty.
pub async fn start_services(
    ctx: &mut ProvisionContext,
    services: &[String],
) -> Result<Completion, WorkflowError> {
    let refs: Vec<&str> = services.iter().map(String::as_str).collect();
    compose_for(&ctx.config, ctx.paths.root())
        .up(&refs)
        .await
        .map_err(|e| failed("compose-up", e))?;
    Ok(Completion::done_with(if services.is_empty() {
        "all services".to_string()
    } else {
        services.join(", ")
    }))
}

async fn apply_all(
    cp: &dyn ControlPlane,
    files: &[std::path::PathBuf],
    namespace: &str,
    step: &str,
) -> Result<(), WorkflowError> {
    for file in files {
        log::info!("[Cluster] Applying {}", display_name(file));
        cp.apply_manifest(file, namespace)
            .await
            .map_err(|e| failed(step, e))?;
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub async fn apply_vault_manifests(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let cp = control_plane(ctx, "vault-manifests")?;
    let dir = ctx.paths.resolve(&ctx.config.cluster.manifests_dir);
    let files = vault_manifests(&dir, &ctx.config.cluster.vault_manifests);
    if files.is_empty() {
        return Err(failed(
            "vault-manifests",
            format!("no Vault manifests found in {}", dir.display()),
        ));
    }
    apply_all(cp.as_ref(), &files, ctx.namespace(), "vault-manifests").await?;
    Ok(Completion::done_with(format!("{} file(s)", files.len())))
}

pub async fn wait_for_vault(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let cp = control_plane(ctx, "vault-rollout")?;
    let deployment = ctx.config.cluster.vault_deployment.clone();
    cp.wait_for_deployment(&deployment, ctx.namespace())
        .await
        .map_err(|e| failed("vault-rollout", e))?;
    Ok(Completion::done_with(format!("deployment/{} available", deployment)))
}

/// Apply every remaining manifest, group by group.
pub async fn apply_manifests(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let cp = control_plane(ctx, "manifests")?;
    let dir = ctx.paths.resolve(&ctx.config.cluster.manifests_dir);
    let mut exclude = ctx.config.cluster.skip_manifests.clone();
    exclude.extend(ctx.config.cluster.vault_manifests.iter().cloned());

    let groups = ordered_manifests(&dir, &exclude)
        .map_err(|e| failed("manifests", format!("{}: {}", dir.display(), e)))?;
    let mut applied = 0;
    for (group, files) in &groups {
        log::info!("[Cluster] Applying {} ({} file(s))", group.label(), files.len());
        apply_all(cp.as_ref(), files, ctx.namespace(), "manifests").await?;
        applied += files.len();
    }
    if applied == 0 {
        return Ok(Completion::skipped("no manifests"));
    }
    Ok(Completion::done_with(format!("{} file(s)", applied)))
}

/// Wait until every deployment in the namespace is available.
pub async fn wait_for_deployments(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let cp = control_plane(ctx, "rollout")?;
    let namespace = ctx.namespace().to_string();
    let deployments = cp
        .list_deployments(&namespace)
        .await
        .map_err(|e| failed("rollout", e))?;
    for deployment in &deployments {
        cp.wait_for_deployment(deployment, &namespace)
            .await
            .map_err(|e| failed("rollout", e))?;
        log::debug!("[Cluster] deployment/{} available", deployment);
    }
    Ok(Completion::done_with(format!("{} deployment(s)", deployments.len())))
}

/// Start the configured port-forward for `service`.
///
/// Session-scoped forwarders are kept on the context and stop when it drops.
/// Persistent ones are released and left running with their pid recorded.
pub async fn open_port_forward(
    ctx: &mut ProvisionContext,
    service: &str,
) -> Result<Completion, WorkflowError> {
    let step = format!("port-forward-{}", service);
    let cp = control_plane(ctx, &step)?;
    let spec = if service == ctx.config.cluster.vault_deployment {
        ctx.config.vault_port_forward()
    } else {
        ctx.config.port_forward(service).cloned()
    };
    let Some(spec) = spec else {
        return Ok(Completion::skipped(format!("no port-forward configured for {}", service)));
    };

    let (program, args) =
        cp.port_forward_command(&spec.service, ctx.namespace(), spec.local_port, spec.remote_port);
    let pid_file = ctx.paths.pid_file(&spec.service);
    let forward = PortForward::spawn(
        &program,
        &args,
        &spec.service,
        spec.local_port,
        pid_file.clone(),
        spec.persistent,
    )
    .await
    .map_err(|e| failed(&step, e))?;

    if spec.persistent {
        let pid = forward.persist().unwrap_or_default();
        Ok(Completion::done_with(format!(
            "localhost:{} (pid {}, recorded in {})",
            spec.local_port,
            pid,
            pid_file.display()
        )))
    } else {
        ctx.port_forwards.push(forward);
        Ok(Completion::done_with(format!("localhost:{}", spec.local_port)))
    }
}
