//! Deployment orchestration: build driver plus the provisioning workflow.
//!
//! `deploy` runs in phases, each a plan of steps executed by
//! [`executor::run_steps`]:
//!
//! - local: Preparation -> Building -> Infrastructure (compose `vault`) ->
//!   Provisioning -> Rollout (compose all) -> Completed
//! - cluster: Preparation -> Infrastructure (cluster, namespace, TLS secret) ->
//!   Building (+ import) -> Provisioning (Vault rollout, port-forward, Vault) ->
//!   Rollout (manifests, waits, ingress forward) -> Completed
//!
//! The first hard failure aborts the run; re-running is the recovery path.

pub mod build_driver;
pub mod checkpoint;
pub mod executor;
pub mod phases;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

pub use build_driver::{BuildDriver, BuildReport, DockerImageStore, ImageStore};
pub use checkpoint::WorkflowReport;
pub use executor::{run_steps, ProvisionStep};
pub use state::{CertPair, ProvisionContext, WorkflowPhase};

use crate::cluster::{ClusterManager, Compose, ControlPlane, Kubectl};
use crate::config::secrets::load_secrets;
use crate::config::DeployConfig;
use crate::error::{Result, WorkflowError};
use crate::hardware::{HostDetector, PlatformTag};
use crate::models::{Action, Environment, ImageDescriptor, StepOutcome, StepResult};
use crate::smoke::{load_probes, SmokeRunner};
use crate::system::paths::ProjectPaths;
use crate::vault::{audit_secrets, VaultClient};

/// Image descriptors with contexts and Dockerfiles resolved against the project root.
pub fn resolve_images(images: &[ImageDescriptor], paths: &ProjectPaths) -> Vec<ImageDescriptor> {
    images
        .iter()
        .map(|image| {
            let mut resolved = image.clone();
            resolved.context = paths.resolve(&image.context);
            resolved.dockerfile = image.dockerfile.as_ref().map(|d| paths.resolve(d));
            resolved
        })
        .collect()
}

/// Runs one `<environment> <action>` invocation
pub struct Orchestrator {
    config: DeployConfig,
    paths: ProjectPaths,
    host: HostDetector,
}

impl Orchestrator {
    pub fn new(config: DeployConfig, paths: ProjectPaths) -> Self {
        Orchestrator {
            config,
            paths,
            host: HostDetector::new(),
        }
    }

    /// Pin the build platform instead of detecting it.
    pub fn with_platform(mut self, platform: PlatformTag) -> Self {
        self.host = HostDetector::with_platform(platform);
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub async fn run(&mut self, environment: Environment, action: Action) -> Result<()> {
        log::info!(
            "[Terrarium] {} {} (namespace {}, auth {})",
            action,
            environment,
            self.config.namespace,
            self.config.vault.auth_mode.as_str()
        );
        match action {
            Action::Deploy => self.deploy(environment).await,
            Action::Test => self.test().await,
            Action::Clean => self.clean(environment).await,
            Action::Logs => self.logs(environment).await,
            Action::Secrets => self.secrets(environment).await,
        }
    }

    fn control_plane(&self) -> Arc<dyn ControlPlane> {
        Arc::new(Kubectl::new(
            self.config.timeouts.command(),
            self.config.timeouts.wait_secs,
        ))
    }

    fn cluster_manager(&self) -> ClusterManager {
        phases::cluster::cluster_manager_for(&self.config)
    }

    fn compose(&self) -> Compose {
        phases::cluster::compose_for(&self.config, self.paths.root())
    }

    // ============================================================================
    // deploy
    // ============================================================================

    /// Build a provisioning context for `environment`.
    pub fn context(&self, environment: Environment) -> Result<ProvisionContext> {
        let vault = VaultClient::new(
            &self.config.vault.addr,
            &self.config.vault.token,
            &self.config.vault.mount,
            self.config.timeouts.http(),
        )?;
        let secrets = load_secrets(&self.paths.secrets_file());
        let mut ctx = ProvisionContext::new(
            self.config.clone(),
            self.paths.clone(),
            environment,
            vault,
        )
        .with_secrets(secrets);
        if environment == Environment::Cluster {
            ctx = ctx.with_control_plane(self.control_plane());
        }
        Ok(ctx)
    }

    async fn deploy(&mut self, environment: Environment) -> Result<()> {
        let platform = self.host.platform();
        let mut ctx = self.context(environment)?;
        let mut report = WorkflowReport::new();

        let outcome = match environment {
            Environment::Local => self.deploy_local(&mut ctx, &mut report, platform).await,
            Environment::Cluster => self.deploy_cluster(&mut ctx, &mut report, platform).await,
        };

        report.log_summary();
        match outcome {
            Ok(()) => {
                let _ = ctx.transition_to(WorkflowPhase::Completed);
                let elapsed = ctx.started.elapsed().unwrap_or_default();
                crate::log_success!(
                    "[Terrarium] Deployment complete in {:.1}s",
                    elapsed.as_secs_f64()
                );
                print_access_info(&ctx);
                Ok(())
            }
            Err(e) => {
                ctx.mark_failed();
                let completed = report.count(StepOutcome::Succeeded);
                Err(Box::new(WorkflowError::Aborted {
                    completed,
                    reason: e.to_string(),
                }))
            }
        }
    }

    fn enter(
        ctx: &mut ProvisionContext,
        phase: WorkflowPhase,
    ) -> std::result::Result<(), WorkflowError> {
        ctx.transition_to(phase).map_err(|reason| WorkflowError::StepFailed {
            step: phase.as_str().to_string(),
            reason,
        })?;
        log::info!("[Workflow] ==== {} ====", phase.as_str());
        Ok(())
    }

    async fn deploy_local(
        &self,
        ctx: &mut ProvisionContext,
        report: &mut WorkflowReport,
        platform: PlatformTag,
    ) -> std::result::Result<(), WorkflowError> {
        let cfg = self.config.clone();

        run_steps(&executor::preparation_plan(), ctx, report).await?;

        Self::enter(ctx, WorkflowPhase::Building)?;
        self.build_images(report, platform, None).await?;

        Self::enter(ctx, WorkflowPhase::Infrastructure)?;
        run_steps(
            &executor::local_infrastructure_plan(&cfg.compose.vault_service),
            ctx,
            report,
        )
        .await?;

        Self::enter(ctx, WorkflowPhase::Provisioning)?;
        let plan = executor::vault_plan(
            Environment::Local,
            cfg.vault.auth_mode,
            cfg.vault.ui_token.enabled,
        );
        run_steps(&plan, ctx, report).await?;

        Self::enter(ctx, WorkflowPhase::Rollout)?;
        run_steps(&executor::local_rollout_plan(), ctx, report).await
    }

    async fn deploy_cluster(
        &self,
        ctx: &mut ProvisionContext,
        report: &mut WorkflowReport,
        platform: PlatformTag,
    ) -> std::result::Result<(), WorkflowError> {
        let cfg = self.config.clone();

        run_steps(&executor::preparation_plan(), ctx, report).await?;

        Self::enter(ctx, WorkflowPhase::Infrastructure)?;
        run_steps(&executor::cluster_infrastructure_plan(), ctx, report).await?;

        Self::enter(ctx, WorkflowPhase::Building)?;
        let manager = self.cluster_manager();
        self.build_images(report, platform, Some(&manager)).await?;

        Self::enter(ctx, WorkflowPhase::Provisioning)?;
        let vault_forward = cfg.vault_port_forward();
        run_steps(
            &executor::cluster_vault_plan(vault_forward.as_ref().map(|pf| pf.service.as_str())),
            ctx,
            report,
        )
        .await?;
        let plan = executor::vault_plan(
            Environment::Cluster,
            cfg.vault.auth_mode,
            cfg.vault.ui_token.enabled,
        );
        run_steps(&plan, ctx, report).await?;

        Self::enter(ctx, WorkflowPhase::Rollout)?;
        let persistent: Vec<String> = cfg
            .port_forwards
            .iter()
            .filter(|pf| pf.persistent)
            .map(|pf| pf.service.clone())
            .collect();
        run_steps(&executor::cluster_rollout_plan(&persistent), ctx, report).await
    }

    /// Change-aware builds, then import into the cluster when one is given.
    async fn build_images(
        &self,
        report: &mut WorkflowReport,
        platform: PlatformTag,
        import_into: Option<&ClusterManager>,
    ) -> std::result::Result<(), WorkflowError> {
        let images = resolve_images(&self.config.images, &self.paths);
        let store = DockerImageStore::new(self.config.timeouts.command(), self.config.timeouts.build());
        let driver = BuildDriver::new(store, platform).with_no_cache(self.config.no_cache);

        let start = Instant::now();
        let reports = match driver.ensure_all(&images).await {
            Ok(reports) => reports,
            Err(e) => {
                log::error!("[Build] {}", e);
                report.record(StepResult {
                    name: "build-images".to_string(),
                    outcome: StepOutcome::Failed,
                    detail: Some(e.to_string()),
                    elapsed: start.elapsed(),
                });
                return Err(e.into());
            }
        };
        let built = reports.iter().filter(|r| r.built).count();
        report.record(StepResult {
            name: "build-images".to_string(),
            outcome: StepOutcome::Succeeded,
            detail: Some(format!("{} built, {} cached", built, reports.len() - built)),
            elapsed: start.elapsed(),
        });

        let Some(manager) = import_into else {
            return Ok(());
        };
        let start = Instant::now();
        for image in &images {
            let reference = image.reference();
            log::info!("[Build] Importing {} into {}", reference, manager.name());
            if let Err(e) = manager.import_image(&reference).await {
                report.record(StepResult {
                    name: "import-images".to_string(),
                    outcome: StepOutcome::Failed,
                    detail: Some(e.to_string()),
                    elapsed: start.elapsed(),
                });
                return Err(e.into());
            }
        }
        report.record(StepResult {
            name: "import-images".to_string(),
            outcome: StepOutcome::Succeeded,
            detail: Some(format!("{} image(s) into {}", images.len(), manager.name())),
            elapsed: start.elapsed(),
        });
        Ok(())
    }

    // ============================================================================
    // test / clean / logs / secrets
    // ============================================================================

    async fn test(&self) -> Result<()> {
        let file = self
            .config
            .smoke
            .file
            .as_ref()
            .map(|f| self.paths.resolve(f))
            .unwrap_or_else(|| self.paths.smoke_tests_file());
        let probes = load_probes(&file);
        log::info!("[Smoke] Running {} probe(s)", probes.len());
        let runner = SmokeRunner::new(&self.config.smoke, self.config.timeouts.http())?;
        runner.run(&probes).await.into_result()?;
        crate::log_success!("[Smoke] All required smoke tests passed");
        Ok(())
    }

    async fn clean(&self, environment: Environment) -> Result<()> {
        let mut stopped = 0;
        for pid_file in self.paths.recorded_pid_files() {
            if phases::port_forward::stop_recorded(&pid_file) {
                stopped += 1;
            }
        }
        log::info!("[Terrarium] Stopped {} recorded port-forward(s)", stopped);

        match environment {
            Environment::Local => self.compose().down().await?,
            Environment::Cluster => self.cluster_manager().delete().await?,
        }
        crate::log_success!("[Terrarium] {} environment cleaned", environment);
        Ok(())
    }

    async fn logs(&self, environment: Environment) -> Result<()> {
        let tail = self.config.compose.log_tail;
        match environment {
            Environment::Local => {
                let output = self.compose().logs(tail).await?;
                println!("{}", output);
            }
            Environment::Cluster => {
                let cp = self.control_plane();
                let namespace = &self.config.namespace;
                let deployments = cp.list_deployments(namespace).await?;
                if deployments.is_empty() {
                    log::warn!("[Cluster] No deployments in namespace {}", namespace);
                }
                for deployment in deployments {
                    println!("==== deployment/{} ====", deployment);
                    match cp.deployment_logs(&deployment, namespace, tail).await {
                        Ok(output) => println!("{}", output),
                        Err(e) => log::warn!("[Cluster] Logs for {} unavailable: {}", deployment, e),
                    }
                }
            }
        }
        Ok(())
    }

    /// Report Vault status and check the deployed secrets are all there.
    async fn secrets(&self, environment: Environment) -> Result<()> {
        let mut ctx = self.context(environment)?;
        let forward = match environment {
            Environment::Cluster => self.config.vault_port_forward(),
            Environment::Local => None,
        };
        let mut report = WorkflowReport::new();
        run_steps(
            &executor::inspection_plan(forward.as_ref().map(|pf| pf.service.as_str())),
            &mut ctx,
            &mut report,
        )
        .await?;
        if let Some(health) = report.results().last().and_then(|r| r.detail.as_deref()) {
            log::info!("[Vault] {} at {}", health, ctx.vault.addr());
        }

        let audit = audit_secrets(&ctx.vault, &ctx.secrets).await?;
        println!("Secrets under {}/:", ctx.vault.mount());
        for line in audit.summary_lines() {
            println!("{}", line);
        }
        if !audit.is_complete() {
            return Err(Box::new(WorkflowError::StepFailed {
                step: "secrets".to_string(),
                reason: format!(
                    "{} missing, {} incomplete; re-run deploy",
                    audit.missing.len(),
                    audit.incomplete.len()
                ),
            }));
        }
        crate::log_success!("[Vault] All {} secret(s) present", audit.present.len());
        Ok(())
    }
}

fn print_access_info(ctx: &ProvisionContext) {
    println!();
    println!("Access:");
    println!("  Gateway:  {}", ctx.config.smoke.gateway_url);
    println!("  Vault UI: {}/ui", ctx.vault.addr());
    for pf in &ctx.config.port_forwards {
        if pf.persistent {
            println!(
                "  svc/{} forwarded on localhost:{} (stop with `clean`)",
                pf.service, pf.local_port
            );
        }
    }
    if let Some(token) = &ctx.ui_token {
        println!("  Vault UI token: {}", token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_resolve_images_against_root() {
        let paths = ProjectPaths::new("/srv/terrarium");
        let images = vec![
            ImageDescriptor::new("edge-terrarium-logthon", "apps/logthon")
                .with_dockerfile("apps/logthon/Dockerfile.prod"),
            ImageDescriptor::new("abs", "/opt/ctx"),
        ];
        let resolved = resolve_images(&images, &paths);
        assert_eq!(resolved[0].context, PathBuf::from("/srv/terrarium/apps/logthon"));
        assert_eq!(
            resolved[0].dockerfile,
            Some(PathBuf::from("/srv/terrarium/apps/logthon/Dockerfile.prod"))
        );
        assert_eq!(resolved[1].context, PathBuf::from("/opt/ctx"));
    }

    #[test]
    fn test_cluster_context_has_control_plane() {
        let orchestrator = Orchestrator::new(DeployConfig::default(), ProjectPaths::new("/srv"))
            .with_platform(PlatformTag::LinuxAmd64);
        let ctx = orchestrator.context(Environment::Cluster).unwrap();
        assert!(ctx.cluster().is_some());
        let ctx = orchestrator.context(Environment::Local).unwrap();
        assert!(ctx.cluster().is_none());
        assert!(!ctx.secrets.is_empty());
    }
}
