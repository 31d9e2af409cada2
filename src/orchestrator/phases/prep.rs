//! Preparation: prerequisite tools and TLS certificate discovery.
//!
//! Certificate candidates are tried in order and the first complete pair wins:
//! 1. `<search_dir>/tls.crt` + `tls.key` for each scratch directory
//! 2. `<search_dir>/<name>.crt` + `<name>.key` for each scratch directory
//! 3. `<project>/certs/<name>.crt` + `<name>.key`
//!
//! A candidate whose certificate or key is missing is skipped.

use super::Completion;
use crate::config::CertSettings;
use crate::error::{ClusterError, WorkflowError};
use crate::orchestrator::state::{CertPair, ProvisionContext};
use crate::system::health::HealthManager;
use crate::system::{command_exists, run_checked};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fail when a required tool is missing; warn about optional ones.
pub fn check_prerequisites(ctx: &ProvisionContext) -> Result<Completion, WorkflowError> {
    let report = HealthManager::check_prerequisites(ctx.environment, ctx.config.cluster.provider)
        .into_result()
        .map_err(|e| WorkflowError::StepFailed {
            step: "prerequisites".to_string(),
            reason: e.user_message(),
        })?;
    Ok(Completion::done_with(report.message))
}

/// Candidate pairs in discovery order.
pub fn certificate_candidates(
    search_dirs: &[PathBuf],
    project_certs_dir: &Path,
    name: &str,
) -> Vec<CertPair> {
    let mut candidates = Vec::new();
    for dir in search_dirs {
        candidates.push(CertPair {
            cert: dir.join("tls.crt"),
            key: dir.join("tls.key"),
        });
    }
    for dir in search_dirs {
        candidates.push(CertPair {
            cert: dir.join(format!("{}.crt", name)),
            key: dir.join(format!("{}.key", name)),
        });
    }
    candidates.push(CertPair {
        cert: project_certs_dir.join(format!("{}.crt", name)),
        key: project_certs_dir.join(format!("{}.key", name)),
    });
    candidates
}

/// First candidate whose certificate and key both exist.
pub fn discover_certificates(
    search_dirs: &[PathBuf],
    project_certs_dir: &Path,
    name: &str,
) -> Option<CertPair> {
    certificate_candidates(search_dirs, project_certs_dir, name)
        .into_iter()
        .find(|pair| {
            let complete = pair.cert.is_file() && pair.key.is_file();
            if !complete && (pair.cert.exists() || pair.key.exists()) {
                log::debug!(
                    "[Certs] Incomplete pair skipped: {} / {}",
                    pair.cert.display(),
                    pair.key.display()
                );
            }
            complete
        })
}

/// `openssl req` arguments for a self-signed pair.
pub fn openssl_args(settings: &CertSettings, pair: &CertPair) -> Vec<String> {
    vec![
        "req".to_string(),
        "-x509".to_string(),
        "-nodes".to_string(),
        "-newkey".to_string(),
        "rsa:2048".to_string(),
        "-days".to_string(),
        settings.validity_days.to_string(),
        "-subj".to_string(),
        format!("/CN={}", settings.common_name),
        "-keyout".to_string(),
        pair.key.to_string_lossy().to_string(),
        "-out".to_string(),
        pair.cert.to_string_lossy().to_string(),
    ]
}

/// Generate a self-signed pair into `certs_dir`.
pub async fn generate_self_signed(
    settings: &CertSettings,
    certs_dir: &Path,
    timeout: Duration,
) -> Result<CertPair, ClusterError> {
    std::fs::create_dir_all(certs_dir).map_err(|e| ClusterError::Spawn {
        cmd: format!("mkdir {}", certs_dir.display()),
        reason: e.to_string(),
    })?;
    let pair = CertPair {
        cert: certs_dir.join(format!("{}.crt", settings.name)),
        key: certs_dir.join(format!("{}.key", settings.name)),
    };
    let args = openssl_args(settings, &pair);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run_checked("openssl", &arg_refs, None, timeout).await?;
    Ok(pair)
}

/// Locate a TLS pair, generating one when allowed.
///
/// Absence is a soft failure: only the TLS secret steps are skipped later.
pub async fn ensure_certificates(ctx: &mut ProvisionContext) -> Result<Completion, WorkflowError> {
    let settings = ctx.config.certs.clone();
    let certs_dir = ctx.paths.certs_dir();

    if let Some(pair) = discover_certificates(&settings.search_dirs, &certs_dir, &settings.name) {
        log::info!("[Certs] Using {}", pair.cert.display());
        let detail = pair.cert.display().to_string();
        ctx.cert = Some(pair);
        return Ok(Completion::done_with(detail));
    }

    if !settings.generate {
        return Ok(Completion::soft_failed("no certificate found"));
    }
    if !command_exists("openssl") {
        return Ok(Completion::soft_failed(
            "no certificate found and openssl is not installed",
        ));
    }

    log::info!(
        "[Certs] No certificate found, generating self-signed pair for {}",
        settings.common_name
    );
    match generate_self_signed(&settings, &certs_dir, ctx.config.timeouts.command()).await {
        Ok(pair) => {
            crate::log_success!("[Certs] Generated {}", pair.cert.display());
            let detail = format!("generated {}", pair.cert.display());
            ctx.cert = Some(pair);
            Ok(Completion::done_with(detail))
        }
        Err(e) => Ok(Completion::soft_failed(format!("generation failed: {}", e))),
    }
}
