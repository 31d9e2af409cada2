//! `docker compose` stack for the local environment.

use crate::config::ComposeSettings;
use crate::error::ClusterError;
use crate::system::{run_checked, run_command, run_streaming};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A compose project rooted at one compose file
#[derive(Debug, Clone)]
pub struct Compose {
    file: PathBuf,
    project: String,
    timeout: Duration,
}

impl Compose {
    pub fn new(settings: &ComposeSettings, project_root: &Path, timeout: Duration) -> Self {
        let file = if settings.file.is_absolute() {
            settings.file.clone()
        } else {
            project_root.join(&settings.file)
        };
        Compose {
            file,
            project: settings.project.clone(),
            timeout,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// `docker compose -f <file> -p <project> <args...>`
    pub fn args<'a>(&'a self, file: &'a str, extra: &[&'a str]) -> Vec<&'a str> {
        let mut args = vec!["compose", "-f", file, "-p", self.project.as_str()];
        args.extend_from_slice(extra);
        args
    }

    fn ensure_file(&self) -> Result<String, ClusterError> {
        if !self.file.is_file() {
            return Err(ClusterError::Unavailable(format!(
                "compose file not found: {}",
                self.file.display()
            )));
        }
        Ok(self.file.to_string_lossy().to_string())
    }

    /// Start `services` (all when empty) detached.
    pub async fn up(&self, services: &[&str]) -> Result<(), ClusterError> {
        let file = self.ensure_file()?;
        let mut extra = vec!["up", "-d"];
        extra.extend_from_slice(services);
        let args = self.args(&file, &extra);
        let code = run_streaming("docker", &args, None, self.timeout).await?;
        if code != 0 {
            return Err(ClusterError::CommandFailed {
                cmd: format!("docker {}", args.join(" ")),
                code,
                stderr: "see output above".to_string(),
            });
        }
        Ok(())
    }

    /// Stop the stack and remove its volumes. A stack that is not running is fine.
    pub async fn down(&self) -> Result<(), ClusterError> {
        let file = match self.ensure_file() {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[Compose] {}", e);
                return Ok(());
            }
        };
        let args = self.args(&file, &["down", "-v", "--remove-orphans"]);
        let out = run_command("docker", &args, None, self.timeout).await?;
        if !out.success() {
            log::warn!("[Compose] down reported: {}", out.stderr.trim());
        }
        Ok(())
    }

    pub async fn logs(&self, tail: u32) -> Result<String, ClusterError> {
        let file = self.ensure_file()?;
        let tail = tail.to_string();
        let args = self.args(&file, &["logs", "--no-color", "--tail", tail.as_str()]);
        Ok(run_checked("docker", &args, None, self.timeout).await?.stdout)
    }
}
