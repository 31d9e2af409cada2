/// System module: bounded external command execution, tool discovery, logging macros

pub mod health;
pub mod paths;

use crate::error::ClusterError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Names accepted for Kubernetes objects and image references passed to CLIs.
static SAFE_ARG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/:@\-]*$").expect("Invalid safe argument regex")
});

/// Info line rendered as `[SUCCESS]`
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        // target="success" renders as [SUCCESS]
        log::info!(target: "success", "{}", msg);
    }}
}

/// Captured result of a finished external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Trimmed stdout.
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }
}

/// Render `program args...` for log and error messages.
pub fn display_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| {
        if a.contains(' ') {
            format!("'{}'", a)
        } else {
            a.to_string()
        }
    }));
    parts.join(" ")
}

/// Whether `value` is safe to hand to kubectl/docker as a single name argument.
pub fn is_safe_name(value: &str) -> bool {
    SAFE_ARG.is_match(value)
}

/// Run `program` to completion with a hard timeout, capturing output.
///
/// A non-zero exit is NOT an error here; callers decide via [`CommandOutput::success`].
/// Spawn failures and timeouts are errors.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, ClusterError> {
    let display = display_command(program, args);
    log::debug!("[System] [EXEC] {}", display);

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| ClusterError::Spawn {
        cmd: display.clone(),
        reason: e.to_string(),
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ClusterError::Spawn {
                cmd: display,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(ClusterError::Timeout {
                cmd: display,
                secs: timeout.as_secs(),
            })
        }
    };

    Ok(CommandOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Like [`run_command`] but a non-zero exit becomes `ClusterError::CommandFailed`.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, ClusterError> {
    let output = run_command(program, args, cwd, timeout).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ClusterError::CommandFailed {
            cmd: display_command(program, args),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Run a command with inherited stdio, for long builds whose progress the user should see.
pub async fn run_streaming(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<i32, ClusterError> {
    let display = display_command(program, args);
    log::debug!("[System] [EXEC] {}", display);

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn().map_err(|e| ClusterError::Spawn {
        cmd: display.clone(),
        reason: e.to_string(),
    })?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(status.code().unwrap_or(-1)),
        Ok(Err(e)) => Err(ClusterError::Spawn {
            cmd: display,
            reason: e.to_string(),
        }),
        Err(_) => {
            let _ = child.start_kill();
            Err(ClusterError::Timeout {
                cmd: display,
                secs: timeout.as_secs(),
            })
        }
    }
}

/// Check if a command exists in PATH
pub fn command_exists(cmd: &str) -> bool {
    if !is_safe_name(cmd) {
        return false;
    }
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {}", cmd))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
