//! Supervised `kubectl port-forward` children.
//!
//! A [`PortForward`] owns its child process: dropping it kills the child and
//! removes the pid file. A forwarder that must outlive the run is
//! [`PortForward::persist`]ed, which releases the handle and leaves the pid
//! file for `clean` to find.

use crate::error::ClusterError;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Child;

const READY_ATTEMPTS: u32 = 20;
const READY_INTERVAL: Duration = Duration::from_millis(250);

/// Whether nothing is listening on `127.0.0.1:<port>`.
pub fn port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Read a pid file. `None` when missing or malformed.
pub fn read_pid_file(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .filter(|pid| *pid > 0)
}

/// Whether `pid` is a running `port-forward`, judged by its command line.
pub fn is_port_forward(pid: i32) -> bool {
    std::fs::read(format!("/proc/{}/cmdline", pid))
        .map(|raw| raw.split(|b| *b == 0).any(|arg| arg == b"port-forward"))
        .unwrap_or(false)
}

/// Terminate the process recorded in `pid_file` and remove the file.
///
/// A pid reused by an unrelated process is left alone. Returns `true` when a
/// live forwarder was signalled.
pub fn stop_recorded(pid_file: &Path) -> bool {
    let signalled = match read_pid_file(pid_file) {
        Some(pid) if !is_port_forward(pid) => {
            log::debug!("[PortForward] pid {} is not a port-forward, leaving it", pid);
            false
        }
        Some(pid) => match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                log::info!("[PortForward] Stopped recorded forwarder (pid {})", pid);
                true
            }
            Err(e) => {
                log::debug!("[PortForward] pid {} not signalled: {}", pid, e);
                false
            }
        },
        None => false,
    };
    let _ = std::fs::remove_file(pid_file);
    signalled
}

/// A running port-forward
#[derive(Debug)]
pub struct PortForward {
    service: String,
    local_port: u16,
    pid_file: PathBuf,
    child: Option<Child>,
}

impl PortForward {
    /// Spawn `program args...` forwarding to `local_port`.
    ///
    /// When the port is occupied, a previously recorded forwarder is
    /// terminated first; if the port is still busy the spawn fails.
    pub async fn spawn(
        program: &str,
        args: &[String],
        service: &str,
        local_port: u16,
        pid_file: PathBuf,
        detach: bool,
    ) -> Result<Self, ClusterError> {
        if !port_available(local_port) {
            log::warn!(
                "[PortForward] Port {} in use, stopping recorded forwarder for {}",
                local_port,
                service
            );
            stop_recorded(&pid_file);
            let mut freed = false;
            for _ in 0..READY_ATTEMPTS {
                tokio::time::sleep(READY_INTERVAL).await;
                if port_available(local_port) {
                    freed = true;
                    break;
                }
            }
            if !freed {
                return Err(ClusterError::PortInUse(local_port));
            }
        }

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if detach {
            // Own process group so terminal signals to this run do not reach it
            #[cfg(unix)]
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| ClusterError::Spawn {
            cmd: format!("{} {}", program, args.join(" ")),
            reason: e.to_string(),
        })?;
        let pid = child.id().unwrap_or_default();
        if let Err(e) = std::fs::write(&pid_file, pid.to_string()) {
            log::warn!("[PortForward] Cannot record pid file {}: {}", pid_file.display(), e);
        }

        let mut forward = PortForward {
            service: service.to_string(),
            local_port,
            pid_file,
            child: None,
        };

        for _ in 0..READY_ATTEMPTS {
            if let Ok(Some(status)) = child.try_wait() {
                forward.child = None;
                let _ = std::fs::remove_file(&forward.pid_file);
                return Err(ClusterError::Unavailable(format!(
                    "port-forward for {} exited early ({})",
                    service, status
                )));
            }
            if TcpStream::connect(("127.0.0.1", local_port)).is_ok() {
                forward.child = Some(child);
                log::info!(
                    "[PortForward] svc/{} forwarded on localhost:{} (pid {})",
                    service,
                    local_port,
                    pid
                );
                return Ok(forward);
            }
            tokio::time::sleep(READY_INTERVAL).await;
        }

        let _ = child.start_kill();
        let _ = std::fs::remove_file(&forward.pid_file);
        Err(ClusterError::Timeout {
            cmd: format!("port-forward svc/{}", service),
            secs: (READY_INTERVAL * READY_ATTEMPTS).as_secs(),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Release the child so it outlives this process; the pid file stays.
    pub fn persist(mut self) -> Option<u32> {
        let pid = self.pid();
        self.child = None;
        pid
    }

    /// Kill the child and remove its pid file.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = std::fs::remove_file(&self.pid_file);
            log::debug!("[PortForward] svc/{} forwarder stopped", self.service);
        }
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_available_detects_listener() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_available(port));
        drop(listener);
        assert!(port_available(port));
    }

    #[test]
    fn test_read_pid_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("terrarium-port-forward-x.pid");
        assert_eq!(read_pid_file(&path), None);
        std::fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid_file(&path), Some(4242));
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(read_pid_file(&path), None);
    }

    #[test]
    fn test_stop_recorded_removes_stale_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("terrarium-port-forward-x.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(!stop_recorded(&path));
        assert!(!path.exists());
    }

    #[test]
    fn test_stop_recorded_spares_unrelated_pid() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("terrarium-port-forward-x.pid");
        // Our own pid: alive, but not a forwarder
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        assert!(!is_port_forward(std::process::id() as i32));
        assert!(!stop_recorded(&path));
        assert!(!path.exists());
    }

    #[test]
    fn test_stop_recorded_terminates_forwarder() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("terrarium-port-forward-x.pid");
        // argv carries a `port-forward` argument like the real child
        let mut child = std::process::Command::new("sh")
            .args(["-c", "sleep 30; true", "port-forward"])
            .spawn()
            .unwrap();
        std::fs::write(&path, child.id().to_string()).unwrap();

        assert!(is_port_forward(child.id() as i32));
        assert!(stop_recorded(&path));
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pid_file = temp.path().join("terrarium-port-forward-test.pid");
        let result = PortForward::spawn(
            "sh",
            &["-c".to_string(), "exit 1".to_string()],
            "test",
            port,
            pid_file.clone(),
            false,
        )
        .await;
        assert!(matches!(result, Err(ClusterError::Unavailable(_))));
        assert!(!pid_file.exists());
    }
}
