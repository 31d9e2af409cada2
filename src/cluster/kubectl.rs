//! `kubectl`-backed control plane.

use super::ControlPlane;
use crate::error::ClusterError;
use crate::system::{run_checked, run_command};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Mounted service-account token inside every pod.
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// API server address as seen from inside any pod.
pub const IN_CLUSTER_API_SERVER: &str = "https://kubernetes.default.svc";

/// Prints the API server endpoint injected into every pod's environment.
pub const API_SERVER_ENV_COMMAND: [&str; 3] = [
    "sh",
    "-c",
    "echo https://$KUBERNETES_SERVICE_HOST:$KUBERNETES_SERVICE_PORT",
];

/// Control plane driven through the `kubectl` binary on PATH
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
    command_timeout: Duration,
    wait_secs: u64,
}

impl Kubectl {
    pub fn new(command_timeout: Duration, wait_secs: u64) -> Self {
        Kubectl {
            binary: "kubectl".to_string(),
            command_timeout,
            wait_secs,
        }
    }

    /// Use a different binary (e.g. `minikube kubectl --` wrappers installed as scripts).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String, ClusterError> {
        let output = run_checked(&self.binary, args, None, self.command_timeout).await?;
        Ok(output.text().to_string())
    }

    /// `deployment/<name>` unless already qualified.
    fn deployment_ref(name: &str) -> String {
        if name.contains('/') {
            name.to_string()
        } else {
            format!("deployment/{}", name)
        }
    }
}

/// Split `kubectl get -o name` output into bare names.
pub fn parse_resource_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.rsplit('/').next().unwrap_or(l).to_string())
        .collect()
}

#[async_trait]
impl ControlPlane for Kubectl {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError> {
        let output = run_command(
            &self.binary,
            &["get", "namespace", namespace],
            None,
            self.command_timeout,
        )
        .await?;
        Ok(output.success())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), ClusterError> {
        match self.run(&["create", "namespace", namespace]).await {
            Ok(_) => Ok(()),
            Err(ClusterError::CommandFailed { stderr, .. }) if stderr.contains("AlreadyExists") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_manifest(&self, manifest: &Path, namespace: &str) -> Result<(), ClusterError> {
        let path = manifest.to_string_lossy();
        self.run(&["apply", "-f", path.as_ref(), "-n", namespace])
            .await
            .map(|_| ())
    }

    async fn wait_for_deployment(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        let timeout_flag = format!("--timeout={}s", self.wait_secs);
        let target = Self::deployment_ref(name);
        let args = [
            "wait",
            "--for=condition=available",
            timeout_flag.as_str(),
            target.as_str(),
            "-n",
            namespace,
        ];
        // kubectl enforces its own timeout; the process bound sits just past it
        let bound = Duration::from_secs(self.wait_secs + 15);
        run_checked(&self.binary, &args, None, bound).await.map(|_| ())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        let output = self
            .run(&["get", "deployments", "-n", namespace, "-o", "name"])
            .await?;
        Ok(parse_resource_names(&output))
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        self.run(&[
            "delete",
            "secret",
            name,
            "-n",
            namespace,
            "--ignore-not-found",
        ])
        .await
        .map(|_| ())
    }

    async fn create_tls_secret(
        &self,
        name: &str,
        namespace: &str,
        cert: &Path,
        key: &Path,
    ) -> Result<(), ClusterError> {
        let cert_flag = format!("--cert={}", cert.display());
        let key_flag = format!("--key={}", key.display());
        self.run(&[
            "create",
            "secret",
            "tls",
            name,
            cert_flag.as_str(),
            key_flag.as_str(),
            "-n",
            namespace,
        ])
        .await
        .map(|_| ())
    }

    async fn create_service_account_token(
        &self,
        service_account: &str,
        namespace: &str,
    ) -> Result<String, ClusterError> {
        let token = self
            .run(&["create", "token", service_account, "-n", namespace])
            .await?;
        if token.is_empty() {
            return Err(ClusterError::Unavailable(format!(
                "empty token for service account {}/{}",
                namespace, service_account
            )));
        }
        Ok(token)
    }

    async fn exec_in_deployment(
        &self,
        deployment: &str,
        namespace: &str,
        command: &[&str],
    ) -> Result<String, ClusterError> {
        let target = Self::deployment_ref(deployment);
        let mut args = vec!["exec", "-n", namespace, target.as_str(), "--"];
        args.extend_from_slice(command);
        self.run(&args).await
    }

    async fn deployment_logs(
        &self,
        deployment: &str,
        namespace: &str,
        tail: u32,
    ) -> Result<String, ClusterError> {
        let target = Self::deployment_ref(deployment);
        let tail_flag = format!("--tail={}", tail);
        self.run(&[
            "logs",
            target.as_str(),
            "-n",
            namespace,
            tail_flag.as_str(),
            "--all-containers=true",
        ])
        .await
    }

    fn port_forward_command(
        &self,
        service: &str,
        namespace: &str,
        local_port: u16,
        remote_port: u16,
    ) -> (String, Vec<String>) {
        (
            self.binary.clone(),
            vec![
                "port-forward".to_string(),
                "-n".to_string(),
                namespace.to_string(),
                format!("svc/{}", service),
                format!("{}:{}", local_port, remote_port),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_names() {
        let out = "deployment.apps/vault\ndeployment.apps/nginx\n\n";
        assert_eq!(parse_resource_names(out), vec!["vault", "nginx"]);
        assert!(parse_resource_names("").is_empty());
    }

    #[test]
    fn test_deployment_ref() {
        assert_eq!(Kubectl::deployment_ref("vault"), "deployment/vault");
        assert_eq!(Kubectl::deployment_ref("statefulset/db"), "statefulset/db");
    }

    #[test]
    fn test_port_forward_command() {
        let kubectl = Kubectl::new(Duration::from_secs(5), 120);
        let (program, args) = kubectl.port_forward_command("nginx", "edge-terrarium", 8443, 443);
        assert_eq!(program, "kubectl");
        assert_eq!(
            args,
            vec!["port-forward", "-n", "edge-terrarium", "svc/nginx", "8443:443"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let kubectl = Kubectl::new(Duration::from_secs(2), 5).with_binary("kubectl-not-installed-xyz");
        let err = kubectl.namespace_exists("default").await.unwrap_err();
        assert!(matches!(err, ClusterError::Spawn { .. }));
    }
}
