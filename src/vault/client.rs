//! Vault HTTP API client.
//!
//! Every call sends `X-Vault-Token` and JSON bodies. Creates are idempotent:
//! Vault's "already in use" 400 responses map to [`Provisioned::AlreadyExists`].

use super::types::*;
use crate::error::VaultError;
use crate::models::{PolicyDescriptor, RoleDescriptor, SecretRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::time::Duration;

static ALREADY_EXISTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(path is already in use|already in use|already exists|existing mount)")
        .expect("Invalid already-exists regex")
});

/// True when a failed create means the resource is already there.
pub fn is_already_exists(status: u16, body: &str) -> bool {
    status == 400 && ALREADY_EXISTS.is_match(body)
}

/// Statuses accepted from `sys/health` as "reachable".
pub const ACCEPTED_HEALTH_STATUSES: [u16; 2] = [200, 503];

/// Thin client over the Vault HTTP API
#[derive(Clone, Debug)]
pub struct VaultClient {
    http: Client,
    addr: String,
    token: String,
    mount: String,
}

impl VaultClient {
    pub fn new(
        addr: &str,
        token: &str,
        mount: &str,
        timeout: Duration,
    ) -> Result<Self, VaultError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| VaultError::Http(e.to_string()))?;
        Ok(VaultClient {
            http,
            addr: addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
            mount: mount.trim_matches('/').to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Send a request and return `(status, body)`; only transport failures are errors.
    async fn send<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(u16, String), VaultError> {
        log::debug!("[Vault] {} /v1/{}", method, path);
        let mut request = self
            .http
            .request(method, self.url(path))
            .header("X-Vault-Token", &self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                VaultError::Unreachable {
                    addr: self.addr.clone(),
                    reason: e.to_string(),
                }
            } else {
                VaultError::Http(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| VaultError::Http(e.to_string()))?;
        Ok((status, text))
    }

    fn unexpected(path: &str, status: u16, body: String) -> VaultError {
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .filter(|e| !e.errors.is_empty())
            .map(|e| e.errors.join("; "))
            .unwrap_or(body);
        VaultError::UnexpectedStatus {
            path: path.to_string(),
            status,
            body: message,
        }
    }

    /// Create-style call: 2xx is `Created`, "already in use" is `AlreadyExists`.
    async fn provision<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Provisioned, VaultError> {
        let (status, text) = self.send(method, path, Some(body)).await?;
        if (200..300).contains(&status) {
            Ok(Provisioned::Created)
        } else if is_already_exists(status, &text) {
            Ok(Provisioned::AlreadyExists)
        } else {
            Err(Self::unexpected(path, status, text))
        }
    }

    /// Write-style call: any 2xx is success.
    async fn write<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), VaultError> {
        let (status, text) = self.send(method, path, Some(body)).await?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(Self::unexpected(path, status, text))
        }
    }

    // ============================================================================
    // Health
    // ============================================================================

    /// Single `sys/health` probe. 200 and 503 are accepted.
    pub async fn health(&self) -> Result<VaultHealth, VaultError> {
        let path = "sys/health";
        let (status, text) = self.send::<()>(Method::GET, path, None).await?;
        if !ACCEPTED_HEALTH_STATUSES.contains(&status) {
            return Err(Self::unexpected(path, status, text));
        }
        let body = serde_json::from_str::<HealthResponse>(&text).unwrap_or_default();
        Ok(VaultHealth { status, body })
    }

    /// Poll `sys/health` up to `attempts` times, `interval` apart.
    ///
    /// The last attempt's error is returned when none succeeds.
    pub async fn wait_until_healthy(
        &self,
        attempts: u32,
        interval: Duration,
    ) -> Result<VaultHealth, VaultError> {
        let attempts = attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.health().await {
                Ok(health) => {
                    if health.is_sealed() {
                        log::warn!("[Vault] Reachable but sealed (attempt {}/{})", attempt, attempts);
                    }
                    return Ok(health);
                }
                Err(e) => {
                    log::debug!("[Vault] Health attempt {}/{} failed: {}", attempt, attempts, e);
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(last_err.unwrap_or_else(|| VaultError::Unreachable {
            addr: self.addr.clone(),
            reason: "no health attempts made".to_string(),
        }))
    }

    // ============================================================================
    // Secrets engine
    // ============================================================================

    /// Enable KV v2 at the configured mount.
    pub async fn enable_kv_engine(&self) -> Result<Provisioned, VaultError> {
        let body = MountRequest {
            kind: "kv",
            options: BTreeMap::from([("version", "2")]),
        };
        self.provision(Method::POST, &format!("sys/mounts/{}", self.mount), &body)
            .await
    }

    /// Overwrite the secret at `<mount>/data/<path>`. 200 and 204 are both success.
    pub async fn write_secret(&self, secret: &SecretRecord) -> Result<(), VaultError> {
        let path = format!("{}/data/{}", self.mount, secret.path.trim_matches('/'));
        let body = SecretWriteRequest { data: &secret.data };
        self.write(Method::POST, &path, &body).await
    }

    /// Read the latest version of a secret. `None` when the path has no secret.
    pub async fn read_secret(
        &self,
        path: &str,
    ) -> Result<Option<BTreeMap<String, String>>, VaultError> {
        let api_path = format!("{}/data/{}", self.mount, path.trim_matches('/'));
        let (status, text) = self.send::<()>(Method::GET, &api_path, None).await?;
        if status == 404 {
            return Ok(None);
        }
        if status != 200 {
            return Err(Self::unexpected(&api_path, status, text));
        }
        let parsed: SecretReadResponse =
            serde_json::from_str(&text).map_err(|e| VaultError::Decode {
                path: api_path.clone(),
                reason: e.to_string(),
            })?;
        let data = parsed
            .data
            .and_then(|d| d.data)
            .ok_or_else(|| VaultError::FieldAbsent {
                path: api_path,
                field: "data.data".to_string(),
            })?;
        Ok(Some(
            data.into_iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => (k, s),
                    other => (k, other.to_string()),
                })
                .collect(),
        ))
    }

    /// List keys under `<mount>/metadata/<prefix>`. Empty when nothing is stored.
    pub async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>, VaultError> {
        let prefix = prefix.trim_matches('/');
        let api_path = if prefix.is_empty() {
            format!("{}/metadata?list=true", self.mount)
        } else {
            format!("{}/metadata/{}?list=true", self.mount, prefix)
        };
        let (status, text) = self.send::<()>(Method::GET, &api_path, None).await?;
        if status == 404 {
            return Ok(Vec::new());
        }
        if status != 200 {
            return Err(Self::unexpected(&api_path, status, text));
        }
        let parsed: ListResponse = serde_json::from_str(&text).map_err(|e| VaultError::Decode {
            path: api_path,
            reason: e.to_string(),
        })?;
        Ok(parsed.data.map(|d| d.keys).unwrap_or_default())
    }

    // ============================================================================
    // Auth methods, policies, roles
    // ============================================================================

    pub async fn enable_auth_method(&self, method: &str) -> Result<Provisioned, VaultError> {
        let body = AuthEnableRequest { kind: method };
        self.provision(Method::POST, &format!("sys/auth/{}", method), &body)
            .await
    }

    pub async fn configure_kubernetes_auth(
        &self,
        config: &KubernetesAuthConfig,
    ) -> Result<(), VaultError> {
        self.write(Method::POST, "auth/kubernetes/config", config).await
    }

    /// Create or replace an ACL policy.
    pub async fn write_policy(&self, policy: &PolicyDescriptor) -> Result<(), VaultError> {
        let hcl = policy.to_hcl();
        let body = PolicyWriteRequest { policy: &hcl };
        self.write(
            Method::PUT,
            &format!("sys/policies/acl/{}", policy.name),
            &body,
        )
        .await
    }

    /// Create or replace a Kubernetes-auth role.
    pub async fn write_role(&self, role: &RoleDescriptor) -> Result<(), VaultError> {
        let body = KubernetesRoleRequest {
            bound_service_account_names: &role.service_accounts,
            bound_service_account_namespaces: &role.namespaces,
            policies: &role.policies,
            ttl: &role.ttl,
        };
        self.write(
            Method::POST,
            &format!("auth/kubernetes/role/{}", role.name),
            &body,
        )
        .await
    }

    // ============================================================================
    // Tokens
    // ============================================================================

    /// Issue a token; the response must carry `auth.client_token`.
    pub async fn create_token(
        &self,
        policies: &[String],
        ttl: &str,
        display_name: &str,
    ) -> Result<String, VaultError> {
        let path = "auth/token/create";
        let body = TokenCreateRequest {
            policies,
            ttl,
            display_name,
            renewable: true,
        };
        let (status, text) = self.send(Method::POST, path, Some(&body)).await?;
        if !(200..300).contains(&status) {
            return Err(Self::unexpected(path, status, text));
        }
        let parsed: TokenCreateResponse =
            serde_json::from_str(&text).map_err(|e| VaultError::Decode {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        parsed
            .auth
            .and_then(|a| a.client_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| VaultError::FieldAbsent {
                path: path.to_string(),
                field: "auth.client_token".to_string(),
            })
    }
}
