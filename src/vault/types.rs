//! Typed Vault API payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET /v1/sys/health`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub version: Option<String>,
}

/// Health poll outcome: the accepted HTTP status plus decoded body, if any.
#[derive(Debug, Clone)]
pub struct VaultHealth {
    pub status: u16,
    pub body: HealthResponse,
}

impl VaultHealth {
    pub fn is_sealed(&self) -> bool {
        self.status == 503 || self.body.sealed
    }
}

/// Result of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

#[derive(Debug, Serialize)]
pub(crate) struct MountRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub options: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthEnableRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct SecretWriteRequest<'a> {
    pub data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SecretReadResponse {
    pub data: Option<SecretReadData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SecretReadData {
    pub data: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse {
    pub data: Option<ListData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListData {
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PolicyWriteRequest<'a> {
    pub policy: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct KubernetesRoleRequest<'a> {
    pub bound_service_account_names: &'a [String],
    pub bound_service_account_namespaces: &'a [String],
    pub policies: &'a [String],
    pub ttl: &'a str,
}

/// Parameters for `auth/kubernetes/config`.
#[derive(Debug, Clone, Serialize)]
pub struct KubernetesAuthConfig {
    pub kubernetes_host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_reviewer_jwt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_ca_cert: Option<String>,
    pub disable_local_ca_jwt: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenCreateRequest<'a> {
    pub policies: &'a [String],
    pub ttl: &'a str,
    pub display_name: &'a str,
    pub renewable: bool,
}

/// `POST /v1/auth/token/create`
#[derive(Debug, Deserialize)]
pub(crate) struct TokenCreateResponse {
    pub auth: Option<TokenAuth>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenAuth {
    pub client_token: Option<String>,
}

/// Vault error envelope, `{"errors": [...]}`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<String>,
}
