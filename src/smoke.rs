//! HTTP smoke tests against a deployed stack.
//!
//! Probes come from `configs/smoke-tests.json` when present:
//!
//! ```json
//! { "tests": [ { "name": "Vault health", "url": "/api/vault/v1/sys/health" } ] }
//! ```
//!
//! Relative URLs are joined onto the gateway URL. Each probe is retried a
//! bounded number of times; a required probe that never passes fails the run,
//! an optional one only warns. Self-signed certificates are accepted.

use crate::config::SmokeSettings;
use crate::error::{ConfigError, SmokeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected() -> Vec<u16> {
    vec![200, 201]
}

fn default_required() -> bool {
    true
}

/// One HTTP check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmokeProbe {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_expected")]
    pub expected_status: Vec<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

impl SmokeProbe {
    pub fn get(name: &str, url: &str) -> Self {
        SmokeProbe {
            name: name.to_string(),
            url: url.to_string(),
            method: default_method(),
            expected_status: default_expected(),
            headers: BTreeMap::new(),
            body: None,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn with_body(mut self, method: &str, content_type: &str, body: &str) -> Self {
        self.method = method.to_string();
        self.headers
            .insert("Content-Type".to_string(), content_type.to_string());
        self.body = Some(body.to_string());
        self
    }

    /// Absolute URL for this probe.
    pub fn resolve_url(&self, gateway: &str) -> String {
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            self.url.clone()
        } else {
            format!(
                "{}/{}",
                gateway.trim_end_matches('/'),
                self.url.trim_start_matches('/')
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFile {
    #[serde(default)]
    tests: Vec<SmokeProbe>,
}

pub fn parse_probes(content: &str) -> Result<Vec<SmokeProbe>, ConfigError> {
    let file: ProbeFile = serde_json::from_str(content)?;
    Ok(file.tests)
}

/// Built-in probes covering the gateway routes and direct Vault access.
pub fn default_probes() -> Vec<SmokeProbe> {
    vec![
        SmokeProbe::get("Vault health via gateway", "/api/vault/v1/sys/health"),
        SmokeProbe::get("Custom client route", "/api/fake-provider/my-cool-thing"),
        SmokeProbe::get("Service sink route", "/api/api/test"),
        SmokeProbe::get("Custom client POST", "/api/fake-provider/test").with_body(
            "POST",
            "application/json",
            r#"{"username":"testuser","password":"testpass"}"#,
        ),
        SmokeProbe::get("Logthon health", "/api/logs/health"),
        SmokeProbe::get("Logthon web UI", "/api/logs/"),
        SmokeProbe::get("File storage health", "/api/storage/health"),
        SmokeProbe::get("Vault health direct", "http://localhost:8200/v1/sys/health").optional(),
    ]
}

/// Probes from `path`, or [`default_probes`] when it is missing or invalid.
pub fn load_probes(path: &Path) -> Vec<SmokeProbe> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            log::debug!("[Smoke] {} not found, using built-in probes", path.display());
            return default_probes();
        }
    };
    match parse_probes(&content) {
        Ok(probes) if !probes.is_empty() => probes,
        Ok(_) => {
            log::warn!("[Smoke] {} defines no tests, using built-in probes", path.display());
            default_probes()
        }
        Err(e) => {
            log::warn!("[Smoke] Invalid {}: {}, using built-in probes", path.display(), e);
            default_probes()
        }
    }
}

/// Result of one probe after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub name: String,
    pub required: bool,
    pub passed: bool,
    pub attempts: u32,
    /// Last status seen, or the transport error
    pub last: String,
}

#[derive(Debug, Clone, Default)]
pub struct SmokeReport {
    pub results: Vec<ProbeResult>,
}

impl SmokeReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn required_failures(&self) -> usize {
        self.results.iter().filter(|r| r.required && !r.passed).count()
    }

    pub fn into_result(self) -> Result<Self, SmokeError> {
        let failed = self.required_failures();
        if failed > 0 {
            return Err(SmokeError::RequiredFailed {
                failed,
                total: self.results.iter().filter(|r| r.required).count(),
            });
        }
        Ok(self)
    }
}

/// Runs probes with bounded retries
pub struct SmokeRunner {
    http: reqwest::Client,
    gateway: String,
    host_header: String,
    attempts: u32,
    delay: Duration,
}

impl SmokeRunner {
    pub fn new(settings: &SmokeSettings, timeout: Duration) -> Result<Self, SmokeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| SmokeError::Client(e.to_string()))?;
        Ok(SmokeRunner {
            http,
            gateway: settings.gateway_url.clone(),
            host_header: settings.host_header.clone(),
            attempts: settings.attempts.max(1),
            delay: Duration::from_secs(settings.delay_secs),
        })
    }

    async fn attempt(&self, probe: &SmokeProbe, url: &str) -> Result<u16, String> {
        let method = reqwest::Method::from_bytes(probe.method.to_uppercase().as_bytes())
            .map_err(|e| format!("invalid method {}: {}", probe.method, e))?;
        let mut request = self.http.request(method, url);
        if url.starts_with(&self.gateway) && !self.host_header.is_empty() {
            request = request.header(reqwest::header::HOST, &self.host_header);
        }
        for (key, value) in &probe.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &probe.body {
            request = request.body(body.clone());
        }
        request
            .send()
            .await
            .map(|r| r.status().as_u16())
            .map_err(|e| e.to_string())
    }

    pub async fn run_probe(&self, probe: &SmokeProbe) -> ProbeResult {
        let url = probe.resolve_url(&self.gateway);
        let mut last = String::new();
        for attempt in 1..=self.attempts {
            match self.attempt(probe, &url).await {
                Ok(status) if probe.expected_status.contains(&status) => {
                    crate::log_success!("[Smoke] {}: OK ({})", probe.name, status);
                    return ProbeResult {
                        name: probe.name.clone(),
                        required: probe.required,
                        passed: true,
                        attempts: attempt,
                        last: status.to_string(),
                    };
                }
                Ok(status) => last = format!("status {}", status),
                Err(e) => last = e,
            }
            log::debug!(
                "[Smoke] {} attempt {}/{}: {}",
                probe.name,
                attempt,
                self.attempts,
                last
            );
            if attempt < self.attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        if probe.required {
            log::error!("[Smoke] {}: FAILED ({}) {}", probe.name, last, url);
        } else {
            log::warn!("[Smoke] {}: unavailable ({}), optional", probe.name, last);
        }
        ProbeResult {
            name: probe.name.clone(),
            required: probe.required,
            passed: false,
            attempts: self.attempts,
            last,
        }
    }

    /// Run every probe in order.
    pub async fn run(&self, probes: &[SmokeProbe]) -> SmokeReport {
        let mut report = SmokeReport::default();
        for probe in probes {
            report.results.push(self.run_probe(probe).await);
        }
        log::info!(
            "[Smoke] {}/{} passed, {} required failure(s)",
            report.passed(),
            report.results.len(),
            report.required_failures()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let probe = SmokeProbe::get("x", "/api/logs/");
        assert_eq!(
            probe.resolve_url("https://localhost:8443/"),
            "https://localhost:8443/api/logs/"
        );
        let direct = SmokeProbe::get("y", "http://localhost:8200/v1/sys/health");
        assert_eq!(
            direct.resolve_url("https://localhost:8443"),
            "http://localhost:8200/v1/sys/health"
        );
    }

    #[test]
    fn test_parse_probes_defaults() {
        let probes = parse_probes(r#"{"tests":[{"name":"a","url":"/a"}]}"#).unwrap();
        assert_eq!(probes[0].method, "GET");
        assert_eq!(probes[0].expected_status, vec![200, 201]);
        assert!(probes[0].required);
    }

    #[test]
    fn test_load_probes_fallback() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("smoke-tests.json");
        assert_eq!(load_probes(&path), default_probes());
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(load_probes(&path), default_probes());
    }

    #[test]
    fn test_report_required_failures() {
        let report = SmokeReport {
            results: vec![
                ProbeResult {
                    name: "a".into(),
                    required: false,
                    passed: false,
                    attempts: 3,
                    last: "status 502".into(),
                },
                ProbeResult {
                    name: "b".into(),
                    required: true,
                    passed: true,
                    attempts: 1,
                    last: "200".into(),
                },
            ],
        };
        assert_eq!(report.required_failures(), 0);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_probe_retries_then_passes() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/api/logs/health")
            .with_status(200)
            .create_async()
            .await;

        let settings = SmokeSettings {
            gateway_url: server.url(),
            attempts: 2,
            delay_secs: 0,
            ..SmokeSettings::default()
        };
        let runner = SmokeRunner::new(&settings, Duration::from_secs(5)).unwrap();
        let result = runner
            .run_probe(&SmokeProbe::get("logthon", "/api/logs/health"))
            .await;
        assert!(result.passed);
        assert_eq!(result.attempts, 1);
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_required_probe_failure() {
        let mut server = mockito::Server::new_async().await;
        let _bad = server
            .mock("GET", "/down")
            .with_status(502)
            .expect(2)
            .create_async()
            .await;

        let settings = SmokeSettings {
            gateway_url: server.url(),
            attempts: 2,
            delay_secs: 0,
            ..SmokeSettings::default()
        };
        let runner = SmokeRunner::new(&settings, Duration::from_secs(5)).unwrap();
        let report = runner.run(&[SmokeProbe::get("down", "/down")]).await;
        assert_eq!(report.required_failures(), 1);
        assert!(matches!(
            report.into_result(),
            Err(SmokeError::RequiredFailed { failed: 1, total: 1 })
        ));
    }
}
