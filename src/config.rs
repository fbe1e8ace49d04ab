//! Runtime configuration.
//!
//! Layering: built-in defaults, then the JSON file named by `CARECORE_CONFIG`
//! (default `carecore.json`, skipped when absent), then `CARECORE_*` environment
//! overrides. `validate()` reports what is missing or suspicious without failing the
//! load; the binary decides whether to start.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::blobstore::{BlobStoreSettings, Endpoint};
use crate::error::{CoreError, CoreResult};
use crate::integrity::IntegritySettings;
use crate::policy::PolicyTable;
use crate::workflow::WorkflowSettings;

pub const CONFIG_ENV: &str = "CARECORE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "carecore.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Inline rule table; wins over `table_path`.
    pub table: Option<PolicyTable>,
    pub table_path: Option<String>,
}

impl PolicyConfig {
    pub fn resolve(&self) -> CoreResult<PolicyTable> {
        if let Some(t) = &self.table {
            t.validate()?;
            return Ok(t.clone());
        }
        match &self.table_path {
            Some(p) => PolicyTable::load(p),
            None => Ok(PolicyTable::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    /// Backend class; endpoints of one class share a rate limiter.
    pub backend: String,
    /// Environment variable holding the bearer token, if any.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlobStoreConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub rate_limit_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub default_budget_ms: u64,
    pub retry_not_found_on_fallbacks: bool,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        let d = BlobStoreSettings::default();
        Self {
            endpoints: vec![EndpointConfig {
                name: "local".to_string(),
                url: "http://127.0.0.1:31415".to_string(),
                backend: "local".to_string(),
                token_env: None,
                requires_auth: false,
            }],
            rate_limit_interval_ms: d.rate_limit_interval.as_millis() as u64,
            request_timeout_ms: d.request_timeout.as_millis() as u64,
            backoff_base_ms: d.backoff_base.as_millis() as u64,
            backoff_max_ms: d.backoff_max.as_millis() as u64,
            default_budget_ms: d.default_budget.as_millis() as u64,
            retry_not_found_on_fallbacks: d.retry_not_found_on_fallbacks,
        }
    }
}

impl BlobStoreConfig {
    pub fn settings(&self) -> BlobStoreSettings {
        BlobStoreSettings {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            rate_limit_interval: Duration::from_millis(self.rate_limit_interval_ms),
            retry_not_found_on_fallbacks: self.retry_not_found_on_fallbacks,
            default_budget: Duration::from_millis(self.default_budget_ms),
        }
    }

    /// Endpoints with tokens resolved through `lookup` (the process environment in production).
    pub fn endpoints_with(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .map(|e| {
                let ep = Endpoint::new(e.name.clone(), e.url.clone(), e.backend.clone());
                match e.token_env.as_deref().and_then(lookup) {
                    Some(token) if !token.is_empty() => ep.with_token(token),
                    _ => ep,
                }
            })
            .collect()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> { self.endpoints_with(&|k: &str| std::env::var(k).ok()) }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IntegrityConfig {
    pub duplicate_window_ms: u64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self { duplicate_window_ms: IntegritySettings::default().duplicate_window.as_millis() as u64 }
    }
}

impl IntegrityConfig {
    pub fn settings(&self) -> IntegritySettings {
        IntegritySettings { duplicate_window: Duration::from_millis(self.duplicate_window_ms) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub default_lifetime_ms: u64,
    pub sweep_on_read: bool,
    /// How long an approval stays usable. Unset: until the process forgets it.
    pub grant_ttl_ms: Option<u64>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let d = WorkflowSettings::default();
        Self { default_lifetime_ms: d.default_lifetime.as_millis() as u64, sweep_on_read: d.sweep_on_read, grant_ttl_ms: None }
    }
}

impl WorkflowConfig {
    pub fn settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            default_lifetime: Duration::from_millis(self.default_lifetime_ms),
            sweep_on_read: self.sweep_on_read,
            grant_ttl: self.grant_ttl_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    /// Per-type fetch cap when the aggregator pulls from the event log.
    pub fetch_cap: usize,
    /// JSONL mirror of the event log.
    pub mirror_path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self { Self { fetch_cap: 1000, mirror_path: None } }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KvConfig {
    pub snapshot_path: Option<String>,
    pub snapshot_interval_ms: u64,
}

impl Default for KvConfig {
    fn default() -> Self { Self { snapshot_path: None, snapshot_interval_ms: 30_000 } }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    pub policy: PolicyConfig,
    pub blob_store: BlobStoreConfig,
    pub integrity: IntegrityConfig,
    pub workflow: WorkflowConfig,
    pub audit: AuditConfig,
    pub kv: KvConfig,
}

/// Outcome of `CoreConfig::validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReport {
    pub is_valid: bool,
    pub missing: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigReport {
    pub fn log_status(&self) {
        if self.is_valid {
            info!(target: "startup", "configuration valid ({} warnings)", self.warnings.len());
        } else {
            error!(target: "startup", "configuration invalid: {} missing, {} errors", self.missing.len(), self.errors.len());
        }
        for m in &self.missing {
            error!(target: "startup", "missing: {}", m);
        }
        for e in &self.errors {
            error!(target: "startup", "error: {}", e);
        }
        for w in &self.warnings {
            warn!(target: "startup", "warning: {}", w);
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> CoreResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| CoreError::config(format!("{}='{}' is not a valid value", key, raw)))
}

fn parse_bool(key: &str, raw: &str) -> CoreResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::config(format!("{}='{}' is not a boolean", key, raw))),
    }
}

/// `name|backend|url` entries separated by commas.
fn parse_endpoints(raw: &str) -> CoreResult<Vec<EndpointConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.splitn(3, '|').map(str::trim).collect();
            match parts.as_slice() {
                [name, backend, url] => Ok(EndpointConfig {
                    name: name.to_string(),
                    url: url.to_string(),
                    backend: backend.to_string(),
                    token_env: None,
                    requires_auth: false,
                }),
                _ => Err(CoreError::config(format!("endpoint '{}' is not name|backend|url", entry))),
            }
        })
        .collect()
}

impl CoreConfig {
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        serde_json::from_str(text).map_err(|e| CoreError::config(format!("invalid config: {}", e)))
    }

    /// Read `path` when it exists; defaults otherwise.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::config(format!("cannot read '{}': {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// File named by `CARECORE_CONFIG` (or `carecore.json`), then environment overrides.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut cfg = Self::from_file(&path)?;
        cfg.apply_env(&|k: &str| std::env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> CoreResult<()> {
        if let Some(v) = lookup("CARECORE_BLOB_ENDPOINTS") {
            self.blob_store.endpoints = parse_endpoints(&v)?;
        }
        if let Some(v) = lookup("CARECORE_BLOB_TIMEOUT_MS") {
            self.blob_store.request_timeout_ms = parse_env("CARECORE_BLOB_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("CARECORE_BLOB_RATE_INTERVAL_MS") {
            self.blob_store.rate_limit_interval_ms = parse_env("CARECORE_BLOB_RATE_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("CARECORE_BLOB_BUDGET_MS") {
            self.blob_store.default_budget_ms = parse_env("CARECORE_BLOB_BUDGET_MS", &v)?;
        }
        if let Some(v) = lookup("CARECORE_BLOB_RETRY_NOT_FOUND") {
            self.blob_store.retry_not_found_on_fallbacks = parse_bool("CARECORE_BLOB_RETRY_NOT_FOUND", &v)?;
        }
        if let Some(v) = lookup("CARECORE_DUPLICATE_WINDOW_MS") {
            self.integrity.duplicate_window_ms = parse_env("CARECORE_DUPLICATE_WINDOW_MS", &v)?;
        }
        if let Some(v) = lookup("CARECORE_REQUEST_LIFETIME_MS") {
            self.workflow.default_lifetime_ms = parse_env("CARECORE_REQUEST_LIFETIME_MS", &v)?;
        }
        if let Some(v) = lookup("CARECORE_SWEEP_ON_READ") {
            self.workflow.sweep_on_read = parse_bool("CARECORE_SWEEP_ON_READ", &v)?;
        }
        if let Some(v) = lookup("CARECORE_GRANT_TTL_MS") {
            self.workflow.grant_ttl_ms = Some(parse_env("CARECORE_GRANT_TTL_MS", &v)?);
        }
        if let Some(v) = lookup("CARECORE_AUDIT_FETCH_CAP") {
            self.audit.fetch_cap = parse_env("CARECORE_AUDIT_FETCH_CAP", &v)?;
        }
        if let Some(v) = lookup("CARECORE_AUDIT_MIRROR") {
            self.audit.mirror_path = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("CARECORE_KV_SNAPSHOT") {
            self.kv.snapshot_path = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("CARECORE_POLICY_TABLE") {
            self.policy.table_path = Some(v).filter(|s| !s.trim().is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigReport {
        self.validate_with(&|k: &str| std::env::var(k).ok())
    }

    pub fn validate_with(&self, lookup: &dyn Fn(&str) -> Option<String>) -> ConfigReport {
        let mut r = ConfigReport::default();
        let bs = &self.blob_store;
        if bs.endpoints.is_empty() {
            r.missing.push("blob_store.endpoints - at least one storage endpoint is required".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for (i, e) in bs.endpoints.iter().enumerate() {
            if e.url.trim().is_empty() {
                r.missing.push(format!("blob_store.endpoints[{}].url", i));
            }
            if !seen.insert(e.name.as_str()) {
                r.errors.push(format!("duplicate endpoint name '{}'", e.name));
            }
            if e.url.contains("testnet") {
                r.warnings.push(format!("endpoint '{}' points at a testnet backend; data may be wiped at any time", e.name));
            }
            if e.requires_auth {
                let has_token = e.token_env.as_deref().and_then(lookup).is_some_and(|t| !t.is_empty());
                if !has_token {
                    r.warnings.push(format!("endpoint '{}' requires auth but no token is configured", e.name));
                }
            }
        }
        if bs.request_timeout_ms == 0 {
            r.errors.push("blob_store.request_timeout_ms must be greater than zero".to_string());
        }
        if bs.default_budget_ms == 0 {
            r.errors.push("blob_store.default_budget_ms must be greater than zero".to_string());
        }
        if bs.backoff_max_ms < bs.backoff_base_ms {
            r.warnings.push("blob_store.backoff_max_ms is below backoff_base_ms; every backoff is capped".to_string());
        }
        if self.workflow.default_lifetime_ms == 0 {
            r.errors.push("workflow.default_lifetime_ms must be greater than zero".to_string());
        }
        if self.workflow.grant_ttl_ms == Some(0) {
            r.errors.push("workflow.grant_ttl_ms must be greater than zero when set".to_string());
        }
        if self.audit.fetch_cap == 0 {
            r.errors.push("audit.fetch_cap must be greater than zero".to_string());
        }
        if let Err(e) = self.policy.resolve() {
            r.errors.push(format!("policy: {}", e.message()));
        }
        r.is_valid = r.missing.is_empty() && r.errors.is_empty();
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| m.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let r = CoreConfig::default().validate_with(&env(&[]));
        assert!(r.is_valid, "{:?}", r);
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let cfg = CoreConfig::from_json_str(r#"{"workflow": {"sweep_on_read": false}}"#).unwrap();
        assert!(!cfg.workflow.sweep_on_read);
        assert_eq!(cfg.workflow.default_lifetime_ms, WorkflowConfig::default().default_lifetime_ms);
        assert_eq!(cfg.audit.fetch_cap, 1000);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = CoreConfig::default();
        cfg.apply_env(&env(&[
            ("CARECORE_BLOB_ENDPOINTS", "primary|walrus|https://a.example, backup|s3|https://b.example"),
            ("CARECORE_BLOB_TIMEOUT_MS", "2500"),
            ("CARECORE_SWEEP_ON_READ", "off"),
        ]))
        .unwrap();
        assert_eq!(cfg.blob_store.endpoints.len(), 2);
        assert_eq!(cfg.blob_store.endpoints[1].backend, "s3");
        assert_eq!(cfg.blob_store.request_timeout_ms, 2500);
        assert!(!cfg.workflow.sweep_on_read);

        let err = cfg.apply_env(&env(&[("CARECORE_AUDIT_FETCH_CAP", "lots")])).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn report_flags_problems() {
        let mut cfg = CoreConfig::default();
        cfg.blob_store.endpoints = vec![
            EndpointConfig {
                name: "a".into(),
                url: "https://publisher.walrus-testnet.example".into(),
                backend: "walrus".into(),
                token_env: None,
                requires_auth: false,
            },
            EndpointConfig {
                name: "a".into(),
                url: "https://mainnet.example".into(),
                backend: "walrus".into(),
                token_env: Some("TOKEN".into()),
                requires_auth: true,
            },
        ];
        cfg.blob_store.request_timeout_ms = 0;
        let r = cfg.validate_with(&env(&[]));
        assert!(!r.is_valid);
        assert_eq!(r.errors.len(), 2);
        assert_eq!(r.warnings.len(), 2);

        cfg.blob_store.endpoints.clear();
        let r = cfg.validate_with(&env(&[]));
        assert_eq!(r.missing.len(), 1);
    }

    #[test]
    fn endpoint_tokens_come_from_env() {
        let mut cfg = BlobStoreConfig::default();
        cfg.endpoints[0].token_env = Some("LOCAL_TOKEN".into());
        let eps = cfg.endpoints_with(&env(&[("LOCAL_TOKEN", "secret")]));
        assert_eq!(eps[0].token.as_deref(), Some("secret"));
    }
}
