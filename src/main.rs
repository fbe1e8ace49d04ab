use std::sync::Arc;

use carecore::blobstore::{HttpBlobTransport, ResilientBlobStore};
use carecore::config::{CoreConfig, CONFIG_ENV, DEFAULT_CONFIG_FILE};
use carecore::policy::PolicyEngine;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Startup check: load and validate configuration, compile the policy table and probe
/// every blob endpoint. Exits with status 2 when the configuration is invalid.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    info!(target: "startup", "carecore starting: RUST_LOG='{}', config='{}'", rust_log, config_path);

    let cfg = CoreConfig::load()?;
    let report = cfg.validate();
    report.log_status();
    if !report.is_valid {
        std::process::exit(2);
    }

    let policy = PolicyEngine::new(cfg.policy.resolve()?)?;
    info!(target: "startup", "policy table v{} active", policy.version());

    let transport = Arc::new(HttpBlobTransport::new()?);
    let store = ResilientBlobStore::new(cfg.blob_store.endpoints(), transport, cfg.blob_store.settings())?;
    let budget = store.default_budget();
    match store.get("carecore-probe", &budget).await {
        Ok(_) => info!(target: "startup", "blob store reachable"),
        Err(e) => warn!(target: "startup", "blob store probe failed: {}", e),
    }
    Ok(())
}
