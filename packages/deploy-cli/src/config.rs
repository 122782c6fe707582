use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use media_deploy::testing::MockBackend;
use media_deploy::{
    ContactDirectory, DeploymentOrchestrator, DiscoveryBackend, HttpDiscoveryBackend,
    RegistryConfig, TargetCatalog,
};

/// Catalog used when `TARGET_CATALOG` is not set.
const BUNDLED_CATALOG: &str = include_str!("../catalog.example.json");

/// Process configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Hosted discovery service. Unset means the simulated backend.
    pub discovery_api_url: Option<String>,
    pub discovery_api_key: Option<String>,
    pub target_catalog: Option<PathBuf>,
    pub port: u16,
    pub job_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let poll_ms: u64 = env::var("JOB_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .context("JOB_POLL_INTERVAL_MS must be a number of milliseconds")?;

        Ok(Self {
            discovery_api_url: env::var("DISCOVERY_API_URL").ok().filter(|v| !v.is_empty()),
            discovery_api_key: env::var("DISCOVERY_API_KEY").ok().filter(|v| !v.is_empty()),
            target_catalog: env::var("TARGET_CATALOG").ok().map(PathBuf::from),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            job_poll_interval: Duration::from_millis(poll_ms.max(1)),
        })
    }

    pub fn catalog(&self) -> Result<TargetCatalog> {
        match &self.target_catalog {
            Some(path) => TargetCatalog::load(path)
                .with_context(|| format!("Failed to load target catalog {}", path.display())),
            None => {
                tracing::info!("TARGET_CATALOG not set, using bundled example catalog");
                TargetCatalog::from_json_str(BUNDLED_CATALOG)
                    .context("Bundled example catalog is invalid")
            }
        }
    }

    /// Wire the orchestrator to the configured backend.
    pub fn orchestrator(&self) -> Result<DeploymentOrchestrator> {
        let catalog = self.catalog()?;
        let registry_config = RegistryConfig::default().with_poll_interval(self.job_poll_interval);

        let (backend, directory): (Arc<dyn DiscoveryBackend>, Arc<dyn ContactDirectory>) =
            match &self.discovery_api_url {
                Some(url) => {
                    let http = Arc::new(
                        HttpDiscoveryBackend::new(url, self.discovery_api_key.clone())
                            .context("DISCOVERY_API_URL must be a valid base url")?,
                    );
                    tracing::info!(base_url = %url, "using hosted discovery backend");
                    (http.clone(), http)
                }
                None => {
                    tracing::warn!("DISCOVERY_API_URL not set, running against the simulated backend");
                    let mock = Arc::new(
                        MockBackend::new()
                            .with_latency(Duration::from_millis(250))
                            .with_default_yield(3),
                    );
                    (mock.clone(), mock)
                }
            };

        Ok(DeploymentOrchestrator::with_registry_config(
            backend,
            directory,
            catalog,
            registry_config,
        ))
    }
}
