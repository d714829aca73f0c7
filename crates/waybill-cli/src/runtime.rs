//! Wiring of the core components for one CLI invocation

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use waybill_core::{
    ApiVersion, CachedEntity, Config, ConnectivityMonitor, HttpExecutor, HttpProbe, LocalStore,
    RemoteError, RemoteExecutor, RemoteResult, SyncEngine, WirePayload,
};

/// Executor used when no server is configured; every call is transient
struct OfflineExecutor;

#[async_trait]
impl RemoteExecutor for OfflineExecutor {
    async fn create(&self, _payload: &WirePayload) -> RemoteResult<i64> {
        Err(not_configured())
    }

    async fn update(&self, _entity_id: i64, _payload: &WirePayload) -> RemoteResult<bool> {
        Err(not_configured())
    }

    async fn update_product(&self, _entity_id: i64, _payload: &WirePayload) -> RemoteResult<bool> {
        Err(not_configured())
    }

    async fn cancel(&self, _entity_id: i64) -> RemoteResult<bool> {
        Err(not_configured())
    }

    async fn validate(&self, _entity_id: i64) -> RemoteResult<bool> {
        Err(not_configured())
    }

    async fn fetch_entities(&self) -> RemoteResult<Vec<CachedEntity>> {
        Err(not_configured())
    }

    async fn server_version(&self) -> RemoteResult<ApiVersion> {
        Err(not_configured())
    }
}

fn not_configured() -> RemoteError {
    RemoteError::Transient("no server configured".to_string())
}

/// Store, engine and monitor built from configuration
pub struct Runtime {
    pub config: Config,
    pub engine: Arc<SyncEngine>,
    monitor: Option<Arc<ConnectivityMonitor>>,
}

impl Runtime {
    pub fn open(config: Config) -> Result<Self> {
        let store = Arc::new(LocalStore::open(&config).context("Failed to open local store")?);

        let executor: Arc<dyn RemoteExecutor> = match config.server_url.as_deref() {
            Some(url) => Arc::new(
                HttpExecutor::new(url, config.call_timeout())
                    .context("Failed to set up the server connection")?,
            ),
            None => Arc::new(OfflineExecutor),
        };
        let engine = Arc::new(SyncEngine::from_config(&config, store, executor));

        let monitor = match config.effective_probe_url() {
            Some(url) => {
                let probe = Arc::new(
                    HttpProbe::new(url, config.probe_timeout())
                        .context("Failed to set up the connectivity probe")?,
                );
                Some(Arc::new(
                    ConnectivityMonitor::from_config(&config, probe)
                        .context("Invalid connectivity settings")?,
                ))
            }
            None => None,
        };

        Ok(Self {
            config,
            engine,
            monitor,
        })
    }

    /// Probe once; always unreachable without a configured endpoint
    pub async fn check_reachable(&self) -> bool {
        match &self.monitor {
            Some(monitor) => {
                monitor.probe_once().await;
                monitor.is_reachable()
            }
            None => false,
        }
    }

    pub fn monitor(&self) -> Option<&Arc<ConnectivityMonitor>> {
        self.monitor.as_ref()
    }

    /// Fail with setup instructions when no server URL is configured
    pub fn require_server(&self) -> Result<&str> {
        match self.config.server_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "Server URL not configured. Set it with:\n  \
                 waybill config set server_url https://erp.example.com"
            ),
        }
    }
}
