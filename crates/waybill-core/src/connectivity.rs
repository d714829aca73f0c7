//! Connectivity monitor
//!
//! Periodically probes the configured endpoint and keeps a single owned
//! reachability state. Subscribers get *transitions* only: two probes with
//! the same result in a row publish nothing, so the sync engine is not
//! asked to drain on every tick.
//!
//! ## Usage
//!
//! ```ignore
//! let monitor = Arc::new(ConnectivityMonitor::new(probe, interval, timeout)?);
//! let mut transitions = monitor.subscribe();
//! let task = monitor.clone().spawn(shutdown_rx);
//!
//! while let Ok(Transition::BecameReachable) = transitions.recv().await {
//!     // drain queues
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Reachability of the remote endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Unreachable,
    Reachable,
}

/// Process-wide connectivity state, written only by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub reachability: Reachability,
    pub last_changed_at: DateTime<Utc>,
}

impl ConnectivityState {
    pub fn is_reachable(&self) -> bool {
        self.reachability == Reachability::Reachable
    }
}

/// Edge published when reachability flips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameReachable,
    BecameUnreachable,
}

/// Errors from building a monitor
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("Probe timeout ({timeout:?}) must be shorter than the probe interval ({interval:?})")]
    TimeoutNotShorterThanInterval {
        timeout: Duration,
        interval: Duration,
    },

    #[error("Probe interval must be greater than zero")]
    ZeroInterval,

    #[error("Failed to build probe client: {0}")]
    Client(String),
}

/// Lightweight reachability check
#[async_trait]
pub trait Probe: Send + Sync {
    /// `true` when the endpoint answered
    async fn check(&self) -> bool;
}

/// Probe that issues a `HEAD` request against a URL.
///
/// Any answer below 500 counts as reachable; gateway errors mean the
/// backend behind the proxy is down.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ConnectivityError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectivityError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!("Probe of {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Two-state, edge-triggered reachability monitor
pub struct ConnectivityMonitor {
    probe: Arc<dyn Probe>,
    interval: Duration,
    timeout: Duration,
    state: watch::Sender<ConnectivityState>,
    transitions: broadcast::Sender<Transition>,
}

impl ConnectivityMonitor {
    /// Create a monitor; the probe timeout must be shorter than the interval
    pub fn new(
        probe: Arc<dyn Probe>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, ConnectivityError> {
        if interval.is_zero() {
            return Err(ConnectivityError::ZeroInterval);
        }
        if timeout >= interval {
            return Err(ConnectivityError::TimeoutNotShorterThanInterval { timeout, interval });
        }

        let (state, _) = watch::channel(ConnectivityState {
            reachability: Reachability::Unreachable,
            last_changed_at: Utc::now(),
        });
        let (transitions, _) = broadcast::channel(16);

        Ok(Self {
            probe,
            interval,
            timeout,
            state,
            transitions,
        })
    }

    /// Monitor using the configured interval and timeout
    pub fn from_config(config: &Config, probe: Arc<dyn Probe>) -> Result<Self, ConnectivityError> {
        Self::new(probe, config.probe_interval(), config.probe_timeout())
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.state().is_reachable()
    }

    /// Watch the current state (always holds the latest value)
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Receive transitions as they happen
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Feed one probe result into the state machine.
    ///
    /// Returns the transition it caused, if any.
    pub fn observe(&self, probe_ok: bool) -> Option<Transition> {
        let next = if probe_ok {
            Reachability::Reachable
        } else {
            Reachability::Unreachable
        };

        let changed = self.state.send_if_modified(|state| {
            if state.reachability == next {
                return false;
            }
            state.reachability = next;
            state.last_changed_at = Utc::now();
            true
        });

        if !changed {
            return None;
        }

        let transition = match next {
            Reachability::Reachable => {
                info!("Remote endpoint reachable");
                Transition::BecameReachable
            }
            Reachability::Unreachable => {
                warn!("Remote endpoint unreachable");
                Transition::BecameUnreachable
            }
        };
        // No subscribers is fine; the watch channel still holds the state
        let _ = self.transitions.send(transition);
        Some(transition)
    }

    /// Run one probe, bounded by the probe timeout
    pub async fn probe_once(&self) -> Option<Transition> {
        let ok = match tokio::time::timeout(self.timeout, self.probe.check()).await {
            Ok(ok) => ok,
            Err(_) => {
                debug!("Probe timed out after {:?}", self.timeout);
                false
            }
        };
        self.observe(ok)
    }

    /// Spawn the periodic probe task.
    ///
    /// The first probe runs immediately. The task stops when `shutdown`
    /// becomes `true` or its sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.probe_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Connectivity monitor stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
