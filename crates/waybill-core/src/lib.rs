//! Waybill Core Library
//!
//! This crate provides the offline sync engine for the waybill warehouse
//! client: transfers created and edited while offline are queued durably
//! and replayed against the backend once it is reachable again.
//!
//! # Architecture
//!
//! - **LocalStore**: SQLite queues (one per operation kind) plus the cached
//!   read model shown while offline
//! - **ConnectivityMonitor**: periodic probe, publishes reachability edges
//! - **SyncEngine**: drains the queues in a fixed kind order on reconnect
//! - **VersionAdapter**: maps logical fields to the backend's wire names
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Arc::new(LocalStore::open(&config)?);
//! let executor = Arc::new(HttpExecutor::new(url, config.call_timeout())?);
//! let engine = SyncEngine::from_config(&config, store, executor);
//!
//! // Offline: queued
//! engine.submit(EntityRef::Remote(10), OperationPayload::Cancel, false).await?;
//!
//! // Back online
//! engine.on_connectivity_restored().await?;
//! ```
//!
//! # Modules
//!
//! - `engine`: Sync engine (main entry point)
//! - `models`: Operations, payloads and cached transfers
//! - `storage`: SQLite persistence
//! - `connectivity`: Reachability monitor
//! - `adapter`: API version field mapping
//! - `executor`: Remote call seam and HTTP implementation
//! - `config`: Application configuration

pub mod adapter;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod executor;
pub mod models;
pub mod storage;

pub use adapter::{ApiVersion, VersionAdapter, WirePayload};
pub use config::Config;
pub use connectivity::{
    ConnectivityError, ConnectivityMonitor, ConnectivityState, HttpProbe, Probe, Reachability,
    Transition,
};
pub use engine::{
    EngineError, EngineStatus, KindSummary, PassError, PassOutcome, PassSummary, SubmitOutcome,
    SyncEngine,
};
pub use executor::{FailureClass, HttpExecutor, RemoteError, RemoteExecutor, RemoteResult};
pub use models::{
    CachedEntity, CorrelationToken, CreatePayload, DraftLine, EntityRef, ModelError,
    OperationId, OperationKind, OperationPayload, PendingOperation, ProductUpdatePayload,
    UpdatePayload,
};
pub use storage::{LocalStore, StorageError, StorageResult};
