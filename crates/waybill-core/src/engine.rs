//! Sync engine
//!
//! Owns the online/offline data flow. Operations submitted while offline
//! (or while older work is still queued) go into the store; a drain pass
//! replays the queues against the [`RemoteExecutor`] in the fixed kind
//! order, stopping a kind at its first failure so nothing is applied out
//! of order. A pass ends with a refresh of the cached read model.
//!
//! Passes are single-flight: a trigger that arrives while a pass is
//! running returns [`PassOutcome::AlreadyRunning`] and does nothing. This
//! holds across processes too, since a pass also takes the store's drain
//! lease (a `waybill watch` and a `waybill sync` share one database).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::{ApiVersion, VersionAdapter};
use crate::config::Config;
use crate::connectivity::Transition;
use crate::executor::{FailureClass, RemoteError, RemoteExecutor, RemoteResult};
use crate::models::{
    CachedEntity, EntityRef, OperationId, OperationKind, OperationPayload, PendingOperation,
};
use crate::storage::{LocalStore, StorageError, StorageResult};

/// Default bound on a single executor call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Slack on top of two call timeouts before an unrenewed drain lease lapses
const LEASE_GRACE: Duration = Duration::from_secs(30);

/// Errors surfaced to the caller of an engine operation
#[derive(Error, Debug)]
pub enum EngineError {
    /// Local storage failed; the current operation cannot be trusted
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The server refused an operation submitted online
    #[error("{0}")]
    Rejected(RemoteError),

    /// The drain lease expired mid-pass and another engine took it
    #[error("drain lease lost to another sync; stopped this pass")]
    LeaseLost,
}

/// Whether a drain pass is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Draining,
}

/// Per-kind counts for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Items waiting on a Create that has not drained yet
    pub blocked: usize,
    /// Queue length after the kind was drained
    pub remaining: usize,
}

/// A failed item recorded during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassError {
    pub kind: OperationKind,
    pub id: OperationId,
    pub class: FailureClass,
    pub message: String,
}

/// Report of one drain pass, broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub api_version: ApiVersion,
    pub kinds: BTreeMap<OperationKind, KindSummary>,
    /// Whether the cached entities were refreshed from the server
    pub refreshed: bool,
    pub errors: Vec<PassError>,
}

impl PassSummary {
    fn new(api_version: ApiVersion) -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            api_version,
            kinds: BTreeMap::new(),
            refreshed: false,
            errors: Vec::new(),
        }
    }

    pub fn kind(&self, kind: OperationKind) -> KindSummary {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_succeeded(&self) -> usize {
        self.kinds.values().map(|k| k.succeeded).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.kinds.values().map(|k| k.failed).sum()
    }

    pub fn total_remaining(&self) -> usize {
        self.kinds.values().map(|k| k.remaining).sum()
    }

    /// Nothing failed and nothing is left behind
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.total_remaining() == 0
    }
}

/// Result of asking for a drain pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed(PassSummary),
    /// Another pass was in progress; this trigger was dropped
    AlreadyRunning,
}

/// Result of submitting an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Sent straight to the server; `entity` is the remote entity
    Applied { entity: EntityRef },
    /// Stored for a later drain pass
    Queued { id: OperationId },
}

/// Remote target of an operation after correlation lookup
enum Target {
    /// Remote id to call with; `None` for a Create
    Ready(Option<i64>),
    /// The entity's Create is still queued
    Blocked,
    /// No Create and no mapping for the token
    Unresolved,
}

enum ItemResult {
    Done,
    Blocked,
    Failed(RemoteError),
}

/// Single-flight flag plus the store's drain lease for one pass.
///
/// Both are given back on drop, even when the pass fails.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
    lease: Option<(&'a LocalStore, &'a str)>,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, lease: None })
    }

    /// `false` means some other engine on this database is draining
    fn claim_lease(
        &mut self,
        store: &'a LocalStore,
        owner: &'a str,
        ttl: Duration,
    ) -> StorageResult<bool> {
        let claimed = store.try_acquire_drain_lease(owner, ttl)?;
        if claimed {
            self.lease = Some((store, owner));
        }
        Ok(claimed)
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if let Some((store, owner)) = self.lease {
            if let Err(e) = store.release_drain_lease(owner) {
                warn!("Could not release drain lease: {}", e);
            }
        }
        self.flag.store(false, Ordering::Release);
    }
}

/// Queue-and-replay engine between the store and the remote executor
pub struct SyncEngine {
    store: Arc<LocalStore>,
    executor: Arc<dyn RemoteExecutor>,
    adapter: VersionAdapter,
    /// Version from configuration; skips negotiation
    pinned_version: Option<ApiVersion>,
    /// Version reported by the server, once known
    negotiated_version: OnceLock<ApiVersion>,
    call_timeout: Duration,
    draining: AtomicBool,
    /// Identifies this engine in the store's drain lease
    lease_owner: String,
    status: watch::Sender<EngineStatus>,
    summaries: broadcast::Sender<PassSummary>,
}

impl SyncEngine {
    pub fn new(store: Arc<LocalStore>, executor: Arc<dyn RemoteExecutor>) -> Self {
        let (status, _) = watch::channel(EngineStatus::Idle);
        let (summaries, _) = broadcast::channel(16);

        Self {
            store,
            executor,
            adapter: VersionAdapter::default(),
            pinned_version: None,
            negotiated_version: OnceLock::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            draining: AtomicBool::new(false),
            lease_owner: Uuid::new_v4().to_string(),
            status,
            summaries,
        }
    }

    /// Engine configured from the adapter threshold, pinned version and call timeout
    pub fn from_config(
        config: &Config,
        store: Arc<LocalStore>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self::new(store, executor)
            .with_adapter(VersionAdapter::new(config.version_threshold))
            .with_api_version(config.pinned_api_version())
            .with_call_timeout(config.call_timeout())
    }

    pub fn with_adapter(mut self, adapter: VersionAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// Pin the backend API version instead of asking the server
    pub fn with_api_version(mut self, version: Option<ApiVersion>) -> Self {
        self.pinned_version = version;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Receive a summary after every completed pass
    pub fn subscribe_summaries(&self) -> broadcast::Receiver<PassSummary> {
        self.summaries.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    // ==================== Presentation reads ====================

    pub fn list_pending(&self, kind: OperationKind) -> StorageResult<Vec<PendingOperation>> {
        self.store.list_pending(kind)
    }

    pub fn count_pending(&self, kind: OperationKind) -> StorageResult<usize> {
        self.store.count_pending(kind)
    }

    /// Badge counts for every kind, in drain order
    pub fn pending_counts(&self) -> StorageResult<Vec<(OperationKind, usize)>> {
        OperationKind::DRAIN_ORDER
            .iter()
            .map(|&kind| Ok((kind, self.store.count_pending(kind)?)))
            .collect()
    }

    pub fn cached_entities(&self) -> StorageResult<Vec<CachedEntity>> {
        self.store.read_cached_entities()
    }

    // ==================== User actions ====================

    /// Submit a new operation for an entity.
    ///
    /// Goes straight to the server only when `reachable` and nothing is
    /// queued; otherwise the operation is queued so it cannot overtake
    /// older work. A transient failure of the direct call also queues.
    pub async fn submit(
        &self,
        entity: EntityRef,
        payload: OperationPayload,
        reachable: bool,
    ) -> Result<SubmitOutcome, EngineError> {
        self.submit_operation(PendingOperation::new(entity, payload), reachable)
            .await
    }

    /// Submit a prepared operation (e.g. a Create from [`PendingOperation::create`])
    pub async fn submit_operation(
        &self,
        op: PendingOperation,
        reachable: bool,
    ) -> Result<SubmitOutcome, EngineError> {
        let kind = op.kind();

        if reachable && !self.is_draining() && self.store.total_pending()? == 0 {
            match self.resolve_target(&op)? {
                Target::Ready(target) => {
                    let version = self.api_version().await;
                    match self.execute(&op, target, version).await {
                        Ok(created) => {
                            if let (Some(remote_id), Some(token)) = (created, op.entity_ref.token())
                            {
                                self.store.complete_create(op.id, token, remote_id)?;
                            }
                            let entity = created.map(EntityRef::Remote).unwrap_or(op.entity_ref);
                            info!("Applied {} on {} directly", kind, entity);
                            if !self.refresh_cache().await? {
                                self.apply_optimistic(entity, &op.payload)?;
                            }
                            return Ok(SubmitOutcome::Applied { entity });
                        }
                        Err(e) if e.is_transient() => {
                            warn!("Direct {} failed, queuing instead: {}", kind, e);
                        }
                        Err(e) => return Err(EngineError::Rejected(e)),
                    }
                }
                Target::Unresolved => {
                    return Err(EngineError::Rejected(unresolved(&op.entity_ref)));
                }
                Target::Blocked => {}
            }
        }

        self.store.enqueue(&op)?;
        self.apply_optimistic(op.entity_ref, &op.payload)?;
        info!("Queued {} {} for {}", kind, op.id, op.entity_ref);
        Ok(SubmitOutcome::Queued { id: op.id })
    }

    /// Drop a queued operation.
    ///
    /// Safe at any time, including mid-drain. Discarding a Create also
    /// drops its placeholder from the cache.
    pub fn discard(&self, kind: OperationKind, id: OperationId) -> Result<bool, EngineError> {
        // A corrupt row can still be discarded; only the placeholder lookup is skipped
        let placeholder = match kind {
            OperationKind::Create => self
                .store
                .get_pending(kind, id)
                .ok()
                .flatten()
                .map(|op| op.entity_ref),
            _ => None,
        };

        let removed = self.store.remove(kind, id)?;
        if removed {
            if let Some(entity) = placeholder {
                self.store.remove_cached_entity(&entity)?;
            }
            info!("Discarded {} {}", kind, id);
        }
        Ok(removed)
    }

    // ==================== Drain triggers ====================

    /// Connectivity came back
    pub async fn on_connectivity_restored(&self) -> Result<PassOutcome, EngineError> {
        info!("Connectivity restored, draining queues");
        self.run_pass().await
    }

    /// User asked for a retry; runs regardless of the monitor's state
    pub async fn manual_sync(&self) -> Result<PassOutcome, EngineError> {
        info!("Manual sync requested");
        self.run_pass().await
    }

    /// Run one drain pass unless one is already running
    pub async fn run_pass(&self) -> Result<PassOutcome, EngineError> {
        let Some(mut guard) = DrainGuard::acquire(&self.draining) else {
            debug!("Drain pass already running, ignoring trigger");
            return Ok(PassOutcome::AlreadyRunning);
        };
        if !guard.claim_lease(&self.store, &self.lease_owner, self.lease_ttl())? {
            info!("Another sync is draining this store, ignoring trigger");
            return Ok(PassOutcome::AlreadyRunning);
        }

        self.status.send_replace(EngineStatus::Draining);
        let result = self.drain().await;
        self.status.send_replace(EngineStatus::Idle);

        let summary = result?;
        let _ = self.summaries.send(summary.clone());
        Ok(PassOutcome::Completed(summary))
    }

    /// React to monitor transitions until shutdown
    pub async fn run(
        &self,
        mut transitions: broadcast::Receiver<Transition>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = transitions.recv() => match event {
                    Ok(Transition::BecameReachable) => {
                        if let Err(e) = self.on_connectivity_restored().await {
                            error!("Drain pass failed: {}", e);
                        }
                    }
                    Ok(Transition::BecameUnreachable) => {
                        debug!("Connectivity lost, queuing until it returns");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} connectivity transitions", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Sync engine stopped");
    }

    // ==================== Drain pass ====================

    async fn drain(&self) -> Result<PassSummary, EngineError> {
        let version = self.api_version().await;
        info!("Starting drain pass (API {})", version);

        let mut summary = PassSummary::new(version);
        for kind in OperationKind::DRAIN_ORDER {
            let counts = self.drain_kind(kind, version, &mut summary.errors).await?;
            summary.kinds.insert(kind, counts);
        }

        self.renew_lease()?;
        summary.refreshed = self.refresh_cache().await?;
        summary.finished_at = Utc::now();

        info!(
            "Drain pass finished: {} succeeded, {} failed, {} remaining",
            summary.total_succeeded(),
            summary.total_failed(),
            summary.total_remaining()
        );
        Ok(summary)
    }

    /// Drain one queue from its head, stopping at the first item that cannot go
    async fn drain_kind(
        &self,
        kind: OperationKind,
        version: ApiVersion,
        errors: &mut Vec<PassError>,
    ) -> Result<KindSummary, EngineError> {
        let mut counts = KindSummary::default();

        for op in self.store.list_pending(kind)? {
            self.renew_lease()?;
            match self.drain_item(&op, version).await? {
                ItemResult::Done => counts.succeeded += 1,
                ItemResult::Blocked => {
                    debug!("{} {} waits for its create", kind, op.id);
                    counts.blocked += 1;
                    break;
                }
                ItemResult::Failed(e) => {
                    counts.failed += 1;
                    let attempts = self.store.record_failure(kind, op.id, &e.to_string())?;
                    warn!(
                        kind = %kind,
                        id = %op.id,
                        attempts = attempts.unwrap_or(op.attempt_count + 1),
                        class = %e.class(),
                        "Drain stopped: {}",
                        e
                    );
                    errors.push(PassError {
                        kind,
                        id: op.id,
                        class: e.class(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        counts.remaining = self.store.count_pending(kind)?;
        Ok(counts)
    }

    async fn drain_item(
        &self,
        op: &PendingOperation,
        version: ApiVersion,
    ) -> StorageResult<ItemResult> {
        let target = match self.resolve_target(op)? {
            Target::Ready(target) => target,
            Target::Blocked => return Ok(ItemResult::Blocked),
            Target::Unresolved => return Ok(ItemResult::Failed(unresolved(&op.entity_ref))),
        };

        match self.execute(op, target, version).await {
            Ok(created) => {
                self.finish(op, created)?;
                Ok(ItemResult::Done)
            }
            Err(e) => Ok(ItemResult::Failed(e)),
        }
    }

    /// Drop a drained item; a Create also records its remote id
    fn finish(&self, op: &PendingOperation, created: Option<i64>) -> StorageResult<()> {
        let kind = op.kind();
        let removed = match (created, op.entity_ref.token()) {
            (Some(remote_id), Some(token)) => {
                self.store.complete_create(op.id, token, remote_id)?
            }
            _ => self.store.remove(kind, op.id)?,
        };

        if removed {
            debug!("Drained {} {}", kind, op.id);
        } else {
            debug!("{} {} was discarded during the pass", kind, op.id);
        }
        Ok(())
    }

    fn resolve_target(&self, op: &PendingOperation) -> StorageResult<Target> {
        if op.kind() == OperationKind::Create {
            return Ok(Target::Ready(None));
        }

        match op.entity_ref {
            EntityRef::Remote(id) => Ok(Target::Ready(Some(id))),
            EntityRef::Local(token) => {
                if let Some(id) = self.store.resolve_token(token)? {
                    Ok(Target::Ready(Some(id)))
                } else if self.store.has_pending_create(token)? {
                    Ok(Target::Blocked)
                } else {
                    Ok(Target::Unresolved)
                }
            }
        }
    }

    /// One executor call for an operation. Returns the new id for a Create.
    async fn execute(
        &self,
        op: &PendingOperation,
        target: Option<i64>,
        version: ApiVersion,
    ) -> RemoteResult<Option<i64>> {
        let kind = op.kind();
        let wire = self
            .adapter
            .to_wire_shape(kind, &op.payload.to_logical(), version);
        let entity = || target.ok_or_else(|| unresolved(&op.entity_ref));

        let applied = match &op.payload {
            OperationPayload::Create(_) => {
                return self.call(self.executor.create(&wire)).await.map(Some);
            }
            OperationPayload::Update(_) => self.call(self.executor.update(entity()?, &wire)).await?,
            OperationPayload::ProductUpdate(_) => {
                self.call(self.executor.update_product(entity()?, &wire))
                    .await?
            }
            OperationPayload::Cancel => self.call(self.executor.cancel(entity()?)).await?,
            OperationPayload::Validate => self.call(self.executor.validate(entity()?)).await?,
        };

        if applied {
            Ok(None)
        } else {
            Err(RemoteError::Rejected(format!(
                "server did not apply {} on {}",
                kind, op.entity_ref
            )))
        }
    }

    /// Bound a remote call by the call timeout
    async fn call<T>(&self, fut: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient(format!(
                "call timed out after {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Version used for this pass: pinned, negotiated, or `Unknown`
    async fn api_version(&self) -> ApiVersion {
        if let Some(version) = self.pinned_version {
            return version;
        }
        if let Some(version) = self.negotiated_version.get() {
            return *version;
        }

        match self.call(self.executor.server_version()).await {
            Ok(ApiVersion::Unknown) => ApiVersion::Unknown,
            Ok(version) => {
                info!("Backend API version {}", version);
                let _ = self.negotiated_version.set(version);
                version
            }
            Err(e) => {
                debug!("Could not determine backend version: {}", e);
                ApiVersion::Unknown
            }
        }
    }

    /// Replace the remote part of the cache; `false` if the fetch failed
    async fn refresh_cache(&self) -> StorageResult<bool> {
        match self.call(self.executor.fetch_entities()).await {
            Ok(entities) => {
                debug!("Refreshed {} cached transfers", entities.len());
                self.store.replace_cached_entities(&entities)?;
                Ok(true)
            }
            Err(e) => {
                warn!("Cache refresh failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Reflect a not-yet-confirmed operation in the cached read model
    fn apply_optimistic(&self, entity: EntityRef, payload: &OperationPayload) -> StorageResult<()> {
        let key = match entity {
            EntityRef::Local(token) => self
                .store
                .resolve_token(token)?
                .map(EntityRef::Remote)
                .unwrap_or(entity),
            remote => remote,
        };

        if let OperationPayload::Create(create) = payload {
            let mut placeholder = CachedEntity::new(key, create.name.clone(), "draft");
            placeholder.data = payload.to_logical();
            placeholder.data.remove("name");
            return self.store.upsert_cached_entity(&placeholder);
        }

        let Some(mut cached) = self.store.get_cached_entity(&key)? else {
            return Ok(());
        };
        match payload {
            OperationPayload::Cancel => cached.state = "cancel".to_string(),
            OperationPayload::Validate => cached.state = "done".to_string(),
            _ => cached.data.extend(payload.to_logical()),
        }
        self.store.upsert_cached_entity(&cached)
    }
}

impl SyncEngine {
    /// Each remote call is bounded by `call_timeout`, and the lease is
    /// renewed before every call, so two timeouts plus slack cover a gap.
    fn lease_ttl(&self) -> Duration {
        self.call_timeout
            .saturating_mul(2)
            .saturating_add(LEASE_GRACE)
    }

    fn renew_lease(&self) -> Result<(), EngineError> {
        if self
            .store
            .try_acquire_drain_lease(&self.lease_owner, self.lease_ttl())?
        {
            Ok(())
        } else {
            warn!("Drain lease taken over by another sync");
            Err(EngineError::LeaseLost)
        }
    }
}

fn unresolved(entity: &EntityRef) -> RemoteError {
    RemoteError::Rejected(format!("unresolved entity {}", entity))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::adapter::{ApiVersion, WirePayload};
    use crate::executor::{RemoteExecutor, RemoteResult};
    use crate::models::{CachedEntity, EntityRef, OperationKind};

    /// A call the scripted executor received
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Create(WirePayload),
        Update(i64, WirePayload),
        UpdateProduct(i64, WirePayload),
        Cancel(i64),
        Validate(i64),
        Fetch,
        Version,
    }

    impl Call {
        pub fn is_operation(&self) -> bool {
            !matches!(self, Call::Fetch | Call::Version)
        }
    }

    /// In-memory executor that records calls and plays back queued results.
    ///
    /// With nothing scripted, creates succeed with ids counting up from
    /// 42 (and appear in later fetches), and every other call applies.
    pub struct ScriptedExecutor {
        calls: Mutex<Vec<Call>>,
        create_results: Mutex<VecDeque<RemoteResult<i64>>>,
        apply_results: Mutex<HashMap<OperationKind, VecDeque<RemoteResult<bool>>>>,
        fetch_results: Mutex<VecDeque<RemoteResult<Vec<CachedEntity>>>>,
        server: Mutex<Vec<CachedEntity>>,
        version: Mutex<RemoteResult<ApiVersion>>,
        next_id: AtomicI64,
        hang: AtomicBool,
        gate: Mutex<Option<std::sync::Arc<Notify>>>,
        pub entered: Notify,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                create_results: Mutex::new(VecDeque::new()),
                apply_results: Mutex::new(HashMap::new()),
                fetch_results: Mutex::new(VecDeque::new()),
                server: Mutex::new(Vec::new()),
                version: Mutex::new(Ok(ApiVersion::new(18, 0))),
                next_id: AtomicI64::new(42),
                hang: AtomicBool::new(false),
                gate: Mutex::new(None),
                entered: Notify::new(),
            }
        }

        pub fn push_create(&self, result: RemoteResult<i64>) {
            self.create_results.lock().unwrap().push_back(result);
        }

        pub fn push_apply(&self, kind: OperationKind, result: RemoteResult<bool>) {
            self.apply_results
                .lock()
                .unwrap()
                .entry(kind)
                .or_default()
                .push_back(result);
        }

        pub fn push_fetch(&self, result: RemoteResult<Vec<CachedEntity>>) {
            self.fetch_results.lock().unwrap().push_back(result);
        }

        pub fn set_version(&self, result: RemoteResult<ApiVersion>) {
            *self.version.lock().unwrap() = result;
        }

        /// Make every operation call hang forever
        pub fn hang(&self) {
            self.hang.store(true, Ordering::SeqCst);
        }

        /// Hold operation calls until the returned notify fires
        pub fn hold(&self) -> std::sync::Arc<Notify> {
            let gate = std::sync::Arc::new(Notify::new());
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// Calls excluding fetches and version queries
        pub fn operation_calls(&self) -> Vec<Call> {
            self.calls().into_iter().filter(Call::is_operation).collect()
        }

        async fn enter(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                self.entered.notify_one();
                gate.notified().await;
            }
        }

        fn next_apply(&self, kind: OperationKind) -> RemoteResult<bool> {
            self.apply_results
                .lock()
                .unwrap()
                .get_mut(&kind)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(true))
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn create(&self, payload: &WirePayload) -> RemoteResult<i64> {
            self.enter(Call::Create(payload.clone())).await;
            let scripted = self.create_results.lock().unwrap().pop_front();
            let id = match scripted {
                Some(result) => result?,
                None => self.next_id.fetch_add(1, Ordering::SeqCst),
            };
            let name = payload
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            self.server
                .lock()
                .unwrap()
                .push(CachedEntity::new(EntityRef::Remote(id), name, "draft"));
            Ok(id)
        }

        async fn update(&self, entity_id: i64, payload: &WirePayload) -> RemoteResult<bool> {
            self.enter(Call::Update(entity_id, payload.clone())).await;
            self.next_apply(OperationKind::Update)
        }

        async fn update_product(&self, entity_id: i64, payload: &WirePayload) -> RemoteResult<bool> {
            self.enter(Call::UpdateProduct(entity_id, payload.clone()))
                .await;
            self.next_apply(OperationKind::ProductUpdate)
        }

        async fn cancel(&self, entity_id: i64) -> RemoteResult<bool> {
            self.enter(Call::Cancel(entity_id)).await;
            self.next_apply(OperationKind::Cancel)
        }

        async fn validate(&self, entity_id: i64) -> RemoteResult<bool> {
            self.enter(Call::Validate(entity_id)).await;
            self.next_apply(OperationKind::Validate)
        }

        async fn fetch_entities(&self) -> RemoteResult<Vec<CachedEntity>> {
            self.calls.lock().unwrap().push(Call::Fetch);
            let scripted = self.fetch_results.lock().unwrap().pop_front();
            match scripted {
                Some(result) => result,
                None => Ok(self.server.lock().unwrap().clone()),
            }
        }

        async fn server_version(&self) -> RemoteResult<ApiVersion> {
            self.calls.lock().unwrap().push(Call::Version);
            self.version.lock().unwrap().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{Call, ScriptedExecutor};
    use super::*;
    use crate::connectivity::test_support::SwitchProbe;
    use crate::connectivity::ConnectivityMonitor;
    use crate::models::{CreatePayload, ProductUpdatePayload, UpdatePayload};
    use serde_json::Map;

    fn setup() -> (Arc<SyncEngine>, Arc<ScriptedExecutor>) {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = Arc::new(SyncEngine::new(store, executor.clone()));
        (engine, executor)
    }

    fn completed(outcome: PassOutcome) -> PassSummary {
        match outcome {
            PassOutcome::Completed(summary) => summary,
            PassOutcome::AlreadyRunning => panic!("expected a completed pass"),
        }
    }

    fn update(line_id: i64, quantity: f64) -> OperationPayload {
        OperationPayload::Update(UpdatePayload {
            line_id,
            quantity,
            extra: Map::new(),
        })
    }

    fn product(product_id: i64) -> OperationPayload {
        OperationPayload::ProductUpdate(ProductUpdatePayload {
            product_id,
            quantity: None,
            extra: Map::new(),
        })
    }

    #[tokio::test]
    async fn test_offline_create_drains_on_reconnect() {
        let (engine, executor) = setup();

        let op = PendingOperation::create(CreatePayload::named("PO-1"));
        let placeholder = op.entity_ref;
        let outcome = engine.submit_operation(op, false).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(engine.count_pending(OperationKind::Create).unwrap(), 1);
        assert!(engine.store().get_cached_entity(&placeholder).unwrap().is_some());

        let summary = completed(engine.on_connectivity_restored().await.unwrap());
        assert_eq!(summary.kind(OperationKind::Create).succeeded, 1);
        assert!(summary.refreshed);

        let calls = executor.operation_calls();
        assert_eq!(calls.len(), 1);
        let Call::Create(ref wire) = calls[0] else {
            panic!("expected a create call");
        };
        assert_eq!(wire["name"], "PO-1");

        assert_eq!(engine.count_pending(OperationKind::Create).unwrap(), 0);
        let cached = engine.cached_entities().unwrap();
        assert!(cached
            .iter()
            .any(|e| e.key == EntityRef::Remote(42) && e.name == "PO-1"));
        assert!(cached.iter().all(|e| !e.is_local()));
    }

    #[tokio::test]
    async fn test_transient_cancel_retried_by_manual_sync() {
        let (engine, executor) = setup();
        executor.push_apply(
            OperationKind::Cancel,
            Err(RemoteError::Transient("connection reset".into())),
        );

        engine
            .submit(EntityRef::Remote(10), OperationPayload::Cancel, false)
            .await
            .unwrap();

        let first = completed(engine.on_connectivity_restored().await.unwrap());
        assert_eq!(engine.count_pending(OperationKind::Cancel).unwrap(), 1);
        assert_eq!(first.kind(OperationKind::Cancel).failed, 1);
        assert_eq!(first.errors[0].class, FailureClass::TransientRemoteFailure);

        let queued = engine.list_pending(OperationKind::Cancel).unwrap();
        assert_eq!(queued[0].attempt_count, 1);
        assert!(queued[0].last_error.is_some());

        let second = completed(engine.manual_sync().await.unwrap());
        assert_eq!(engine.count_pending(OperationKind::Cancel).unwrap(), 0);
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn test_failure_stops_only_that_kind() {
        let (engine, executor) = setup();
        executor.push_apply(
            OperationKind::Update,
            Err(RemoteError::Rejected("line is locked".into())),
        );

        engine
            .submit(EntityRef::Remote(10), update(1, 1.0), false)
            .await
            .unwrap();
        engine
            .submit(EntityRef::Remote(10), update(1, 2.0), false)
            .await
            .unwrap();
        engine
            .submit(EntityRef::Remote(11), OperationPayload::Validate, false)
            .await
            .unwrap();

        let summary = completed(engine.run_pass().await.unwrap());

        let calls = executor.operation_calls();
        let updates: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Update(id, wire) => Some((*id, wire["quantity"].clone())),
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec![(10, serde_json::json!(1.0))]);
        assert!(calls.contains(&Call::Validate(11)));

        assert_eq!(summary.kind(OperationKind::Update).failed, 1);
        assert_eq!(summary.kind(OperationKind::Update).remaining, 2);
        assert_eq!(summary.kind(OperationKind::Validate).succeeded, 1);
        assert_eq!(summary.errors[0].class, FailureClass::RemoteRejection);
    }

    #[tokio::test]
    async fn test_updates_apply_in_enqueue_order() {
        let (engine, executor) = setup();
        for quantity in [1.0, 2.0, 3.0] {
            engine
                .submit(EntityRef::Remote(10), update(7, quantity), false)
                .await
                .unwrap();
        }

        completed(engine.run_pass().await.unwrap());

        let quantities: Vec<_> = executor
            .operation_calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(_, wire) => wire["quantity"].as_f64(),
                _ => None,
            })
            .collect();
        assert_eq!(quantities, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_create_drains_before_product_update_on_same_entity() {
        let (engine, executor) = setup();

        let create = PendingOperation::create(CreatePayload::named("PO-5"));
        let local = create.entity_ref;
        // Product update queued first; kind order still puts the create ahead
        engine.submit(local, product(9), false).await.unwrap();
        engine.submit_operation(create, false).await.unwrap();

        completed(engine.run_pass().await.unwrap());

        let calls = executor.operation_calls();
        assert!(matches!(calls[0], Call::Create(_)));
        assert!(matches!(calls[1], Call::UpdateProduct(42, _)));
        assert_eq!(engine.store().total_pending().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_item_waiting_on_failed_create_is_blocked() {
        let (engine, executor) = setup();
        executor.push_create(Err(RemoteError::Transient("timeout".into())));

        let create = PendingOperation::create(CreatePayload::named("PO-6"));
        let local = create.entity_ref;
        engine.submit_operation(create, false).await.unwrap();
        engine.submit(local, product(3), false).await.unwrap();

        let summary = completed(engine.run_pass().await.unwrap());
        assert_eq!(summary.kind(OperationKind::ProductUpdate).blocked, 1);
        assert_eq!(summary.kind(OperationKind::ProductUpdate).failed, 0);

        let waiting = engine.list_pending(OperationKind::ProductUpdate).unwrap();
        assert_eq!(waiting[0].attempt_count, 0);
        assert_eq!(executor.operation_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_orphaned_token_is_a_rejection() {
        let (engine, _executor) = setup();
        engine
            .submit(EntityRef::new_local(), product(3), false)
            .await
            .unwrap();

        let summary = completed(engine.run_pass().await.unwrap());
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].class, FailureClass::RemoteRejection);
        assert!(summary.errors[0].message.contains("unresolved entity"));
        assert_eq!(engine.count_pending(OperationKind::ProductUpdate).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_applied_counts_as_rejection() {
        let (engine, executor) = setup();
        executor.push_apply(OperationKind::Validate, Ok(false));
        engine
            .submit(EntityRef::Remote(3), OperationPayload::Validate, false)
            .await
            .unwrap();

        let summary = completed(engine.run_pass().await.unwrap());
        assert_eq!(summary.errors[0].class, FailureClass::RemoteRejection);
        assert_eq!(engine.count_pending(OperationKind::Validate).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_a_no_op() {
        let (engine, executor) = setup();
        engine
            .submit(EntityRef::Remote(10), OperationPayload::Cancel, false)
            .await
            .unwrap();

        let gate = executor.hold();
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_pass().await })
        };
        executor.entered.notified().await;

        assert!(engine.is_draining());
        assert_eq!(engine.status(), EngineStatus::Draining);
        assert_eq!(engine.manual_sync().await.unwrap(), PassOutcome::AlreadyRunning);

        gate.notify_one();
        let summary = completed(running.await.unwrap().unwrap());
        assert_eq!(summary.kind(OperationKind::Cancel).succeeded, 1);
        assert_eq!(executor.operation_calls().len(), 1);
        assert!(!engine.is_draining());
    }

    #[tokio::test]
    async fn test_discard_during_drain_is_tolerated() {
        let (engine, executor) = setup();
        let SubmitOutcome::Queued { id } = engine
            .submit(EntityRef::Remote(10), update(1, 5.0), false)
            .await
            .unwrap()
        else {
            panic!("expected queued");
        };

        let gate = executor.hold();
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_pass().await })
        };
        executor.entered.notified().await;

        assert!(engine.discard(OperationKind::Update, id).unwrap());
        gate.notify_one();

        let summary = completed(running.await.unwrap().unwrap());
        assert_eq!(summary.kind(OperationKind::Update).succeeded, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(engine.count_pending(OperationKind::Update).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_discarding_create_drops_placeholder() {
        let (engine, _executor) = setup();
        let create = PendingOperation::create(CreatePayload::named("PO-7"));
        let local = create.entity_ref;
        let id = create.id;
        engine.submit_operation(create, false).await.unwrap();

        assert!(engine.discard(OperationKind::Create, id).unwrap());
        assert!(!engine.discard(OperationKind::Create, id).unwrap());
        assert!(engine.store().get_cached_entity(&local).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_online_submit_goes_direct() {
        let (engine, executor) = setup();

        let outcome = engine
            .submit_operation(PendingOperation::create(CreatePayload::named("PO-8")), true)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SubmitOutcome::Applied {
                entity: EntityRef::Remote(42)
            }
        );
        assert_eq!(engine.store().total_pending().unwrap(), 0);
        assert_eq!(executor.operation_calls().len(), 1);
        assert!(engine
            .store()
            .get_cached_entity(&EntityRef::Remote(42))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_online_submit_queues_behind_older_work() {
        let (engine, executor) = setup();
        engine
            .submit(EntityRef::Remote(10), update(1, 1.0), false)
            .await
            .unwrap();

        let outcome = engine
            .submit(EntityRef::Remote(10), update(1, 2.0), true)
            .await
            .unwrap();

        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert!(executor.operation_calls().is_empty());
        assert_eq!(engine.count_pending(OperationKind::Update).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_online_transient_failure_falls_back_to_queue() {
        let (engine, executor) = setup();
        executor.push_apply(
            OperationKind::Cancel,
            Err(RemoteError::Transient("no route to host".into())),
        );

        let outcome = engine
            .submit(EntityRef::Remote(10), OperationPayload::Cancel, true)
            .await
            .unwrap();

        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(engine.count_pending(OperationKind::Cancel).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_online_rejection_is_returned() {
        let (engine, executor) = setup();
        executor.push_create(Err(RemoteError::Rejected("partner_id is required".into())));

        let err = engine
            .submit_operation(PendingOperation::create(CreatePayload::named("PO-9")), true)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Rejected(RemoteError::Rejected(_))));
        assert_eq!(engine.store().total_pending().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pinned_legacy_version_shapes_payload() {
        let (engine, executor) = setup();
        let engine = Arc::try_unwrap(engine)
            .ok()
            .unwrap()
            .with_api_version(Some(ApiVersion::new(17, 0)));

        let create = PendingOperation::create(CreatePayload {
            mobile_number: Some("+32 470 12 34 56".into()),
            ..CreatePayload::named("PO-10")
        });
        engine.submit_operation(create, false).await.unwrap();
        completed(engine.run_pass().await.unwrap());

        let Call::Create(ref wire) = executor.operation_calls()[0] else {
            panic!("expected a create call");
        };
        assert_eq!(wire["mobile"], "+32 470 12 34 56");
        assert!(!executor.calls().contains(&Call::Version));
    }

    #[tokio::test]
    async fn test_unknown_version_uses_current_shape() {
        let (engine, executor) = setup();
        executor.set_version(Err(RemoteError::Transient("offline".into())));

        let create = PendingOperation::create(CreatePayload {
            mobile_number: Some("+1 555 0199".into()),
            ..CreatePayload::named("PO-11")
        });
        engine.submit_operation(create, false).await.unwrap();
        let summary = completed(engine.run_pass().await.unwrap());

        assert_eq!(summary.api_version, ApiVersion::Unknown);
        let Call::Create(ref wire) = executor.operation_calls()[0] else {
            panic!("expected a create call");
        };
        assert_eq!(wire["mobile_phone"], "+1 555 0199");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out_as_transient() {
        let (engine, executor) = setup();
        executor.hang();
        engine
            .submit(EntityRef::Remote(10), OperationPayload::Cancel, false)
            .await
            .unwrap();

        let summary = completed(engine.run_pass().await.unwrap());
        assert_eq!(summary.errors[0].class, FailureClass::TransientRemoteFailure);
        assert_eq!(engine.count_pending(OperationKind::Cancel).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cache() {
        let (engine, executor) = setup();
        engine
            .store()
            .upsert_cached_entity(&CachedEntity::new(EntityRef::Remote(5), "PO-5", "assigned"))
            .unwrap();
        executor.push_fetch(Err(RemoteError::Transient("timeout".into())));

        let summary = completed(engine.run_pass().await.unwrap());
        assert!(!summary.refreshed);
        assert_eq!(engine.cached_entities().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_optimistic_state_changes() {
        let (engine, _executor) = setup();
        engine
            .store()
            .upsert_cached_entity(&CachedEntity::new(EntityRef::Remote(5), "PO-5", "assigned"))
            .unwrap();

        engine
            .submit(EntityRef::Remote(5), update(2, 4.0), false)
            .await
            .unwrap();
        engine
            .submit(EntityRef::Remote(5), OperationPayload::Cancel, false)
            .await
            .unwrap();

        let cached = engine
            .store()
            .get_cached_entity(&EntityRef::Remote(5))
            .unwrap()
            .unwrap();
        assert_eq!(cached.state, "cancel");
        assert_eq!(cached.data["quantity"], 4.0);
    }

    #[tokio::test]
    async fn test_run_loop_drains_on_reachable_transition() {
        let (engine, _executor) = setup();
        engine
            .submit(EntityRef::Remote(10), OperationPayload::Validate, false)
            .await
            .unwrap();

        let (transitions_tx, transitions_rx) = broadcast::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut summaries = engine.subscribe_summaries();

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(transitions_rx, shutdown_rx).await })
        };

        transitions_tx.send(Transition::BecameUnreachable).unwrap();
        transitions_tx.send(Transition::BecameReachable).unwrap();

        let summary = summaries.recv().await.unwrap();
        assert_eq!(summary.kind(OperationKind::Validate).succeeded, 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(engine.count_pending(OperationKind::Validate).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_counts_in_drain_order() {
        let (engine, _executor) = setup();
        engine
            .submit(EntityRef::Remote(1), OperationPayload::Validate, false)
            .await
            .unwrap();
        engine
            .submit(EntityRef::Remote(1), update(1, 1.0), false)
            .await
            .unwrap();

        let counts = engine.pending_counts().unwrap();
        let kinds: Vec<_> = counts.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, OperationKind::DRAIN_ORDER.to_vec());
        assert_eq!(counts[1], (OperationKind::Update, 1));
        assert_eq!(counts[4], (OperationKind::Validate, 1));
    }

    #[tokio::test]
    async fn test_second_engine_on_same_database_does_not_drain() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("waybill.db");

        let watch_executor = Arc::new(ScriptedExecutor::new());
        let watcher = Arc::new(SyncEngine::new(
            Arc::new(LocalStore::open_path(&path).unwrap()),
            watch_executor.clone(),
        ));
        let sync_executor = Arc::new(ScriptedExecutor::new());
        let manual = SyncEngine::new(
            Arc::new(LocalStore::open_path(&path).unwrap()),
            sync_executor.clone(),
        );

        watcher
            .submit_operation(PendingOperation::create(CreatePayload::named("PO-1")), false)
            .await
            .unwrap();

        let gate = watch_executor.hold();
        let running = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.run_pass().await })
        };
        watch_executor.entered.notified().await;

        assert_eq!(manual.manual_sync().await.unwrap(), PassOutcome::AlreadyRunning);
        assert!(!manual.is_draining());

        gate.notify_one();
        let summary = completed(running.await.unwrap().unwrap());
        assert_eq!(summary.kind(OperationKind::Create).succeeded, 1);

        // The lease is free again once the first pass ends
        let summary = completed(manual.manual_sync().await.unwrap());
        assert_eq!(summary.kind(OperationKind::Create).succeeded, 0);
        assert!(sync_executor.operation_calls().is_empty());
        assert_eq!(watch_executor.operation_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_lease_held_elsewhere_skips_pass() {
        let (engine, _executor) = setup();
        engine
            .submit(EntityRef::Remote(10), OperationPayload::Cancel, false)
            .await
            .unwrap();
        assert!(engine
            .store()
            .try_acquire_drain_lease("other", Duration::from_secs(60))
            .unwrap());

        assert_eq!(engine.manual_sync().await.unwrap(), PassOutcome::AlreadyRunning);
        assert_eq!(engine.count_pending(OperationKind::Cancel).unwrap(), 1);
        assert!(engine.store().release_drain_lease("other").unwrap());
    }

    #[tokio::test]
    async fn test_pass_stops_when_lease_is_taken_over() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("waybill.db");
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = Arc::new(SyncEngine::new(
            Arc::new(LocalStore::open_path(&path).unwrap()),
            executor.clone(),
        ));
        engine
            .submit(EntityRef::Remote(10), OperationPayload::Cancel, false)
            .await
            .unwrap();

        let gate = executor.hold();
        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_pass().await })
        };
        executor.entered.notified().await;

        let other = rusqlite::Connection::open(&path).unwrap();
        other
            .execute("UPDATE drain_lease SET owner = 'other'", [])
            .unwrap();
        gate.notify_one();

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, EngineError::LeaseLost));
        // The cancel itself went through before the takeover was noticed
        assert_eq!(engine.count_pending(OperationKind::Cancel).unwrap(), 0);
        assert!(!engine.is_draining());

        let owner: String = other
            .query_row("SELECT owner FROM drain_lease", [], |row| row.get(0))
            .unwrap();
        assert_eq!(owner, "other");
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_flip_drains_offline_create() {
        let (engine, executor) = setup();
        let probe = SwitchProbe::new(false);
        let monitor = Arc::new(
            ConnectivityMonitor::new(probe.clone(), Duration::from_secs(10), Duration::from_secs(3))
                .unwrap(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut summaries = engine.subscribe_summaries();

        let engine_task = {
            let engine = engine.clone();
            let transitions = monitor.subscribe();
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { engine.run(transitions, shutdown).await })
        };
        let monitor_task = monitor.clone().spawn(shutdown_rx);

        engine
            .submit_operation(PendingOperation::create(CreatePayload::named("PO-1")), false)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(engine.count_pending(OperationKind::Create).unwrap(), 1);
        assert!(executor.operation_calls().is_empty());

        probe.set(true);
        let summary = summaries.recv().await.unwrap();
        assert_eq!(summary.kind(OperationKind::Create).succeeded, 1);
        assert!(monitor.is_reachable());
        assert_eq!(engine.count_pending(OperationKind::Create).unwrap(), 0);
        assert!(engine
            .cached_entities()
            .unwrap()
            .iter()
            .any(|e| e.key == EntityRef::Remote(42) && e.name == "PO-1"));

        shutdown_tx.send(true).unwrap();
        monitor_task.await.unwrap();
        engine_task.await.unwrap();
    }
}
