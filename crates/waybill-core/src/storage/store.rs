//! Local durable store
//!
//! SQLite-backed owner of the five pending-operation queues, the cached
//! read model, and the correlation table. Every mutation is a single
//! statement or a single transaction, so the sync engine and a user
//! discarding an item can call in concurrently without a separate
//! locking layer.
//!
//! ## Usage
//!
//! ```ignore
//! let store = LocalStore::open(&config)?;
//! let id = store.enqueue(&PendingOperation::create(CreatePayload::named("PO-1")))?;
//! assert_eq!(store.count_pending(OperationKind::Create)?, 1);
//! store.remove(OperationKind::Create, id)?;
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use crate::config::Config;
use crate::models::{
    CachedEntity, CorrelationToken, EntityRef, OperationId, OperationKind, OperationPayload,
    PendingOperation,
};

/// Durable store for queues and the display cache
pub struct LocalStore {
    conn: Mutex<Connection>,
}

/// Raw queue row, decoded after the statement is finished
struct QueueRow {
    id: String,
    entity_id: Option<i64>,
    correlation: Option<String>,
    payload: String,
    enqueued_at: i64,
    attempt_count: u32,
    last_error: Option<String>,
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const QUEUE_COLUMNS: &str =
    "id, entity_id, correlation, payload, enqueued_at, attempt_count, last_error";

impl LocalStore {
    /// Open or create the store at the configured location
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::open_path(&config.sqlite_path())
    }

    /// Open or create the store at a specific path
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        // WAL keeps readers (badge counts) from blocking a drain pass
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")?;
        // Another waybill process may hold the write lock briefly
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    // ==================== Queue Operations ====================

    /// Append an operation to the tail of its kind's queue
    pub fn enqueue(&self, op: &PendingOperation) -> StorageResult<OperationId> {
        let kind = op.kind();
        let payload = serde_json::to_string(&op.payload)?;
        let conn = self.lock()?;

        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                kind.table(),
                QUEUE_COLUMNS
            ),
            params![
                op.id.to_string(),
                op.entity_ref.remote_id(),
                op.entity_ref.token().map(|t| t.to_string()),
                payload,
                to_nanos(&op.enqueued_at),
                op.attempt_count,
                op.last_error,
            ],
        )?;

        Ok(op.id)
    }

    /// Snapshot of a queue in enqueue order
    pub fn list_pending(&self, kind: OperationKind) -> StorageResult<Vec<PendingOperation>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} ORDER BY seq",
                QUEUE_COLUMNS,
                kind.table()
            ))?;
            let rows = stmt.query_map([], read_queue_row)?;
            let collected = rows.collect::<Result<Vec<_>, _>>()?;
            collected
        };

        rows.into_iter().map(|row| decode_queue_row(kind, row)).collect()
    }

    /// A single queued operation, if it is still queued
    pub fn get_pending(
        &self,
        kind: OperationKind,
        id: OperationId,
    ) -> StorageResult<Option<PendingOperation>> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {} FROM {} WHERE id = ?1", QUEUE_COLUMNS, kind.table()),
                params![id.to_string()],
                read_queue_row,
            )
            .optional()?
        };

        row.map(|row| decode_queue_row(kind, row)).transpose()
    }

    /// Remove an operation from its queue.
    ///
    /// Idempotent: returns `false` when the id was already gone.
    pub fn remove(&self, kind: OperationKind, id: OperationId) -> StorageResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Number of operations queued for a kind
    pub fn count_pending(&self, kind: OperationKind) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Number of operations queued across all kinds
    pub fn total_pending(&self) -> StorageResult<usize> {
        let mut total = 0;
        for kind in OperationKind::DRAIN_ORDER {
            total += self.count_pending(kind)?;
        }
        Ok(total)
    }

    /// Record a failed drain attempt.
    ///
    /// Returns the new attempt count, or `None` if the operation was
    /// discarded in the meantime.
    pub fn record_failure(
        &self,
        kind: OperationKind,
        id: OperationId,
        message: &str,
    ) -> StorageResult<Option<u32>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "UPDATE {} SET attempt_count = attempt_count + 1, last_error = ?2 \
                 WHERE id = ?1 RETURNING attempt_count",
                kind.table()
            ),
            params![id.to_string(), message],
            |row| row.get(0),
        )
        .optional()
        .map_err(StorageError::from)
    }

    /// Finish a Create: remember the remote id for its correlation token
    /// and drop it from the queue, in one transaction.
    ///
    /// An optimistic placeholder in the cache moves to the remote key.
    /// Returns `false` if the Create had been discarded already; the
    /// mapping is still recorded since the entity exists remotely.
    pub fn complete_create(
        &self,
        id: OperationId,
        token: CorrelationToken,
        remote_id: i64,
    ) -> StorageResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO correlations (token, remote_id, resolved_at) VALUES (?1, ?2, ?3)",
            params![token.to_string(), remote_id, to_nanos(&Utc::now())],
        )?;
        let removed = tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", OperationKind::Create.table()),
            params![id.to_string()],
        )?;
        tx.execute(
            "UPDATE OR REPLACE cached_entities SET key = ?1 WHERE key = ?2",
            params![
                EntityRef::Remote(remote_id).cache_key(),
                EntityRef::Local(token).cache_key()
            ],
        )?;

        tx.commit()?;
        Ok(removed > 0)
    }

    /// Remote id assigned to a correlation token, once its Create drained
    pub fn resolve_token(&self, token: CorrelationToken) -> StorageResult<Option<i64>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT remote_id FROM correlations WHERE token = ?1",
            params![token.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(StorageError::from)
    }

    /// Whether a Create for this token is still waiting in the queue
    pub fn has_pending_create(&self, token: CorrelationToken) -> StorageResult<bool> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT 1 FROM {} WHERE correlation = ?1",
            OperationKind::Create.table()
        ))?;
        Ok(stmt.exists(params![token.to_string()])?)
    }

    // ==================== Cached Entities ====================

    /// Insert or overwrite one cached entity
    pub fn upsert_cached_entity(&self, entity: &CachedEntity) -> StorageResult<()> {
        let data = serde_json::to_string(&entity.data)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO cached_entities (key, name, state, data, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entity.key.cache_key(),
                entity.name,
                entity.state,
                data,
                to_nanos(&entity.fetched_at)
            ],
        )?;
        Ok(())
    }

    /// Replace the server-fetched part of the cache wholesale.
    ///
    /// Placeholders for creates that have not drained yet are kept.
    pub fn replace_cached_entities(&self, entities: &[CachedEntity]) -> StorageResult<()> {
        let encoded = entities
            .iter()
            .map(|e| serde_json::to_string(&e.data).map(|data| (e, data)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cached_entities WHERE key LIKE 'remote:%'", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO cached_entities (key, name, state, data, fetched_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (entity, data) in &encoded {
                stmt.execute(params![
                    entity.key.cache_key(),
                    entity.name,
                    entity.state,
                    data,
                    to_nanos(&entity.fetched_at)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Read the whole display cache, local placeholders first
    pub fn read_cached_entities(&self) -> StorageResult<Vec<CachedEntity>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT key, name, state, data, fetched_at FROM cached_entities \
                 ORDER BY key LIKE 'remote:%', fetched_at DESC, key",
            )?;
            let rows = stmt.query_map([], read_cache_row)?;
            let collected = rows.collect::<Result<Vec<_>, _>>()?;
            collected
        };

        rows.into_iter().map(decode_cache_row).collect()
    }

    /// One cached entity by reference
    pub fn get_cached_entity(&self, key: &EntityRef) -> StorageResult<Option<CachedEntity>> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT key, name, state, data, fetched_at FROM cached_entities WHERE key = ?1",
                params![key.cache_key()],
                read_cache_row,
            )
            .optional()?
        };

        row.map(decode_cache_row).transpose()
    }

    /// Drop a cached entity (e.g. the placeholder of a discarded create)
    pub fn remove_cached_entity(&self, key: &EntityRef) -> StorageResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM cached_entities WHERE key = ?1",
            params![key.cache_key()],
        )?;
        Ok(removed > 0)
    }

    // ==================== Drain Lease ====================

    /// Claim or extend the drain lease for `owner`.
    ///
    /// Returns `false` while another owner holds an unexpired lease. The
    /// check and the write share one `BEGIN IMMEDIATE` transaction, so two
    /// processes cannot both win.
    pub fn try_acquire_drain_lease(&self, owner: &str, ttl: Duration) -> StorageResult<bool> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .map_or(i64::MAX, |t| to_nanos(&t));

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let holder: Option<(String, i64)> = tx
            .query_row(
                "SELECT owner, expires_at FROM drain_lease WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((holder, until)) = holder {
            if holder != owner && until > to_nanos(&now) {
                return Ok(false);
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO drain_lease (id, owner, expires_at) VALUES (1, ?1, ?2)",
            params![owner, expires_at],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Give the lease up. Returns `false` if `owner` no longer held it.
    pub fn release_drain_lease(&self, owner: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let released = conn.execute(
            "DELETE FROM drain_lease WHERE id = 1 AND owner = ?1",
            params![owner],
        )?;
        Ok(released > 0)
    }
}

fn read_queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueRow> {
    Ok(QueueRow {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        correlation: row.get(2)?,
        payload: row.get(3)?,
        enqueued_at: row.get(4)?,
        attempt_count: row.get(5)?,
        last_error: row.get(6)?,
    })
}

fn decode_queue_row(kind: OperationKind, row: QueueRow) -> StorageResult<PendingOperation> {
    let corrupt = |details: String| StorageError::CorruptEntry {
        kind,
        id: row.id.clone(),
        details,
    };

    let id: OperationId = row.id.parse().map_err(|e| corrupt(format!("{}", e)))?;

    let entity_ref = match (row.entity_id, row.correlation.as_deref()) {
        (Some(remote_id), _) => EntityRef::Remote(remote_id),
        (None, Some(token)) => EntityRef::Local(
            token
                .parse()
                .map_err(|e| corrupt(format!("bad correlation token: {}", e)))?,
        ),
        (None, None) => return Err(corrupt("missing entity reference".to_string())),
    };

    let payload: OperationPayload =
        serde_json::from_str(&row.payload).map_err(|e| corrupt(e.to_string()))?;
    if payload.kind() != kind {
        return Err(corrupt(format!("payload of kind {}", payload.kind())));
    }

    Ok(PendingOperation {
        id,
        entity_ref,
        payload,
        enqueued_at: from_nanos(row.enqueued_at),
        attempt_count: row.attempt_count,
        last_error: row.last_error,
    })
}

type CacheRow = (String, String, String, String, i64);

fn read_cache_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_cache_row((key, name, state, data, fetched_at): CacheRow) -> StorageResult<CachedEntity> {
    let entity_ref = EntityRef::from_cache_key(&key).ok_or_else(|| StorageError::CorruptCache {
        key: key.clone(),
        details: "unrecognized key".to_string(),
    })?;
    let data = serde_json::from_str(&data).map_err(|e| StorageError::CorruptCache {
        key: key.clone(),
        details: e.to_string(),
    })?;

    Ok(CachedEntity {
        key: entity_ref,
        name,
        state,
        data,
        fetched_at: from_nanos(fetched_at),
    })
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

fn to_nanos(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let subsec = u32::try_from(nanos.rem_euclid(NANOS_PER_SEC)).unwrap_or(0);
    DateTime::<Utc>::from_timestamp(secs, subsec).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreatePayload, UpdatePayload};
    use serde_json::Map;
    use tempfile::TempDir;

    fn update(entity: i64, line_id: i64, quantity: f64) -> PendingOperation {
        PendingOperation::new(
            EntityRef::Remote(entity),
            OperationPayload::Update(UpdatePayload {
                line_id,
                quantity,
                extra: Map::new(),
            }),
        )
    }

    #[test]
    fn test_enqueue_and_list_in_order() {
        let store = LocalStore::open_in_memory().unwrap();

        let first = store.enqueue(&update(10, 1, 1.0)).unwrap();
        let second = store.enqueue(&update(10, 1, 2.0)).unwrap();
        let third = store.enqueue(&update(11, 4, 3.0)).unwrap();

        let ids: Vec<_> = store
            .list_pending(OperationKind::Update)
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[test]
    fn test_order_survives_removals_in_other_kinds() {
        let store = LocalStore::open_in_memory().unwrap();

        let a = store.enqueue(&update(10, 1, 1.0)).unwrap();
        let cancel = store
            .enqueue(&PendingOperation::new(
                EntityRef::Remote(10),
                OperationPayload::Cancel,
            ))
            .unwrap();
        let b = store.enqueue(&update(10, 1, 2.0)).unwrap();
        store.remove(OperationKind::Cancel, cancel).unwrap();
        let c = store.enqueue(&update(10, 1, 3.0)).unwrap();

        let ids: Vec<_> = store
            .list_pending(OperationKind::Update)
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn test_same_timestamp_keeps_insertion_order() {
        let store = LocalStore::open_in_memory().unwrap();
        let now = Utc::now();

        let mut first = update(1, 1, 1.0);
        first.enqueued_at = now;
        let mut second = update(1, 1, 2.0);
        second.enqueued_at = now;

        store.enqueue(&first).unwrap();
        store.enqueue(&second).unwrap();

        let listed = store.list_pending(OperationKind::Update).unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[test]
    fn test_clock_stepping_back_keeps_insertion_order() {
        let store = LocalStore::open_in_memory().unwrap();
        let now = Utc::now();

        let mut first = update(1, 1, 1.0);
        first.enqueued_at = now;
        let mut second = update(1, 1, 2.0);
        second.enqueued_at = now - chrono::Duration::hours(1);

        store.enqueue(&first).unwrap();
        store.enqueue(&second).unwrap();

        let ids: Vec<_> = store
            .list_pending(OperationKind::Update)
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_drain_lease_is_exclusive_across_handles() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("waybill.db");
        let a = LocalStore::open_path(&path).unwrap();
        let b = LocalStore::open_path(&path).unwrap();
        let ttl = Duration::from_secs(60);

        assert!(a.try_acquire_drain_lease("a", ttl).unwrap());
        assert!(!b.try_acquire_drain_lease("b", ttl).unwrap());
        // Renewal by the holder
        assert!(a.try_acquire_drain_lease("a", ttl).unwrap());

        assert!(!b.release_drain_lease("b").unwrap());
        assert!(a.release_drain_lease("a").unwrap());
        assert!(b.try_acquire_drain_lease("b", ttl).unwrap());
    }

    #[test]
    fn test_expired_drain_lease_can_be_taken() {
        let store = LocalStore::open_in_memory().unwrap();

        assert!(store.try_acquire_drain_lease("crashed", Duration::ZERO).unwrap());
        assert!(store
            .try_acquire_drain_lease("next", Duration::from_secs(60))
            .unwrap());
        assert!(!store.release_drain_lease("crashed").unwrap());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = store.enqueue(&update(10, 1, 1.0)).unwrap();

        assert!(store.remove(OperationKind::Update, id).unwrap());
        assert!(!store.remove(OperationKind::Update, id).unwrap());
        assert_eq!(store.count_pending(OperationKind::Update).unwrap(), 0);
    }

    #[test]
    fn test_queues_are_independent() {
        let store = LocalStore::open_in_memory().unwrap();
        store.enqueue(&update(10, 1, 1.0)).unwrap();
        store
            .enqueue(&PendingOperation::create(CreatePayload::named("PO-1")))
            .unwrap();

        assert_eq!(store.count_pending(OperationKind::Update).unwrap(), 1);
        assert_eq!(store.count_pending(OperationKind::Create).unwrap(), 1);
        assert_eq!(store.count_pending(OperationKind::Validate).unwrap(), 0);
        assert_eq!(store.total_pending().unwrap(), 2);
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let store = LocalStore::open_in_memory().unwrap();
        let op = PendingOperation::create(CreatePayload {
            mobile_number: Some("+1 555 0100".to_string()),
            ..CreatePayload::named("PO-9")
        });
        store.enqueue(&op).unwrap();

        let loaded = store
            .get_pending(OperationKind::Create, op.id)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, op);
    }

    #[test]
    fn test_record_failure_increments_attempts() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = store.enqueue(&update(10, 1, 1.0)).unwrap();

        assert_eq!(
            store
                .record_failure(OperationKind::Update, id, "timeout")
                .unwrap(),
            Some(1)
        );
        assert_eq!(
            store
                .record_failure(OperationKind::Update, id, "refused")
                .unwrap(),
            Some(2)
        );

        let op = store
            .get_pending(OperationKind::Update, id)
            .unwrap()
            .unwrap();
        assert_eq!(op.attempt_count, 2);
        assert_eq!(op.last_error.as_deref(), Some("refused"));
    }

    #[test]
    fn test_record_failure_on_discarded_item() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = store.enqueue(&update(10, 1, 1.0)).unwrap();
        store.remove(OperationKind::Update, id).unwrap();

        assert_eq!(
            store
                .record_failure(OperationKind::Update, id, "timeout")
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_complete_create_resolves_token_and_moves_placeholder() {
        let store = LocalStore::open_in_memory().unwrap();
        let op = PendingOperation::create(CreatePayload::named("PO-1"));
        let token = op.entity_ref.token().unwrap();
        store.enqueue(&op).unwrap();
        store
            .upsert_cached_entity(&CachedEntity::new(op.entity_ref, "PO-1", "draft"))
            .unwrap();

        assert!(store.has_pending_create(token).unwrap());
        assert!(store.complete_create(op.id, token, 42).unwrap());

        assert!(!store.has_pending_create(token).unwrap());
        assert_eq!(store.resolve_token(token).unwrap(), Some(42));
        assert_eq!(store.count_pending(OperationKind::Create).unwrap(), 0);

        let cached = store.get_cached_entity(&EntityRef::Remote(42)).unwrap();
        assert_eq!(cached.map(|e| e.name), Some("PO-1".to_string()));
        assert!(store
            .get_cached_entity(&op.entity_ref)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_replace_cache_keeps_local_placeholders() {
        let store = LocalStore::open_in_memory().unwrap();
        let local = EntityRef::new_local();
        store
            .upsert_cached_entity(&CachedEntity::new(local, "PO-new", "draft"))
            .unwrap();
        store
            .upsert_cached_entity(&CachedEntity::new(EntityRef::Remote(1), "old", "done"))
            .unwrap();

        store
            .replace_cached_entities(&[CachedEntity::new(EntityRef::Remote(2), "fresh", "assigned")])
            .unwrap();

        let cached = store.read_cached_entities().unwrap();
        let keys: Vec<_> = cached.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![local, EntityRef::Remote(2)]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("waybill.db");

        let id = {
            let store = LocalStore::open_path(&path).unwrap();
            store.enqueue(&update(5, 2, 4.0)).unwrap()
        };

        let store = LocalStore::open_path(&path).unwrap();
        let pending = store.list_pending(OperationKind::Update).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
    }

    #[test]
    fn test_nanos_round_trip() {
        let now = Utc::now();
        assert_eq!(from_nanos(to_nanos(&now)), now);
    }
}
