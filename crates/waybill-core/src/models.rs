//! Data models for waybill
//!
//! Defines the queued unit of work (`PendingOperation`), the closed set of
//! operation kinds, the typed payload carried by each kind, and the cached
//! read model shown while offline.
//!
//! Payload field names here are *logical* names. The version adapter turns
//! them into wire names for a given backend API generation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Logical (version independent) field map handed to the version adapter.
pub type LogicalPayload = Map<String, Value>;

/// The closed set of queued operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a transfer that does not exist remotely yet
    Create,
    /// Update a line quantity on a transfer
    Update,
    /// Update the product side of a transfer line
    ProductUpdate,
    /// Cancel a transfer
    Cancel,
    /// Validate a transfer
    Validate,
}

impl OperationKind {
    /// Order in which queues are drained during a pass.
    ///
    /// Entities must exist remotely before their lines change, and the
    /// terminal state changes go last so pending content edits land first.
    pub const DRAIN_ORDER: [OperationKind; 5] = [
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::ProductUpdate,
        OperationKind::Cancel,
        OperationKind::Validate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::ProductUpdate => "product_update",
            OperationKind::Cancel => "cancel",
            OperationKind::Validate => "validate",
        }
    }

    /// SQLite table holding this kind's queue
    pub(crate) fn table(&self) -> &'static str {
        match self {
            OperationKind::Create => "pending_create",
            OperationKind::Update => "pending_update",
            OperationKind::ProductUpdate => "pending_product_update",
            OperationKind::Cancel => "pending_cancel",
            OperationKind::Validate => "pending_validate",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "product_update" | "product-update" | "product" => Ok(OperationKind::ProductUpdate),
            "cancel" => Ok(OperationKind::Cancel),
            "validate" => Ok(OperationKind::Validate),
            _ => Err(ModelError::UnknownKind(s.to_string())),
        }
    }
}

/// Errors from parsing model values out of user input
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown operation kind '{0}'. Valid kinds: create, update, product_update, cancel, validate")]
    UnknownKind(String),

    #[error("Invalid entity reference '{0}'. Use a remote id (e.g. 42) or local:<token>")]
    InvalidEntityRef(String),

    #[error("Invalid operation id '{0}'")]
    InvalidOperationId(String),
}

/// Stable local identifier of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ModelError::InvalidOperationId(s.to_string()))
    }
}

/// Client-generated placeholder for an entity without a remote id yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Reference to the entity an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EntityRef {
    /// Entity known to the backend by its integer id
    Remote(i64),
    /// Entity created offline, not yet assigned a remote id
    Local(CorrelationToken),
}

impl EntityRef {
    /// Reference for a brand new entity
    pub fn new_local() -> Self {
        EntityRef::Local(CorrelationToken::new())
    }

    pub fn remote_id(&self) -> Option<i64> {
        match self {
            EntityRef::Remote(id) => Some(*id),
            EntityRef::Local(_) => None,
        }
    }

    pub fn token(&self) -> Option<CorrelationToken> {
        match self {
            EntityRef::Remote(_) => None,
            EntityRef::Local(token) => Some(*token),
        }
    }

    /// Key used for the cached-entity collection
    pub fn cache_key(&self) -> String {
        match self {
            EntityRef::Remote(id) => format!("remote:{}", id),
            EntityRef::Local(token) => format!("local:{}", token),
        }
    }

    /// Parse a cache key written by [`EntityRef::cache_key`]
    pub fn from_cache_key(key: &str) -> Option<Self> {
        if let Some(id) = key.strip_prefix("remote:") {
            return id.parse().ok().map(EntityRef::Remote);
        }
        key.strip_prefix("local:")
            .and_then(|token| token.parse().ok())
            .map(EntityRef::Local)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Remote(id) => write!(f, "{}", id),
            EntityRef::Local(token) => write!(f, "local:{}", token),
        }
    }
}

impl FromStr for EntityRef {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(token) = s.strip_prefix("local:") {
            return token
                .parse()
                .map(EntityRef::Local)
                .map_err(|_| ModelError::InvalidEntityRef(s.to_string()));
        }
        match s.parse::<i64>() {
            // Zero is the backend's "no record" id
            Ok(id) if id > 0 => Ok(EntityRef::Remote(id)),
            _ => Err(ModelError::InvalidEntityRef(s.to_string())),
        }
    }
}

/// One product line of a new transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftLine {
    pub product_id: i64,
    pub quantity: f64,
}

/// Fields for creating a transfer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreatePayload {
    /// Transfer reference shown to the user (e.g. "PO-1")
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<i64>,
    /// Contact mobile number; its wire name differs between API generations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<DraftLine>,
    /// Additional logical fields passed through untouched
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl CreatePayload {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Fields for changing a line quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub line_id: i64,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Fields for changing the product of a transfer line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductUpdatePayload {
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Kind-specific payload of a queued operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    Create(CreatePayload),
    Update(UpdatePayload),
    ProductUpdate(ProductUpdatePayload),
    Cancel,
    Validate,
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::Create(_) => OperationKind::Create,
            OperationPayload::Update(_) => OperationKind::Update,
            OperationPayload::ProductUpdate(_) => OperationKind::ProductUpdate,
            OperationPayload::Cancel => OperationKind::Cancel,
            OperationPayload::Validate => OperationKind::Validate,
        }
    }

    /// Flatten the typed payload into logical field names.
    ///
    /// Unset optional fields are omitted. `extra` entries never override
    /// the typed fields.
    pub fn to_logical(&self) -> LogicalPayload {
        let mut out = Map::new();
        let extra = match self {
            OperationPayload::Create(p) => {
                out.insert("name".into(), Value::from(p.name.clone()));
                if let Some(partner_id) = p.partner_id {
                    out.insert("partnerId".into(), Value::from(partner_id));
                }
                if let Some(ref mobile) = p.mobile_number {
                    out.insert("mobileNumber".into(), Value::from(mobile.clone()));
                }
                if let Some(ref origin) = p.origin {
                    out.insert("origin".into(), Value::from(origin.clone()));
                }
                if !p.lines.is_empty() {
                    let lines = p
                        .lines
                        .iter()
                        .map(|line| {
                            let mut obj = Map::new();
                            obj.insert("productId".into(), Value::from(line.product_id));
                            obj.insert("quantity".into(), Value::from(line.quantity));
                            Value::Object(obj)
                        })
                        .collect();
                    out.insert("lines".into(), Value::Array(lines));
                }
                Some(&p.extra)
            }
            OperationPayload::Update(p) => {
                out.insert("lineId".into(), Value::from(p.line_id));
                out.insert("quantity".into(), Value::from(p.quantity));
                Some(&p.extra)
            }
            OperationPayload::ProductUpdate(p) => {
                out.insert("productId".into(), Value::from(p.product_id));
                if let Some(quantity) = p.quantity {
                    out.insert("quantity".into(), Value::from(quantity));
                }
                Some(&p.extra)
            }
            OperationPayload::Cancel | OperationPayload::Validate => None,
        };

        if let Some(extra) = extra {
            for (key, value) in extra {
                out.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        out
    }
}

/// The unit of queued work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    /// Target entity; `Local` for not-yet-created transfers
    pub entity_ref: EntityRef,
    pub payload: OperationPayload,
    /// FIFO ordering key within a kind
    pub enqueued_at: DateTime<Utc>,
    /// Failed drain attempts, diagnostics only
    pub attempt_count: u32,
    /// Message from the most recent failed attempt
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(entity_ref: EntityRef, payload: OperationPayload) -> Self {
        Self {
            id: OperationId::new(),
            entity_ref,
            payload,
            enqueued_at: Utc::now(),
            attempt_count: 0,
            last_error: None,
        }
    }

    /// A Create for a new entity, with a fresh correlation token
    pub fn create(payload: CreatePayload) -> Self {
        Self::new(EntityRef::new_local(), OperationPayload::Create(payload))
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }
}

/// Last-known server-shaped projection of a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub key: EntityRef,
    pub name: String,
    /// Backend state string (draft, assigned, done, cancel, ...)
    pub state: String,
    /// Remaining server fields, shown as-is
    #[serde(default)]
    pub data: Map<String, Value>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedEntity {
    pub fn new(key: EntityRef, name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            state: state.into(),
            data: Map::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Whether this row is an optimistic placeholder for an unsynced create
    pub fn is_local(&self) -> bool {
        matches!(self.key, EntityRef::Local(_))
    }
}
