//! Remote operation executor
//!
//! The engine talks to the backend only through [`RemoteExecutor`]: one
//! call per operation kind, plus the fetch used to refresh the cache and
//! the version query used by the adapter. Each call must be safe to retry,
//! since a result lost to a dropped connection is retried on the next pass.
//!
//! [`HttpExecutor`] is the JSON-over-HTTP implementation used by the CLI.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::adapter::{ApiVersion, WirePayload};
use crate::models::{CachedEntity, EntityRef};

/// How a failed remote call should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network or timeout problem; retry later, nothing lost
    TransientRemoteFailure,
    /// The server refused the operation; the user has to edit or discard it
    RemoteRejection,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::TransientRemoteFailure => f.write_str("transient"),
            FailureClass::RemoteRejection => f.write_str("rejected"),
        }
    }
}

/// Failure reported by a remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote unavailable: {0}")]
    Transient(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteError::Transient(_) => FailureClass::TransientRemoteFailure,
            RemoteError::Rejected(_) => FailureClass::RemoteRejection,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Capability that performs one remote call per logical operation.
///
/// The `bool` results report whether the server applied the change.
/// `Ok(false)` is not success; the engine classifies it as a rejection.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Create a transfer, returning its remote id
    async fn create(&self, payload: &WirePayload) -> RemoteResult<i64>;

    async fn update(&self, entity_id: i64, payload: &WirePayload) -> RemoteResult<bool>;

    async fn update_product(&self, entity_id: i64, payload: &WirePayload) -> RemoteResult<bool>;

    async fn cancel(&self, entity_id: i64) -> RemoteResult<bool>;

    async fn validate(&self, entity_id: i64) -> RemoteResult<bool>;

    /// Current server projection of the user's transfers
    async fn fetch_entities(&self) -> RemoteResult<Vec<CachedEntity>>;

    /// API generation of the backend
    async fn server_version(&self) -> RemoteResult<ApiVersion>;
}

/// JSON-over-HTTP executor
///
/// Endpoints, relative to the configured server URL:
///
/// | call | request |
/// |---|---|
/// | create | `POST /api/transfers` -> `{"id": n}` |
/// | update | `PATCH /api/transfers/{id}/lines` -> `{"result": bool}` |
/// | update_product | `PATCH /api/transfers/{id}/products` -> `{"result": bool}` |
/// | cancel | `POST /api/transfers/{id}/cancel` -> `{"result": bool}` |
/// | validate | `POST /api/transfers/{id}/validate` -> `{"result": bool}` |
/// | fetch_entities | `GET /api/transfers` -> `[{"id", "name", "state", ...}]` |
/// | server_version | `GET /api/version` -> `{"server_version": "17.0"}` |
pub struct HttpExecutor {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: i64,
}

#[derive(Deserialize)]
struct ApplyResponse {
    result: bool,
}

#[derive(Deserialize)]
struct VersionResponse {
    server_version: String,
}

impl HttpExecutor {
    /// Create an executor for a server URL, bounding every call by `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transient(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// Send a request and decode the JSON body, classifying failures
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&WirePayload>,
    ) -> RemoteResult<T> {
        let (url, text) = self.send_text(method, path, body).await?;
        decode(&url, &text).map_err(RemoteError::Rejected)
    }

    /// Body of a successful response, with the URL it came from
    async fn send_text(
        &self,
        method: Method,
        path: &str,
        body: Option<&WirePayload>,
    ) -> RemoteResult<(String, String)> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let text = response.text().await.map_err(classify_transport)?;
        Ok((url, text))
    }

    async fn apply(&self, method: Method, path: &str, body: Option<&WirePayload>) -> RemoteResult<bool> {
        let response: ApplyResponse = self.send(method, path, body).await?;
        Ok(response.result)
    }
}

#[async_trait]
impl RemoteExecutor for HttpExecutor {
    async fn create(&self, payload: &WirePayload) -> RemoteResult<i64> {
        let (url, text) = self.send_text(Method::POST, "transfers", Some(payload)).await?;
        decode_created(&url, &text)
    }

    async fn update(&self, entity_id: i64, payload: &WirePayload) -> RemoteResult<bool> {
        self.apply(
            Method::PATCH,
            &format!("transfers/{}/lines", entity_id),
            Some(payload),
        )
        .await
    }

    async fn update_product(&self, entity_id: i64, payload: &WirePayload) -> RemoteResult<bool> {
        self.apply(
            Method::PATCH,
            &format!("transfers/{}/products", entity_id),
            Some(payload),
        )
        .await
    }

    async fn cancel(&self, entity_id: i64) -> RemoteResult<bool> {
        self.apply(Method::POST, &format!("transfers/{}/cancel", entity_id), None)
            .await
    }

    async fn validate(&self, entity_id: i64) -> RemoteResult<bool> {
        self.apply(Method::POST, &format!("transfers/{}/validate", entity_id), None)
            .await
    }

    async fn fetch_entities(&self) -> RemoteResult<Vec<CachedEntity>> {
        let records: Vec<Map<String, Value>> = self.send(Method::GET, "transfers", None).await?;
        records.into_iter().map(entity_from_record).collect()
    }

    async fn server_version(&self) -> RemoteResult<ApiVersion> {
        let response: VersionResponse = self.send(Method::GET, "version", None).await?;
        Ok(ApiVersion::parse(&response.server_version))
    }
}

fn decode<T: serde::de::DeserializeOwned>(url: &str, text: &str) -> Result<T, String> {
    serde_json::from_str(text).map_err(|e| format!("Unexpected response from {}: {}", url, e))
}

/// An accepted create may already exist remotely, so an unreadable reply
/// is retried rather than parked as a refusal.
fn decode_created(url: &str, text: &str) -> RemoteResult<i64> {
    decode::<CreatedResponse>(url, text)
        .map(|created| created.id)
        .map_err(|detail| {
            error!("Create accepted but its reply was unreadable: {}", detail);
            RemoteError::Transient(detail)
        })
}

/// Network-level failures never reached the server's business logic
fn classify_transport(error: reqwest::Error) -> RemoteError {
    RemoteError::Transient(error.to_string())
}

/// Server errors and throttling are retried; other client errors are refusals
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Transient(detail)
    } else {
        RemoteError::Rejected(detail)
    }
}

/// Build a cache row from a server record (`id`, `name`, `state`, rest kept)
pub fn entity_from_record(mut record: Map<String, Value>) -> RemoteResult<CachedEntity> {
    let id = record
        .remove("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| RemoteError::Rejected("Transfer record without an integer id".to_string()))?;
    let name = record
        .remove("name")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let state = record
        .remove("state")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "draft".to_string());

    Ok(CachedEntity {
        key: EntityRef::Remote(id),
        name,
        state,
        data: record,
        fetched_at: Utc::now(),
    })
}
