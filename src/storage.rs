//! Object storage collaborators
//!
//! The pipeline only ever sees the [`StorageReader`] and [`ArtifactStore`]
//! traits. Two implementations ship here: [`HttpStore`], a thin client for
//! the platform's storage gateway, and [`MemoryStore`] for tests. Transient
//! failures are retried with the bounded policy from the config; exhaustion
//! surfaces as a terminal error that fails the whole run.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RetryPolicy;
use crate::{Error, Result};

/// A listed object: storage key plus last-modified instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Read side of a storage namespace.
#[async_trait]
pub trait StorageReader: Send + Sync {
    /// List object keys under a prefix with their last-modified instants.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Fetch one object body.
    async fn get(&self, key: &str) -> Result<Bytes>;
}

/// Upload side for report artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a named artifact.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Resolve a key to a time-limited download link.
    async fn presign(&self, key: &str, expires_in: Duration) -> Result<String>;
}

/// Run a storage operation, retrying transient failures with backoff.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient storage error, retrying: {}",
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP gateway client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListResponse {
    objects: Vec<ListedObject>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    key: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct PresignRequest<'a> {
    key: &'a str,
    expires_in_secs: u64,
}

#[derive(Debug, Deserialize)]
struct PresignResponse {
    url: String,
}

/// Client for the storage gateway's JSON API.
pub struct HttpStore {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl HttpStore {
    /// Create a client for the given gateway base URL.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("session_reporter/0.1.0")
            .build()
            .map_err(|e| Error::InvalidArgument(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn check_status(op: &str, status: StatusCode) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Error::StorageTransient(format!("{} returned {}", op, status)))
        } else {
            Err(Error::Storage(format!("{} returned {}", op, status)))
        }
    }
}

#[async_trait]
impl StorageReader for HttpStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let url = format!("{}/list", self.base_url);
        let response = self
            .authorize(self.http.get(&url).query(&[("prefix", prefix)]))
            .send()
            .await?;
        Self::check_status("list", response.status())?;

        let listing: ListResponse = response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("Failed to parse listing: {}", e)))?;

        Ok(listing
            .objects
            .into_iter()
            .map(|o| ObjectMeta {
                key: o.key,
                last_modified: o.last_modified,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let url = format!("{}/object/{}", self.base_url, key);
        let response = self.authorize(self.http.get(&url)).send().await?;
        Self::check_status("get", response.status())?;
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ArtifactStore for HttpStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let url = format!("{}/object/{}", self.base_url, key);
        let response = self.authorize(self.http.put(&url).body(body)).send().await?;
        Self::check_status("put", response.status())
    }

    async fn presign(&self, key: &str, expires_in: Duration) -> Result<String> {
        let url = format!("{}/presign", self.base_url);
        let response = self
            .authorize(self.http.post(&url).json(&PresignRequest {
                key,
                expires_in_secs: expires_in.as_secs(),
            }))
            .send()
            .await?;
        Self::check_status("presign", response.status())?;

        let presigned: PresignResponse = response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("Failed to parse presign response: {}", e)))?;
        Ok(presigned.url)
    }
}

// ---------------------------------------------------------------------------
// In-memory store for tests
// ---------------------------------------------------------------------------

struct StoredObject {
    last_modified: DateTime<Utc>,
    body: Vec<u8>,
}

/// In-memory store implementing both collaborator traits.
///
/// Listing order is lexicographic by key, which keeps discovery order
/// deterministic across runs.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object with an explicit last-modified instant.
    pub fn insert(&self, key: &str, last_modified: DateTime<Utc>, body: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                last_modified,
                body: body.into(),
            },
        );
    }

    /// All stored keys, in listing order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Body of a stored object, if present.
    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.body.clone())
    }
}

#[async_trait]
impl StorageReader for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectMeta {
                key: key.clone(),
                last_modified: obj.last_modified,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| Bytes::from(o.body.clone()))
            .ok_or_else(|| Error::Storage(format!("No such object: {}", key)))
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.insert(key, Utc::now(), body);
        Ok(())
    }

    async fn presign(&self, key: &str, expires_in: Duration) -> Result<String> {
        if self.objects.lock().unwrap().contains_key(key) {
            Ok(format!("memory://{}?expires={}", key, expires_in.as_secs()))
        } else {
            Err(Error::Storage(format!("No such object: {}", key)))
        }
    }
}
