//! Secret vault client
//!
//! Thin typed wrapper over the gateway secrets API. Reads are cached for the
//! lifetime of the client; writes and deletes invalidate the cached entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::gateway::{ApiRequest, BearerSource, GatewayClient};
use crate::{Error, Result};

/// A secret with its value
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret {
    /// Vault path
    pub path: String,
    /// Secret value
    pub value: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Monotonic version
    #[serde(default)]
    pub version: u64,
    /// Creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("path", &self.path)
            .field("value", &"[REDACTED]")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A secret without its value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Vault path
    pub path: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Monotonic version
    #[serde(default)]
    pub version: u64,
    /// Creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Secrets API client with a per-session read cache
pub struct SecretVaultClient {
    http: GatewayClient,
    bearer: Arc<dyn BearerSource>,
    cache: DashMap<String, Secret>,
}

impl SecretVaultClient {
    /// Create a client
    pub fn new(http: GatewayClient, bearer: Arc<dyn BearerSource>) -> Self {
        Self {
            http,
            bearer,
            cache: DashMap::new(),
        }
    }

    /// Read a secret, from cache when already fetched
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the path does not exist.
    pub async fn get(&self, path: &str) -> Result<Secret> {
        let path = normalize(path)?;
        if let Some(cached) = self.cache.get(path) {
            debug!(path, "Secret served from cache");
            return Ok(cached.clone());
        }

        let request = self.request(ApiRequest::get(endpoint(path)), path).await?;
        let secret: Secret = self.http.json(&request, None).await?;
        self.cache.insert(path.to_string(), secret.clone());
        Ok(secret)
    }

    /// Create a secret
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the path already exists.
    pub async fn create(
        &self,
        path: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<SecretMetadata> {
        let path = normalize(path)?;
        let request = self
            .request(ApiRequest::post(endpoint(path)), path)
            .await?
            .json(body(value, description));
        let meta: SecretMetadata = self.http.json(&request, None).await?;
        self.cache.remove(path);
        info!(path, version = meta.version, "Secret created");
        Ok(meta)
    }

    /// Replace a secret's value
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the path does not exist.
    pub async fn update(
        &self,
        path: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<SecretMetadata> {
        let path = normalize(path)?;
        let request = self
            .request(ApiRequest::put(endpoint(path)), path)
            .await?
            .json(body(value, description));
        let result = self.http.json(&request, None).await;
        self.cache.remove(path);
        let meta: SecretMetadata = result?;
        info!(path, version = meta.version, "Secret updated");
        Ok(meta)
    }

    /// Delete a secret
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the path does not exist.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let request = self.request(ApiRequest::delete(endpoint(path)), path).await?;
        let result = self.http.send(&request, None).await;
        self.cache.remove(path);
        result?;
        info!(path, "Secret deleted");
        Ok(())
    }

    /// Drop every cached read
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn request(&self, request: ApiRequest, path: &str) -> Result<ApiRequest> {
        let bearer = self.bearer.bearer().await?;
        Ok(request.bearer(bearer).entity(path))
    }
}

fn endpoint(path: &str) -> String {
    format!("/api/v1/secrets/{path}")
}

fn body(value: &str, description: Option<&str>) -> Value {
    let mut body = Map::new();
    body.insert("value".into(), Value::String(value.to_string()));
    if let Some(d) = description {
        body.insert("description".into(), Value::String(d.to_string()));
    }
    Value::Object(body)
}

/// Trim surrounding slashes; reject empty, `.` and `..` segments
fn normalize(path: &str) -> Result<&str> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::validation(path, "secret path must not be empty"));
    }
    if trimmed
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == ".." || seg.contains(char::is_whitespace))
    {
        return Err(Error::validation(path, "malformed secret path"));
    }
    Ok(trimmed)
}
