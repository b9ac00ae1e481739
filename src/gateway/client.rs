//! Resilient HTTP client for the gateway and identity provider
//!
//! Every outbound call goes through [`GatewayClient::send`]: the request is
//! built fresh for each attempt, the status is classified into an [`Error`]
//! and transient failures are retried by [`with_retry`].

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::HttpConfig;
use crate::failsafe::{RetryPolicy, with_retry};
use crate::{Error, Result};

/// Longest error body excerpt carried into an error message
const MAX_DETAIL_LEN: usize = 300;

enum Body {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One logical request; rebuilt into a `reqwest` request on every attempt
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Body,
    bearer: Option<String>,
    entity: Option<String>,
    retry: bool,
}

impl ApiRequest {
    /// Request with an explicit method
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: Body::Empty,
            bearer: None,
            entity: None,
            retry: true,
        }
    }

    /// GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// PUT request
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// DELETE request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter
    #[must_use]
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// JSON body
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    /// Form-encoded body
    #[must_use]
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Body::Form(fields);
        self
    }

    /// Authorization: Bearer header
    #[must_use]
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Entity id reported in errors (defaults to the path)
    #[must_use]
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Disable automatic retry (single-use exchanges)
    #[must_use]
    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    fn entity_name(&self) -> &str {
        self.entity.as_deref().unwrap_or(&self.path)
    }
}

/// Decoded response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status
    pub status: StatusCode,
    /// JSON body, `Value::Null` when empty
    pub body: Value,
}

/// Gateway HTTP client with timeout, retry and error classification
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl GatewayClient {
    /// Create a client for `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: &str, config: &HttpConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("fabric/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy::new(config),
        })
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Same connection pool and policy against another base URL
    #[must_use]
    pub fn rebased(&self, base_url: &str) -> Self {
        Self {
            http: self.http.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            policy: self.policy.clone(),
        }
    }

    /// Send a request, retrying transient failures
    ///
    /// # Errors
    ///
    /// Returns the classified error of the last attempt, or
    /// [`Error::Cancelled`] when `cancel` fires.
    pub async fn send(
        &self,
        request: &ApiRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ApiResponse> {
        let policy = if request.retry {
            self.policy.clone()
        } else {
            RetryPolicy::none()
        };
        let name = format!("{} {}", request.method, request.path);
        with_retry(&policy, &name, cancel, || self.attempt(request)).await
    }

    /// Send and decode the body
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus a JSON error if the body does not match `T`.
    pub async fn json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<T> {
        let response = self.send(request, cancel).await?;
        Ok(serde_json::from_value(response.body)?)
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let entity = request.entity_name();

        let mut builder = self.http.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(v) => builder.json(v),
            Body::Form(fields) => builder.form(fields),
        };

        debug!(method = %request.method, url = %url, "Gateway request");

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(entity, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(entity, e))?;

        debug!(method = %request.method, url = %url, status = status.as_u16(), "Gateway response");

        if !status.is_success() {
            return Err(classify(status, entity, &text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        Ok(ApiResponse { status, body })
    }
}

fn transport_error(entity: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        Error::Transient {
            entity: entity.to_string(),
            message: e.to_string(),
        }
    } else {
        Error::Http(e)
    }
}

/// Map a non-success status onto the error taxonomy
pub(crate) fn classify(status: StatusCode, entity: &str, body: &str) -> Error {
    let detail = error_detail(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });

    match status {
        StatusCode::UNAUTHORIZED => Error::Authentication(format!("{entity}: {detail}")),
        StatusCode::FORBIDDEN => Error::authorization(entity, detail),
        StatusCode::NOT_FOUND => Error::not_found(entity, detail),
        s if s.is_server_error() => Error::Transient {
            entity: entity.to_string(),
            message: format!("HTTP {}: {detail}", s.as_u16()),
        },
        s => Error::validation(entity, format!("HTTP {}: {detail}", s.as_u16())),
    }
}

/// Pull a human message out of a gateway or OAuth error body
fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        for key in ["detail", "error_description", "message", "error"] {
            match json.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
                Some(Value::Null) | None => {}
                Some(other) => return Some(other.to_string()),
            }
        }
    }
    Some(trimmed.chars().take(MAX_DETAIL_LEN).collect())
}
