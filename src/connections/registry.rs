//! Connection lifecycle
//!
//! `none → configured → connected ⇄ disconnected → removed`. The gateway holds
//! the credentials; the local registry mirrors each record's state so that
//! listing and dispatch never need the network.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::{
    ConnectionMethod, ConnectionState, Credential, RemoteConnection, ToolConnection, ToolType,
    api_tool_name, credential_tool_name, scopes_from,
};
use super::store::ConnectionStore;
use crate::config::ConnectionsConfig;
use crate::gateway::{ApiRequest, BearerSource, GatewayClient};
use crate::interact::{Browser, Confirm};
use crate::oauth::mask_token;
use crate::{Error, Result};

const USER_CONNECTIONS: &str = "/api/v1/user-connections";

/// Largest accepted page size
pub const MAX_PAGE_SIZE: u32 = 100;

/// Input to [`ConnectionRegistry::add`]
pub struct AddConnection {
    /// Target tool
    pub tool: ToolType,
    /// Connection id (unique per tenant)
    pub connection_id: String,
    /// Credential method
    pub method: ConnectionMethod,
    /// Display name (defaults to the id)
    pub display_name: Option<String>,
    /// Static API token (`api_credentials`)
    pub token: Option<String>,
    /// OAuth app client id (`api_credentials`)
    pub client_id: Option<String>,
    /// OAuth app client secret (`api_credentials`)
    pub client_secret: Option<String>,
    /// OAuth app redirect URI override
    pub redirect_uri: Option<String>,
}

impl AddConnection {
    /// Connection without credential fields
    pub fn new(tool: ToolType, connection_id: impl Into<String>, method: ConnectionMethod) -> Self {
        Self {
            tool,
            connection_id: connection_id.into(),
            method,
            display_name: None,
            token: None,
            client_id: None,
            client_secret: None,
            redirect_uri: None,
        }
    }

    /// Set the display name
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Use a static API token
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Use the caller's own OAuth app
    #[must_use]
    pub fn client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Override the OAuth app redirect URI
    #[must_use]
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }
}

enum CredentialInput {
    Token(String),
    Client {
        client_id: String,
        client_secret: String,
        redirect_uri: Option<String>,
    },
}

/// Listing parameters
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// 1-based page
    pub page: u32,
    /// Records per page (1-100)
    pub page_size: u32,
    /// Case-insensitive substring of id or display name
    pub search: Option<String>,
    /// Tool id or family (`google`)
    pub tool_filter: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            search: None,
            tool_filter: None,
        }
    }
}

/// One page of connections
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionPage {
    /// Records on this page
    pub items: Vec<ToolConnection>,
    /// Page number
    pub page: u32,
    /// Page size
    pub page_size: u32,
    /// Records matching the filters
    pub total: usize,
    /// Number of pages
    pub total_pages: usize,
}

/// What [`ConnectionRegistry::sync`] changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Remote records created locally
    pub adopted: Vec<String>,
    /// Local records whose state was reconciled
    pub updated: Vec<String>,
    /// Local records the gateway no longer knows
    pub missing_remotely: Vec<String>,
    /// Remote records skipped (unsupported tool)
    pub skipped: Vec<String>,
}

/// Tracks tool connections and drives their authorization
pub struct ConnectionRegistry {
    http: GatewayClient,
    bearer: Arc<dyn BearerSource>,
    store: Arc<ConnectionStore>,
    browser: Arc<dyn Browser>,
    confirm: Arc<dyn Confirm>,
    polling: ConnectionsConfig,
}

impl ConnectionRegistry {
    /// Create a registry
    pub fn new(
        http: GatewayClient,
        bearer: Arc<dyn BearerSource>,
        store: Arc<ConnectionStore>,
        browser: Arc<dyn Browser>,
        confirm: Arc<dyn Confirm>,
        polling: ConnectionsConfig,
    ) -> Self {
        Self {
            http,
            bearer,
            store,
            browser,
            confirm,
            polling,
        }
    }

    /// Create a connection in `configured` state and store its credentials
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a malformed id, an unsupported method or
    /// missing credential fields, or when the id is already in use. When the
    /// credentials are rejected the gateway record is deleted again and the
    /// rejection is returned; a failed cleanup is noted in its message.
    pub async fn add(&self, spec: AddConnection) -> Result<ToolConnection> {
        let id = spec.connection_id.trim().to_string();
        validate_connection_id(&id)?;

        if spec.method == ConnectionMethod::Oauth3 && !spec.tool.supports_oauth3() {
            return Err(Error::validation(
                &id,
                "oauth3 is only available for Google Workspace tools, Slack and Notion; use api_credentials",
            ));
        }

        let input = match spec.method {
            ConnectionMethod::Oauth3 => None,
            ConnectionMethod::ApiCredentials => Some(credential_input(&id, &spec)?),
        };

        if let Some(existing) = self.store.get(&id) {
            return Err(Error::validation(
                &id,
                format!("connection already exists (state: {})", existing.state),
            ));
        }

        let display_name = spec
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| id.clone());

        let bearer = self.bearer.bearer().await?;
        let create = ApiRequest::post(USER_CONNECTIONS)
            .bearer(&bearer)
            .entity(&id)
            .json(json!({
                "tool": spec.tool.as_str(),
                "connection_id": id,
                "display_name": display_name,
                "method": spec.method.as_str(),
            }));
        self.http.send(&create, None).await?;

        let credential = match input {
            None => None,
            Some(input) => match self.store_credentials(&bearer, &id, spec.tool, input).await {
                Ok(credential) => Some(credential),
                Err(e) => return Err(self.roll_back_create(&bearer, &id, e).await),
            },
        };

        let now = Utc::now();
        let connection = ToolConnection {
            connection_id: id.clone(),
            tool: spec.tool,
            display_name,
            method: spec.method,
            state: ConnectionState::Configured,
            credential,
            created_at: now,
            updated_at: now,
            metadata: Default::default(),
        };
        self.store.upsert(connection.clone())?;

        info!(connection_id = %id, tool = %spec.tool, method = %spec.method, "Connection configured");
        Ok(connection)
    }

    /// Delete a gateway record whose credentials could not be stored; the
    /// original failure is returned either way
    async fn roll_back_create(&self, bearer: &str, connection_id: &str, cause: Error) -> Error {
        warn!(
            connection_id = %connection_id,
            error = %cause,
            "Storing credentials failed, removing the new gateway record"
        );
        let request = ApiRequest::delete(format!("{USER_CONNECTIONS}/{connection_id}"))
            .bearer(bearer)
            .entity(connection_id);
        match self.http.send(&request, None).await {
            Ok(_) | Err(Error::NotFound { .. }) => cause,
            Err(rollback) => {
                warn!(connection_id = %connection_id, error = %rollback, "Rollback failed");
                cause.with_note(format!(
                    "the gateway record was created but could not be removed ({rollback}); \
                     run `fabric tools sync` and then `fabric tools remove {connection_id}`"
                ))
            }
        }
    }

    async fn store_credentials(
        &self,
        bearer: &str,
        id: &str,
        tool: ToolType,
        input: CredentialInput,
    ) -> Result<Credential> {
        match input {
            CredentialInput::Token(token) => {
                let (path, body) = if tool == ToolType::Notion {
                    (
                        format!("/api/v1/tools/{tool}/config"),
                        json!({ "integration_token": token }),
                    )
                } else {
                    (
                        format!("/api/v1/tools/{tool}/connection"),
                        json!({ "api_token": token }),
                    )
                };
                let request = ApiRequest::post(path)
                    .query("connection_id", id)
                    .bearer(bearer)
                    .entity(id)
                    .json(body);
                self.http.send(&request, None).await?;
                debug!(connection_id = %id, "Stored API token");
                Ok(Credential::BearerToken {
                    masked: mask_token(&token),
                })
            }
            CredentialInput::Client {
                client_id,
                client_secret,
                redirect_uri,
            } => {
                let api_tool = api_tool_name(tool, ConnectionMethod::ApiCredentials);
                let redirect_uri = redirect_uri.unwrap_or_else(|| {
                    format!(
                        "{}/api/v1/tools/{api_tool}/oauth/callback",
                        self.http.base_url()
                    )
                });
                let mut request = ApiRequest::post(format!("/api/v1/tools/{api_tool}/config"))
                    .query("connection_id", id)
                    .bearer(bearer)
                    .entity(id)
                    .json(json!({
                        "client_id": client_id,
                        "client_secret": client_secret,
                        "redirect_uri": redirect_uri,
                    }));
                if tool.is_google() {
                    request = request.query("tool_type", tool.as_str());
                }
                self.http.send(&request, None).await?;
                debug!(connection_id = %id, redirect_uri = %redirect_uri, "Stored OAuth app credentials");
                Ok(Credential::ClientCredentials {
                    client_id,
                    redirect_uri,
                })
            }
        }
    }

    /// Authorize a connection and move it to `connected`
    ///
    /// OAuth connections open the browser and poll the gateway until the
    /// record reports `connected`; token-based connections are validated
    /// against the gateway record directly. Every call starts a fresh
    /// authorization.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id; [`Error::OAuthTimeout`] when
    /// polling exceeds its ceiling; [`Error::Cancelled`] when declined or
    /// cancelled. The record is unchanged on every error.
    pub async fn connect(
        &self,
        connection_id: &str,
        skip_confirm: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<ToolConnection> {
        let connection = self.get(connection_id)?;

        if connection.state == ConnectionState::Connected
            && !skip_confirm
            && !self.confirm.confirm(&format!(
                "Connection '{connection_id}' is already connected. Re-authorize?"
            ))
        {
            return Err(Error::Cancelled(format!("connect {connection_id}")));
        }

        match (connection.method, &connection.credential) {
            (ConnectionMethod::ApiCredentials, Some(Credential::BearerToken { .. })) => {
                self.probe(connection, cancel).await
            }
            (ConnectionMethod::ApiCredentials, None) => Err(Error::validation(
                connection_id,
                "credentials were cleared by disconnect; remove and add the connection again",
            )),
            _ => self.authorize(connection, cancel).await,
        }
    }

    async fn probe(
        &self,
        connection: ToolConnection,
        cancel: Option<&CancellationToken>,
    ) -> Result<ToolConnection> {
        let id = connection.connection_id.clone();
        let remote = self
            .fetch_remote(cancel)
            .await?
            .into_iter()
            .find(|r| r.connection_id == id)
            .ok_or_else(|| Error::not_found(&id, "connection is not registered with the gateway"))?;

        if !remote.connected {
            return Err(Error::connector(
                &id,
                "the gateway has not validated the stored credential",
            ));
        }
        self.mark_connected(connection, &remote, None)
    }

    async fn authorize(
        &self,
        connection: ToolConnection,
        cancel: Option<&CancellationToken>,
    ) -> Result<ToolConnection> {
        let id = connection.connection_id.clone();
        let api_tool = api_tool_name(connection.tool, connection.method);
        let bearer = self.bearer.bearer().await?;

        let mut request = ApiRequest::post(format!("/api/v1/tools/{api_tool}/connect/initiate"))
            .query("connection_id", &id)
            .bearer(bearer)
            .entity(&id)
            .json(json!({}));
        if connection.tool.is_google() {
            request = request.query("tool_type", connection.tool.as_str());
        }
        if connection.method == ConnectionMethod::Oauth3 {
            request = request.query("method", ConnectionMethod::Oauth3.as_str());
        }

        let response = self.http.send(&request, cancel).await?;
        let auth_url = ["authorization_url", "auth_url", "oauth_url"]
            .iter()
            .find_map(|k| response.body.get(*k).and_then(Value::as_str))
            .ok_or_else(|| Error::connector(&id, "gateway returned no authorization URL"))?
            .to_string();

        info!(connection_id = %id, tool = %connection.tool, "Waiting for tool authorization");
        self.browser.open(&auth_url)?;

        let remote = self.poll_until_connected(&id, cancel).await?;
        let grant = Credential::OAuthGrant {
            scopes: scopes_from(remote.extra.get("scopes")),
            account: remote.account(),
            granted_at: Utc::now(),
        };
        self.mark_connected(connection, &remote, Some(grant))
    }

    async fn poll_until_connected(
        &self,
        connection_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<RemoteConnection> {
        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);
        let started = Instant::now();
        let deadline = started + self.polling.poll_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(connection_id = %connection_id, "Authorization polling timed out");
                return Err(Error::OAuthTimeout {
                    connection_id: connection_id.to_string(),
                    waited: started.elapsed(),
                });
            }

            let wait = self.polling.poll_interval.min(deadline - now);
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(Error::Cancelled(format!("connect {connection_id}")));
                }
                () = sleep(wait) => {}
            }

            let remotes = self.fetch_remote(Some(cancel)).await?;
            if let Some(remote) = remotes
                .into_iter()
                .find(|r| r.connection_id == connection_id && r.connected)
            {
                return Ok(remote);
            }
            debug!(connection_id = %connection_id, elapsed_ms = started.elapsed().as_millis(), "Authorization pending");
        }
    }

    fn mark_connected(
        &self,
        mut connection: ToolConnection,
        remote: &RemoteConnection,
        credential: Option<Credential>,
    ) -> Result<ToolConnection> {
        connection.state = ConnectionState::Connected;
        if credential.is_some() {
            connection.credential = credential;
        }
        connection.metadata.extend(remote.metadata());
        connection.updated_at = Utc::now();
        self.store.upsert(connection.clone())?;

        info!(
            connection_id = %connection.connection_id,
            account = remote.account().as_deref().unwrap_or("unknown"),
            "Connection connected"
        );
        Ok(connection)
    }

    /// Clear the credentials but keep the record and its id
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the connection is not `connected`;
    /// [`Error::Cancelled`] when the confirmation is declined.
    pub async fn disconnect(&self, connection_id: &str, force: bool) -> Result<ToolConnection> {
        let mut connection = self.get(connection_id)?;
        if connection.state != ConnectionState::Connected {
            return Err(Error::validation(
                connection_id,
                format!("connection is not connected (state: {})", connection.state),
            ));
        }
        if !force
            && !self.confirm.confirm(&format!(
                "Remove credentials of {} connection '{connection_id}'?",
                connection.tool
            ))
        {
            return Err(Error::Cancelled(format!("disconnect {connection_id}")));
        }

        let bearer = self.bearer.bearer().await?;
        let tool_segment = credential_tool_name(connection.tool);
        let mut request = ApiRequest::delete(format!("/api/v1/tools/{tool_segment}/connection"))
            .query("connection_id", connection_id)
            .bearer(bearer)
            .entity(connection_id);
        if connection.tool.is_google() {
            request = request.query("tool_type", connection.tool.as_str());
        }
        self.http.send(&request, None).await?;

        connection.state = ConnectionState::Disconnected;
        connection.credential = None;
        connection.metadata.remove("scopes");
        connection.updated_at = Utc::now();
        self.store.upsert(connection.clone())?;

        info!(connection_id = %connection_id, "Connection disconnected");
        Ok(connection)
    }

    /// Delete the connection entirely; its id becomes reusable
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id; [`Error::Cancelled`] when the
    /// confirmation is declined.
    pub async fn remove(&self, connection_id: &str, force: bool) -> Result<ToolConnection> {
        let mut connection = self.get(connection_id)?;
        if !force
            && !self.confirm.confirm(&format!(
                "Permanently remove {} connection '{connection_id}'?",
                connection.tool
            ))
        {
            return Err(Error::Cancelled(format!("remove {connection_id}")));
        }

        let bearer = self.bearer.bearer().await?;
        let request = ApiRequest::delete(format!("{USER_CONNECTIONS}/{connection_id}"))
            .bearer(bearer)
            .entity(connection_id);
        match self.http.send(&request, None).await {
            Ok(_) => {}
            Err(Error::NotFound { .. }) => {
                warn!(connection_id = %connection_id, "Connection already absent on the gateway");
            }
            Err(e) => return Err(e),
        }

        self.store.remove(connection_id)?;
        connection.state = ConnectionState::Removed;
        connection.credential = None;
        connection.updated_at = Utc::now();

        info!(connection_id = %connection_id, "Connection removed");
        Ok(connection)
    }

    /// Deterministic page of local connections (creation time, then id)
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a page of 0 or a page size outside 1-100.
    pub fn list(&self, query: &ListQuery) -> Result<ConnectionPage> {
        if !(1..=MAX_PAGE_SIZE).contains(&query.page_size) {
            return Err(Error::validation(
                "page_size",
                format!("must be between 1 and {MAX_PAGE_SIZE}, got {}", query.page_size),
            ));
        }
        if query.page == 0 {
            return Err(Error::validation("page", "pages start at 1"));
        }

        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let filter = query.tool_filter.as_deref().map(str::trim).filter(|s| !s.is_empty());

        let mut matching: Vec<ToolConnection> = self
            .store
            .all()
            .into_iter()
            .filter(|c| search.is_none_or(|s| c.matches_search(s)))
            .filter(|c| filter.is_none_or(|f| c.tool.matches_filter(f)))
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.connection_id.cmp(&b.connection_id))
        });

        let total = matching.len();
        let size = query.page_size as usize;
        let items = matching
            .into_iter()
            .skip((query.page as usize - 1) * size)
            .take(size)
            .collect();

        Ok(ConnectionPage {
            items,
            page: query.page,
            page_size: query.page_size,
            total,
            total_pages: total.div_ceil(size),
        })
    }

    /// One connection
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if absent.
    pub fn get(&self, connection_id: &str) -> Result<ToolConnection> {
        self.store.get(connection_id).ok_or_else(|| {
            Error::not_found(
                connection_id,
                "no such connection; `fabric tools sync` pulls connections created elsewhere",
            )
        })
    }

    /// Pull the gateway's connection list into the local registry
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway list cannot be fetched or the
    /// registry cannot be written.
    pub async fn sync(&self, cancel: Option<&CancellationToken>) -> Result<SyncReport> {
        let remotes = self.fetch_remote(cancel).await?;
        let mut report = SyncReport::default();

        for remote in &remotes {
            let Ok(tool) = remote.tool.parse::<ToolType>() else {
                warn!(connection_id = %remote.connection_id, tool = %remote.tool, "Skipping connection with unsupported tool");
                report.skipped.push(remote.connection_id.clone());
                continue;
            };

            match self.store.get(&remote.connection_id) {
                None => {
                    self.store.upsert(adopt(remote, tool))?;
                    report.adopted.push(remote.connection_id.clone());
                }
                Some(local) => {
                    if let Some(updated) = reconcile(local, remote) {
                        self.store.upsert(updated)?;
                        report.updated.push(remote.connection_id.clone());
                    }
                }
            }
        }

        report.missing_remotely = self
            .store
            .all()
            .into_iter()
            .map(|c| c.connection_id)
            .filter(|id| !remotes.iter().any(|r| &r.connection_id == id))
            .collect();

        info!(
            adopted = report.adopted.len(),
            updated = report.updated.len(),
            missing = report.missing_remotely.len(),
            "Connections synced"
        );
        Ok(report)
    }

    async fn fetch_remote(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<RemoteConnection>> {
        let bearer = self.bearer.bearer().await?;
        let request = ApiRequest::get(USER_CONNECTIONS).bearer(bearer);
        let body = self.http.send(&request, cancel).await?.body;
        let list = match body {
            list @ Value::Array(_) => list,
            Value::Object(mut map) => map
                .remove("connections")
                .unwrap_or_else(|| Value::Array(Vec::new())),
            Value::Null => Value::Array(Vec::new()),
            other => {
                return Err(Error::Internal(format!(
                    "unexpected user-connections response: {other}"
                )));
            }
        };
        Ok(serde_json::from_value(list)?)
    }
}

fn validate_connection_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::validation(id, "connection id must not be empty"));
    }
    if id.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(Error::validation(
            id,
            "connection id must not contain whitespace or '/'",
        ));
    }
    Ok(())
}

fn credential_input(id: &str, spec: &AddConnection) -> Result<CredentialInput> {
    let present = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
    if let Some(token) = present(&spec.token) {
        return Ok(CredentialInput::Token(token));
    }
    match (present(&spec.client_id), present(&spec.client_secret)) {
        (Some(client_id), Some(client_secret)) => Ok(CredentialInput::Client {
            client_id,
            client_secret,
            redirect_uri: present(&spec.redirect_uri),
        }),
        _ => Err(Error::validation(
            id,
            "api_credentials requires either a token or both client_id and client_secret",
        )),
    }
}

fn remote_method(remote: &RemoteConnection, tool: ToolType) -> ConnectionMethod {
    match remote.method.as_deref().map(str::parse::<ConnectionMethod>) {
        Some(Ok(method)) => method,
        Some(Err(_)) => ConnectionMethod::ApiCredentials,
        None if tool.supports_oauth3() => ConnectionMethod::Oauth3,
        None => ConnectionMethod::ApiCredentials,
    }
}

fn observed_grant(remote: &RemoteConnection) -> Credential {
    Credential::OAuthGrant {
        scopes: scopes_from(remote.extra.get("scopes")),
        account: remote.account(),
        granted_at: Utc::now(),
    }
}

fn adopt(remote: &RemoteConnection, tool: ToolType) -> ToolConnection {
    let now = Utc::now();
    ToolConnection {
        connection_id: remote.connection_id.clone(),
        tool,
        display_name: remote
            .display_name
            .clone()
            .unwrap_or_else(|| remote.connection_id.clone()),
        method: remote_method(remote, tool),
        state: if remote.connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Configured
        },
        credential: remote.connected.then(|| observed_grant(remote)),
        created_at: remote.created_at.unwrap_or(now),
        updated_at: now,
        metadata: remote.metadata(),
    }
}

fn reconcile(mut local: ToolConnection, remote: &RemoteConnection) -> Option<ToolConnection> {
    let before = local.clone();
    match (remote.connected, local.state) {
        (true, state) if state != ConnectionState::Connected => {
            local.state = ConnectionState::Connected;
            if local.credential.is_none() {
                local.credential = Some(observed_grant(remote));
            }
        }
        (false, ConnectionState::Connected) => {
            local.state = ConnectionState::Disconnected;
            local.credential = None;
        }
        _ => {}
    }
    local.metadata.extend(remote.metadata());
    if local == before {
        return None;
    }
    local.updated_at = Utc::now();
    Some(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn remote(id: &str, connected: bool) -> RemoteConnection {
        serde_json::from_value(json!({
            "connection_id": id,
            "tool": "gmail",
            "connected": connected,
            "email": "ada@example.com"
        }))
        .unwrap()
    }

    fn local(id: &str, state: ConnectionState) -> ToolConnection {
        let now = Utc::now();
        ToolConnection {
            connection_id: id.into(),
            tool: ToolType::Gmail,
            display_name: id.into(),
            method: ConnectionMethod::Oauth3,
            state,
            credential: None,
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn credential_input_rules() {
        let base = AddConnection::new(ToolType::Slack, "s", ConnectionMethod::ApiCredentials);
        assert!(credential_input("s", &base).is_err());

        let half = AddConnection::new(ToolType::Slack, "s", ConnectionMethod::ApiCredentials)
            .client("id", "");
        assert!(credential_input("s", &half).is_err());

        let token = AddConnection::new(ToolType::Slack, "s", ConnectionMethod::ApiCredentials)
            .token("xoxb-1");
        assert!(matches!(
            credential_input("s", &token).unwrap(),
            CredentialInput::Token(_)
        ));
    }

    #[test]
    fn connection_ids_are_validated() {
        assert!(validate_connection_id("gmail-work").is_ok());
        assert!(validate_connection_id("").is_err());
        assert!(validate_connection_id("has space").is_err());
        assert!(validate_connection_id("a/b").is_err());
    }

    #[test]
    fn adopted_records_follow_remote_flag() {
        let adopted = adopt(&remote("g1", true), ToolType::Gmail);
        assert_eq!(adopted.state, ConnectionState::Connected);
        assert_eq!(adopted.method, ConnectionMethod::Oauth3);
        assert!(matches!(
            adopted.credential,
            Some(Credential::OAuthGrant { ref account, .. }) if account.as_deref() == Some("ada@example.com")
        ));

        let pending = adopt(&remote("g2", false), ToolType::Gmail);
        assert_eq!(pending.state, ConnectionState::Configured);
        assert!(pending.credential.is_none());
    }

    #[test]
    fn reconcile_moves_state_both_ways() {
        let up = reconcile(local("g", ConnectionState::Configured), &remote("g", true)).unwrap();
        assert_eq!(up.state, ConnectionState::Connected);

        let down = reconcile(local("g", ConnectionState::Connected), &remote("g", false)).unwrap();
        assert_eq!(down.state, ConnectionState::Disconnected);

        let mut settled = local("g", ConnectionState::Connected);
        settled.metadata = remote("g", true).metadata();
        assert!(reconcile(settled, &remote("g", true)).is_none());
    }
}
