//! Application credential lifecycle
//!
//! register → activation token → connect (single-use exchange for the secret)
//! → authenticate/test. Deletion touches both the gateway and the local file
//! and reports each step.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::model::{
    ApplicationConfig, ApplicationListing, ApplicationToken, ApplicationView, ConnectionRef,
    CredentialCheck, DeletionReport, Registration, StepOutcome, timestamp,
};
use crate::gateway::{ApiRequest, BearerSource, GatewayClient};
use crate::oauth::TokenStore;
use crate::{Error, ErrorKind, Result};

const APPLICATIONS: &str = "/api/v1/applications";

#[derive(Deserialize)]
struct ActivationResponse {
    app_id: String,
    secret_key: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    tool_connections: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Deserialize)]
struct RemoteApplication {
    app_id: String,
}

#[derive(Deserialize)]
struct RemoteApplications {
    #[serde(default)]
    applications: Vec<RemoteApplication>,
}

/// Converts activation tokens into durable application credentials
pub struct ApplicationCredentialManager {
    http: GatewayClient,
    bearer: Arc<dyn BearerSource>,
    store: Arc<dyn TokenStore>,
}

impl ApplicationCredentialManager {
    /// Create a manager
    pub fn new(
        http: GatewayClient,
        bearer: Arc<dyn BearerSource>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            http,
            bearer,
            store,
        }
    }

    /// Register an application bound to the named connections
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a malformed app id, no connections or a
    /// duplicate registration; [`Error::Authentication`] when the session
    /// is expired and cannot refresh.
    pub async fn register(
        &self,
        app_id: &str,
        connections: &[ConnectionRef],
        scopes: &[String],
    ) -> Result<Registration> {
        validate_app_id(app_id)?;
        if connections.is_empty() {
            return Err(Error::validation(app_id, "at least one tool connection is required"));
        }

        let tool_connections: BTreeMap<&str, &[String]> = connections
            .iter()
            .map(|c| (c.connection_id.as_str(), scopes))
            .collect();

        let bearer = self.bearer.bearer().await?;
        let request = ApiRequest::post(format!("{APPLICATIONS}/register"))
            .bearer(bearer)
            .entity(app_id)
            .json(json!({
                "app_id": app_id,
                "tool_connections": tool_connections,
            }));
        let registration: Registration = self.http.json(&request, None).await?;

        info!(app_id = %registration.app_id, expires_at = %registration.expires_at, "Application registered");
        Ok(registration)
    }

    /// Exchange a single-use activation token for the application secret
    ///
    /// The exchange is never retried: a transport failure or an unreadable
    /// success reply yields [`Error::ActivationOutcomeUnknown`] and the caller should check
    /// [`exists_remotely`](Self::exists_remotely) before trying again.
    ///
    /// # Errors
    ///
    /// [`Error::ExpiredOrConsumedToken`] when the gateway rejects the token.
    pub async fn connect(&self, app_id: &str, activation_token: &str) -> Result<ApplicationConfig> {
        validate_app_id(app_id)?;

        let bearer = self.bearer.bearer().await?;
        let request = ApiRequest::post(format!("{APPLICATIONS}/activate"))
            .bearer(bearer)
            .entity(app_id)
            .no_retry()
            .json(json!({ "app_id": app_id, "activation_token": activation_token }));

        let response = match self.http.send(&request, None).await {
            Ok(response) => response,
            Err(Error::NotFound { .. }) => {
                return Err(Error::ExpiredOrConsumedToken {
                    app_id: app_id.to_string(),
                });
            }
            Err(Error::Authorization { .. }) => {
                return Err(Error::authorization(
                    app_id,
                    "activation token belongs to another user",
                ));
            }
            // a 2xx reply that is not JSON: the token is spent either way
            Err(Error::Json(e)) => {
                return Err(outcome_unknown(app_id, format!("unreadable reply: {e}")));
            }
            Err(e) if e.kind() == ErrorKind::Transient => {
                return Err(outcome_unknown(app_id, e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let activation: ActivationResponse = serde_json::from_value(response.body)
            .map_err(|e| outcome_unknown(app_id, format!("unreadable reply: {e}")))?;
        if activation.secret_key.is_empty() {
            return Err(outcome_unknown(app_id, "reply carried no secret key"));
        }
        if activation.app_id != app_id {
            warn!(requested = %app_id, returned = %activation.app_id, "Gateway activated a different app id");
        }

        let scopes: BTreeSet<String> = activation
            .tool_connections
            .values()
            .flatten()
            .cloned()
            .collect();
        let created_at = activation
            .created_at
            .as_deref()
            .and_then(|s| timestamp::parse(s).ok())
            .unwrap_or_else(Utc::now);

        let config = ApplicationConfig {
            app_id: activation.app_id,
            secret_key: activation.secret_key,
            user_id: activation.user_id,
            tenant_id: activation.tenant_id,
            gateway_url: self.http.base_url().to_string(),
            created_at,
            tool_connections: activation.tool_connections,
            scopes: scopes.into_iter().collect(),
        };
        // The gateway voids any earlier secret on activation
        if self.store.load_application(&config.app_id)?.is_some() {
            warn!(app_id = %config.app_id, "Replacing stale local application config");
        }
        self.store.save_application(&config)?;

        info!(app_id = %config.app_id, connections = config.tool_connections.len(), "Application activated");
        Ok(config)
    }

    /// Local applications; with `sync`, local configs the gateway no longer
    /// knows are removed (never the reverse)
    ///
    /// # Errors
    ///
    /// Returns an error only if local state cannot be read or cleaned up; a
    /// failed server check is reported in [`ApplicationListing::sync_error`].
    pub async fn list(
        &self,
        sync: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<ApplicationListing> {
        let mut local = self.store.list_applications()?;
        let mut orphans_removed = Vec::new();
        let mut sync_error = None;

        if sync && !local.is_empty() {
            match self.remote_app_ids(cancel).await {
                Ok(remote) => {
                    let base = self.http.base_url();
                    let (orphans, kept): (Vec<_>, Vec<_>) = local.into_iter().partition(|a| {
                        a.gateway_url.trim_end_matches('/') == base && !remote.contains(&a.app_id)
                    });
                    for orphan in orphans {
                        self.store.delete_application(&orphan.app_id)?;
                        info!(app_id = %orphan.app_id, "Removed orphaned local application config");
                        orphans_removed.push(orphan.app_id);
                    }
                    local = kept;
                }
                Err(e) => {
                    warn!(error = %e, "Could not cross-check applications with the gateway");
                    sync_error = Some(e.to_string());
                }
            }
        }

        Ok(ApplicationListing {
            applications: local.iter().map(|a| a.view(false)).collect(),
            orphans_removed,
            sync_error,
        })
    }

    /// One application; the secret is masked unless `reveal_secret`
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no local config exists.
    pub fn show(&self, app_id: &str, reveal_secret: bool) -> Result<ApplicationView> {
        Ok(self.load(app_id)?.view(reveal_secret))
    }

    /// Stored config
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no local config exists.
    pub fn load(&self, app_id: &str) -> Result<ApplicationConfig> {
        self.store
            .load_application(app_id)?
            .ok_or_else(|| Error::not_found(app_id, "no local application config"))
    }

    /// Delete the server registration, then the local config
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when neither the gateway nor local state knows
    /// the application. Partial failures are reported, not raised.
    pub async fn delete(&self, app_id: &str) -> Result<DeletionReport> {
        validate_app_id(app_id)?;

        let server = match self.bearer.bearer().await {
            Err(e) => StepOutcome::Failed {
                reason: e.to_string(),
            },
            Ok(bearer) => {
                let request = ApiRequest::delete(format!("{APPLICATIONS}/{app_id}"))
                    .bearer(bearer)
                    .entity(app_id);
                match self.http.send(&request, None).await {
                    Ok(_) => StepOutcome::Deleted,
                    Err(Error::NotFound { .. }) => StepOutcome::NotFound,
                    Err(e) => StepOutcome::Failed {
                        reason: e.to_string(),
                    },
                }
            }
        };

        let local = match self.store.delete_application(app_id) {
            Ok(true) => StepOutcome::Deleted,
            Ok(false) => StepOutcome::NotFound,
            Err(e) => StepOutcome::Failed {
                reason: e.to_string(),
            },
        };

        if server == StepOutcome::NotFound && local == StepOutcome::NotFound {
            return Err(Error::not_found(app_id, "unknown to the gateway and not stored locally"));
        }

        let report = DeletionReport {
            app_id: app_id.to_string(),
            server,
            local,
        };
        if report.is_complete() {
            info!(app_id = %app_id, "Application deleted");
        } else {
            warn!(app_id = %app_id, server = ?report.server, local = ?report.local, "Application partially deleted");
        }
        Ok(report)
    }

    /// Full credential exchange to prove the stored secret still works
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown app; [`Error::Authentication`] if
    /// the gateway rejects the secret.
    pub async fn test(&self, app_id: &str) -> Result<CredentialCheck> {
        let token = self.authenticate(app_id).await?;
        Ok(CredentialCheck {
            app_id: app_id.to_string(),
            expires_in: u64::try_from(token.expires_in).unwrap_or(0),
        })
    }

    /// Exchange the stored secret for a short-lived application token
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown app; [`Error::Authentication`] if
    /// the secret is rejected or the token carries no lifetime.
    pub async fn authenticate(&self, app_id: &str) -> Result<ApplicationToken> {
        let config = self.load(app_id)?;
        let request = ApiRequest::post(format!("{APPLICATIONS}/token"))
            .entity(app_id)
            .json(json!({
                "app_id": config.app_id,
                "secret_key": config.secret_key,
            }));

        let token: ApplicationToken = self
            .http
            .rebased(&config.gateway_url)
            .json(&request, None)
            .await?;
        if token.access_token.is_empty() || token.expires_in <= 0 {
            return Err(Error::Authentication(format!(
                "{app_id}: gateway issued an unusable application token"
            )));
        }
        info!(app_id = %app_id, expires_in = token.expires_in, "Application authenticated");
        Ok(token)
    }

    /// Whether the gateway lists `app_id` for the caller's tenant
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway list cannot be fetched.
    pub async fn exists_remotely(&self, app_id: &str) -> Result<bool> {
        Ok(self.remote_app_ids(None).await?.contains(app_id))
    }

    async fn remote_app_ids(&self, cancel: Option<&CancellationToken>) -> Result<HashSet<String>> {
        let bearer = self.bearer.bearer().await?;
        let request = ApiRequest::get(APPLICATIONS).bearer(bearer);
        let remote: RemoteApplications = self.http.json(&request, cancel).await?;
        Ok(remote.applications.into_iter().map(|a| a.app_id).collect())
    }
}

/// The single-use token was sent but the result cannot be confirmed
fn outcome_unknown(app_id: &str, message: impl Into<String>) -> Error {
    let message = message.into();
    warn!(app_id = %app_id, error = %message, "Activation outcome unknown");
    Error::ActivationOutcomeUnknown {
        app_id: app_id.to_string(),
        message,
    }
}

fn validate_app_id(app_id: &str) -> Result<()> {
    if app_id.is_empty() {
        return Err(Error::validation(app_id, "app id must not be empty"));
    }
    if app_id.chars().any(char::is_whitespace) {
        return Err(Error::validation(app_id, "app id must not contain whitespace"));
    }
    if app_id.starts_with('.') || app_id.contains(['/', '\\']) {
        return Err(Error::validation(app_id, "app id must not contain path separators"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_ids_are_validated() {
        assert!(validate_app_id("my-slack-bot").is_ok());
        assert!(validate_app_id("my slack bot").is_err());
        assert!(validate_app_id("").is_err());
        assert!(validate_app_id("../x").is_err());
    }
}
