//! Application identity data model

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connections::ToolType;
use crate::{Error, Result};

/// Placeholder shown instead of a secret key
pub const MASKED_SECRET: &str = "••••••••";

/// Durable application credentials, persisted per app id
#[derive(Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application id (no whitespace)
    pub app_id: String,
    /// Secret key, issued once at activation
    pub secret_key: String,
    /// Owning user
    #[serde(default)]
    pub user_id: Option<String>,
    /// Owning tenant
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Gateway the application is registered with
    pub gateway_url: String,
    /// Activation time
    pub created_at: DateTime<Utc>,
    /// Connection id → scopes granted to the application
    #[serde(default)]
    pub tool_connections: BTreeMap<String, Vec<String>>,
    /// Union of granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for ApplicationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationConfig")
            .field("app_id", &self.app_id)
            .field("secret_key", &MASKED_SECRET)
            .field("tenant_id", &self.tenant_id)
            .field("gateway_url", &self.gateway_url)
            .field("tool_connections", &self.tool_connections)
            .finish_non_exhaustive()
    }
}

impl ApplicationConfig {
    /// Display form; the secret is masked unless `reveal_secret`
    #[must_use]
    pub fn view(&self, reveal_secret: bool) -> ApplicationView {
        ApplicationView {
            app_id: self.app_id.clone(),
            secret_key: if reveal_secret {
                self.secret_key.clone()
            } else {
                MASKED_SECRET.to_string()
            },
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            gateway_url: self.gateway_url.clone(),
            created_at: self.created_at,
            tool_connections: self.tool_connections.clone(),
            scopes: self.scopes.clone(),
        }
    }
}

/// Application config as shown to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationView {
    /// Application id
    pub app_id: String,
    /// Secret key or [`MASKED_SECRET`]
    pub secret_key: String,
    /// Owning user
    pub user_id: Option<String>,
    /// Owning tenant
    pub tenant_id: Option<String>,
    /// Gateway URL
    pub gateway_url: String,
    /// Activation time
    pub created_at: DateTime<Utc>,
    /// Connection id → scopes
    pub tool_connections: BTreeMap<String, Vec<String>>,
    /// Granted scopes
    pub scopes: Vec<String>,
}

/// `tool:connection-id` reference used at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRef {
    /// Tool of the connection
    pub tool: ToolType,
    /// Connection id
    pub connection_id: String,
}

impl ConnectionRef {
    /// Parse `tool:connection-id`
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a missing separator, empty part or unknown tool.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let Some((tool, connection_id)) = raw.split_once(':') else {
            return Err(Error::validation(raw, "connection must be written 'tool:connection-id'"));
        };
        let connection_id = connection_id.trim();
        if connection_id.is_empty() || connection_id.contains(':') {
            return Err(Error::validation(raw, "connection must be written 'tool:connection-id'"));
        }
        Ok(Self {
            tool: tool.parse()?,
            connection_id: connection_id.to_string(),
        })
    }

    /// Parse a comma-separated list
    ///
    /// # Errors
    ///
    /// The first malformed entry.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// Result of registration: a single-use activation token
#[derive(Clone, Serialize, Deserialize)]
pub struct Registration {
    /// Application id
    pub app_id: String,
    /// Single-use token for [`connect`](super::ApplicationCredentialManager::connect)
    pub activation_token: String,
    /// End of the validity window
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("app_id", &self.app_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Local applications plus the outcome of the server cross-check
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationListing {
    /// Remaining local applications (secrets masked)
    pub applications: Vec<ApplicationView>,
    /// Local configs removed because the gateway no longer knows them
    pub orphans_removed: Vec<String>,
    /// Why the cross-check could not run, if it failed
    pub sync_error: Option<String>,
}

/// Outcome of one deletion step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Removed
    Deleted,
    /// Nothing to remove
    NotFound,
    /// Removal attempted and failed
    Failed {
        /// Reason
        reason: String,
    },
}

impl StepOutcome {
    /// Whether the step failed
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Which deletion steps succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Application id
    pub app_id: String,
    /// Server registration
    pub server: StepOutcome,
    /// Local config file
    pub local: StepOutcome,
}

impl DeletionReport {
    /// Neither step failed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.server.is_failed() && !self.local.is_failed()
    }
}

/// Result of a credential exchange
#[derive(Debug, Clone, Serialize)]
pub struct CredentialCheck {
    /// Application id
    pub app_id: String,
    /// Remaining lifetime of the issued access token, in seconds
    pub expires_in: u64,
}

/// Short-lived application access token
#[derive(Clone, Deserialize)]
pub struct ApplicationToken {
    /// Bearer token
    pub access_token: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: i64,
}

impl std::fmt::Debug for ApplicationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationToken")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Gateway timestamps: RFC 3339, or naive ISO 8601 taken as UTC
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<DateTime<Utc>, String> {
        DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
            })
            .map_err(|e| format!("invalid timestamp '{s}': {e}"))
    }
}
