//! Tool connection data model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

/// Gateway record fields kept as connection metadata
pub const METADATA_KEYS: &[&str] = &[
    "email",
    "team_name",
    "team_id",
    "bot_user_id",
    "login",
    "workspace_name",
    "scopes",
];

/// Supported third-party tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// Gmail
    Gmail,
    /// Google Drive
    GoogleDrive,
    /// Google Docs
    GoogleDocs,
    /// Google Sheets
    GoogleSheets,
    /// Google Slides
    GoogleSlides,
    /// Google Calendar
    GoogleCalendar,
    /// Google Meet
    GoogleMeet,
    /// Google Forms
    GoogleForms,
    /// Google Classroom
    GoogleClassroom,
    /// Google People
    GooglePeople,
    /// Google Chat
    GoogleChat,
    /// Google Tasks
    GoogleTasks,
    /// Slack
    Slack,
    /// Notion
    Notion,
    /// GitHub
    Github,
}

impl ToolType {
    /// Every supported tool
    pub const ALL: [Self; 15] = [
        Self::Gmail,
        Self::GoogleDrive,
        Self::GoogleDocs,
        Self::GoogleSheets,
        Self::GoogleSlides,
        Self::GoogleCalendar,
        Self::GoogleMeet,
        Self::GoogleForms,
        Self::GoogleClassroom,
        Self::GooglePeople,
        Self::GoogleChat,
        Self::GoogleTasks,
        Self::Slack,
        Self::Notion,
        Self::Github,
    ];

    /// Wire identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::GoogleDrive => "google_drive",
            Self::GoogleDocs => "google_docs",
            Self::GoogleSheets => "google_sheets",
            Self::GoogleSlides => "google_slides",
            Self::GoogleCalendar => "google_calendar",
            Self::GoogleMeet => "google_meet",
            Self::GoogleForms => "google_forms",
            Self::GoogleClassroom => "google_classroom",
            Self::GooglePeople => "google_people",
            Self::GoogleChat => "google_chat",
            Self::GoogleTasks => "google_tasks",
            Self::Slack => "slack",
            Self::Notion => "notion",
            Self::Github => "github",
        }
    }

    /// Google Workspace tool
    #[must_use]
    pub fn is_google(self) -> bool {
        self == Self::Gmail || self.as_str().starts_with("google_")
    }

    /// Family name used by tool filters (`google` for every Workspace tool)
    #[must_use]
    pub fn family(self) -> &'static str {
        if self.is_google() { "google" } else { self.as_str() }
    }

    /// Whether platform OAuth (`oauth3`) is offered
    #[must_use]
    pub fn supports_oauth3(self) -> bool {
        self.is_google() || matches!(self, Self::Slack | Self::Notion)
    }

    /// Whether `filter` selects this tool (exact id or family prefix)
    #[must_use]
    pub fn matches_filter(self, filter: &str) -> bool {
        let filter = filter.trim().to_ascii_lowercase();
        self.as_str() == filter || self.family() == filter
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if let Some(tool) = Self::ALL.iter().find(|t| t.as_str() == wanted) {
            return Ok(*tool);
        }
        if wanted == "google" {
            let workspace: Vec<&str> = Self::ALL
                .iter()
                .filter(|t| t.is_google())
                .map(|t| t.as_str())
                .collect();
            return Err(Error::validation(
                s,
                format!(
                    "'google' is not a tool; pick a Google Workspace tool: {}",
                    workspace.join(", ")
                ),
            ));
        }
        let all: Vec<&str> = Self::ALL.iter().map(|t| t.as_str()).collect();
        Err(Error::validation(
            s,
            format!("unknown tool; supported tools: {}", all.join(", ")),
        ))
    }
}

/// How a connection obtains credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMethod {
    /// Platform-managed OAuth
    Oauth3,
    /// User-supplied token or OAuth app
    ApiCredentials,
}

impl ConnectionMethod {
    /// Wire identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oauth3 => "oauth3",
            Self::ApiCredentials => "api_credentials",
        }
    }
}

impl fmt::Display for ConnectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "oauth3" => Ok(Self::Oauth3),
            "api_credentials" => Ok(Self::ApiCredentials),
            "oauth" => Err(Error::validation(
                s,
                "the 'oauth' method is deprecated; use 'api_credentials'",
            )),
            _ => Err(Error::validation(
                s,
                "method must be 'oauth3' or 'api_credentials'",
            )),
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, not yet authorized
    Configured,
    /// Authorized and usable
    Connected,
    /// Credentials cleared; id still reserved
    Disconnected,
    /// Deleted
    Removed,
}

impl ConnectionState {
    /// Wire identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential payload as known locally
///
/// Secrets live on the gateway; locally only non-secret descriptors are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    /// Static API token (stored masked)
    BearerToken {
        /// Masked token
        masked: String,
    },
    /// The user's own OAuth app
    ClientCredentials {
        /// OAuth client id
        client_id: String,
        /// Registered redirect URI
        redirect_uri: String,
    },
    /// Token set issued by an OAuth completion
    OAuthGrant {
        /// Granted provider scopes
        #[serde(default)]
        scopes: Vec<String>,
        /// Account the grant belongs to (email, login or team)
        #[serde(default)]
        account: Option<String>,
        /// When the grant was observed
        granted_at: DateTime<Utc>,
    },
}

/// A named credential binding between the tenant and one tool account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConnection {
    /// Unique id per tenant
    pub connection_id: String,
    /// Target tool
    pub tool: ToolType,
    /// Display name
    pub display_name: String,
    /// Credential method
    pub method: ConnectionMethod,
    /// Lifecycle state
    pub state: ConnectionState,
    /// Credential payload
    #[serde(default)]
    pub credential: Option<Credential>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Tool-specific metadata (account email, team, scopes)
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ToolConnection {
    /// Scopes granted to this connection
    #[must_use]
    pub fn granted_scopes(&self) -> Vec<String> {
        if let Some(Credential::OAuthGrant { scopes, .. }) = &self.credential {
            if !scopes.is_empty() {
                return scopes.clone();
            }
        }
        scopes_from(self.metadata.get("scopes"))
    }

    /// Case-insensitive substring match against id and display name
    #[must_use]
    pub fn matches_search(&self, search: &str) -> bool {
        let needle = search.to_lowercase();
        self.connection_id.to_lowercase().contains(&needle)
            || self.display_name.to_lowercase().contains(&needle)
    }
}

/// Connection record as reported by `GET /api/v1/user-connections`
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConnection {
    /// Connection id
    pub connection_id: String,
    /// Tool id
    pub tool: String,
    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Method
    #[serde(default)]
    pub method: Option<String>,
    /// Whether credentials are in place
    #[serde(default)]
    pub connected: bool,
    /// Creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Every other field
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RemoteConnection {
    /// Tool-specific metadata fields present on the record
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, Value> {
        METADATA_KEYS
            .iter()
            .filter_map(|k| {
                self.extra
                    .get(*k)
                    .filter(|v| !v.is_null())
                    .map(|v| ((*k).to_string(), v.clone()))
            })
            .collect()
    }

    /// Account label for display (email, GitHub login or Slack team)
    #[must_use]
    pub fn account(&self) -> Option<String> {
        ["email", "login", "team_name", "workspace_name"]
            .iter()
            .find_map(|k| self.extra.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    }
}

/// Scope list from a metadata value (array or space/comma separated string)
pub(crate) fn scopes_from(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split([' ', ','])
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Gateway tool path segment for OAuth initiation and app configuration
#[must_use]
pub fn api_tool_name(tool: ToolType, method: ConnectionMethod) -> &'static str {
    match (tool, method) {
        (t, ConnectionMethod::Oauth3) if t.is_google() => "google_oauth",
        (t, ConnectionMethod::ApiCredentials) if t.is_google() => "google",
        (ToolType::Notion, ConnectionMethod::Oauth3) => "notion_oauth",
        (t, _) => t.as_str(),
    }
}

/// Gateway tool path segment for stored credentials
#[must_use]
pub fn credential_tool_name(tool: ToolType) -> &'static str {
    if tool.is_google() { "google" } else { tool.as_str() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_ids_round_trip() {
        for tool in ToolType::ALL {
            assert_eq!(tool.as_str().parse::<ToolType>().unwrap(), tool);
        }
    }

    #[test]
    fn bare_google_is_rejected_with_hint() {
        let err = "google".parse::<ToolType>().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("google_drive"));
        assert!(text.contains("gmail"));
    }

    #[test]
    fn oauth3_support() {
        assert!(ToolType::Gmail.supports_oauth3());
        assert!(ToolType::Slack.supports_oauth3());
        assert!(ToolType::Notion.supports_oauth3());
        assert!(!ToolType::Github.supports_oauth3());
    }

    #[test]
    fn family_filter() {
        assert!(ToolType::Gmail.matches_filter("google"));
        assert!(ToolType::GoogleSheets.matches_filter("google"));
        assert!(ToolType::GoogleSheets.matches_filter("google_sheets"));
        assert!(!ToolType::Slack.matches_filter("google"));
        assert!(!ToolType::GoogleDocs.matches_filter("google_drive"));
    }

    #[test]
    fn api_tool_names() {
        use ConnectionMethod::{ApiCredentials, Oauth3};
        assert_eq!(api_tool_name(ToolType::GoogleDrive, Oauth3), "google_oauth");
        assert_eq!(api_tool_name(ToolType::Gmail, ApiCredentials), "google");
        assert_eq!(api_tool_name(ToolType::Notion, Oauth3), "notion_oauth");
        assert_eq!(api_tool_name(ToolType::Notion, ApiCredentials), "notion");
        assert_eq!(api_tool_name(ToolType::Slack, Oauth3), "slack");
        assert_eq!(credential_tool_name(ToolType::GoogleTasks), "google");
    }

    #[test]
    fn deprecated_method_is_explained() {
        let err = "oauth".parse::<ConnectionMethod>().unwrap_err();
        assert!(err.to_string().contains("api_credentials"));
    }

    #[test]
    fn remote_metadata_is_filtered() {
        let remote: RemoteConnection = serde_json::from_value(json!({
            "connection_id": "slack-work",
            "tool": "slack",
            "connected": true,
            "team_name": "Acme",
            "bot_user_id": "B1",
            "internal_flag": 7,
            "email": null
        }))
        .unwrap();
        let meta = remote.metadata();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["team_name"], json!("Acme"));
        assert_eq!(remote.account().as_deref(), Some("Acme"));
    }

    #[test]
    fn scopes_parse_from_string_or_array() {
        assert_eq!(scopes_from(Some(&json!(["a", "b"]))), vec!["a", "b"]);
        assert_eq!(scopes_from(Some(&json!("a b,c"))), vec!["a", "b", "c"]);
        assert!(scopes_from(None).is_empty());
    }
}
