//! Shared fixtures: a mock gateway/IdP, throwaway state dirs and scripted
//! user interaction.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use httpmock::MockServer;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use url::Url;

use fabric_runtime::config::Config;
use fabric_runtime::connections::{
    ConnectionMethod, ConnectionState, ConnectionStore, Credential, ToolConnection, ToolType,
};
use fabric_runtime::interact::{AssumeYes, Browser, Confirm};
use fabric_runtime::oauth::{IdentityToken, TokenClaims};
use fabric_runtime::{ContextBuilder, FabricContext};

/// Bearer every gateway mock expects from the static token source
pub const BEARER: &str = "test-bearer-token";

/// Token endpoint path for the default realm
pub const TOKEN_PATH: &str = "/realms/agentic-fabric/protocol/openid-connect/token";

/// Mock gateway + IdP and a private state directory
pub struct TestEnv {
    pub server: MockServer,
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            server: MockServer::start(),
            dir: TempDir::new().unwrap(),
        }
    }

    /// Fast timings against the mock server
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.gateway_url = self.server.base_url();
        config.identity.keycloak_url = self.server.base_url();
        config.identity.callback_port = 0;
        config.identity.login_timeout = Duration::from_secs(5);
        config.http.timeout = Duration::from_secs(5);
        config.http.retries = 2;
        config.http.backoff_factor = Duration::from_millis(10);
        config.http.max_backoff = Duration::from_millis(50);
        config.connections.poll_interval = Duration::from_millis(20);
        config.connections.poll_timeout = Duration::from_millis(300);
        config.storage.state_dir = self.dir.path().to_path_buf();
        config
    }

    /// Builder with the static bearer, an always-yes confirmer and a
    /// recording browser
    pub fn builder(&self) -> ContextBuilder {
        FabricContext::builder(self.config())
            .static_bearer(BEARER)
            .confirm(Arc::new(AssumeYes))
            .browser(Arc::new(RecordingBrowser::default()))
    }

    pub fn context(&self) -> FabricContext {
        self.builder().build().unwrap()
    }

    pub fn url(&self, path: &str) -> String {
        self.server.url(path)
    }
}

/// Unsigned JWT carrying `payload`
pub fn jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.signature")
}

/// Identity token expiring at `expires_at`
pub fn identity_token(
    access: &str,
    refresh: Option<&str>,
    expires_at: DateTime<Utc>,
) -> IdentityToken {
    IdentityToken {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        token_type: "Bearer".to_string(),
        expires_at,
        claims: TokenClaims {
            user_id: Some("user-1".into()),
            tenant_id: Some("tenant-1".into()),
            name: Some("Test User".into()),
            email: Some("user@example.com".into()),
        },
        token_endpoint: None,
    }
}

/// Local connection record
pub fn connection(
    id: &str,
    tool: ToolType,
    state: ConnectionState,
    created_at: DateTime<Utc>,
) -> ToolConnection {
    ToolConnection {
        connection_id: id.to_string(),
        tool,
        display_name: id.to_string(),
        method: if tool.supports_oauth3() {
            ConnectionMethod::Oauth3
        } else {
            ConnectionMethod::ApiCredentials
        },
        state,
        credential: None,
        created_at,
        updated_at: created_at,
        metadata: Default::default(),
    }
}

/// Connected record carrying an OAuth grant with `scopes`
pub fn granted(id: &str, tool: ToolType, scopes: &[&str]) -> ToolConnection {
    let mut c = connection(id, tool, ConnectionState::Connected, Utc::now());
    c.credential = Some(Credential::OAuthGrant {
        scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
        account: Some("user@example.com".into()),
        granted_at: Utc::now(),
    });
    c
}

/// Connection store pre-filled with `records`
pub fn store_with(records: Vec<ToolConnection>) -> Arc<ConnectionStore> {
    let store = ConnectionStore::in_memory();
    for r in records {
        store.upsert(r).unwrap();
    }
    Arc::new(store)
}

/// Remembers every URL it was asked to open
#[derive(Default)]
pub struct RecordingBrowser {
    opened: Mutex<Vec<String>>,
}

impl RecordingBrowser {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl Browser for RecordingBrowser {
    fn open(&self, url: &str) -> fabric_runtime::Result<()> {
        self.opened.lock().push(url.to_string());
        Ok(())
    }
}

/// How the simulated user answers the IdP
#[derive(Clone)]
pub enum Reply {
    /// Redirect back with this authorization code and the original state
    Code(String),
    /// Redirect back with an IdP error
    Error(String),
    /// Redirect back with a forged state
    ForgedState,
}

/// Plays the user: follows the authorization URL straight back to the
/// local callback listener
pub struct RedirectingBrowser {
    reply: Reply,
    opened: Mutex<Vec<String>>,
}

impl RedirectingBrowser {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl Browser for RedirectingBrowser {
    fn open(&self, url: &str) -> fabric_runtime::Result<()> {
        self.opened.lock().push(url.to_string());

        let auth = Url::parse(url).unwrap();
        let param = |name: &str| {
            auth.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        let redirect = param("redirect_uri").replace("localhost", "127.0.0.1");
        let state = param("state");

        let mut callback = Url::parse(&redirect).unwrap();
        match &self.reply {
            Reply::Code(code) => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", &state);
            }
            Reply::Error(error) => {
                callback
                    .query_pairs_mut()
                    .append_pair("error", error)
                    .append_pair("error_description", "user declined")
                    .append_pair("state", &state);
            }
            Reply::ForgedState => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", "stolen")
                    .append_pair("state", "forged");
            }
        }

        tokio::spawn(async move {
            let _ = reqwest::get(callback.as_str()).await;
        });
        Ok(())
    }
}

/// Confirmer that records prompts and answers with a fixed value
pub struct ScriptedConfirm {
    answer: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().push(prompt.to_string());
        self.answer
    }
}
