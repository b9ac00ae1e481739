//! Explicit session object passed to every operation
//!
//! A [`FabricContext`] owns the HTTP client, the local stores and the
//! user-interaction seams. Nothing is process-global: tests build one
//! context per scenario with in-memory stores and scripted interactions.

use std::sync::Arc;

use crate::Result;
use crate::applications::ApplicationCredentialManager;
use crate::config::Config;
use crate::connections::{ConnectionRegistry, ConnectionStore};
use crate::dispatch::InvocationDispatcher;
use crate::gateway::{BearerSource, GatewayClient, StaticBearer};
use crate::interact::{Browser, Confirm, StdinConfirm, SystemBrowser};
use crate::oauth::{FileTokenStore, OAuthSession, TokenStore};
use crate::secrets::SecretVaultClient;

/// Assembles a [`FabricContext`]; unset parts default to the on-disk stores,
/// the system browser and a stdin prompt
pub struct ContextBuilder {
    config: Config,
    tokens: Option<Arc<dyn TokenStore>>,
    connections: Option<Arc<ConnectionStore>>,
    browser: Option<Arc<dyn Browser>>,
    confirm: Option<Arc<dyn Confirm>>,
    bearer: Option<String>,
}

impl ContextBuilder {
    /// Use `store` for identity tokens and application configs
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(store);
        self
    }

    /// Use `store` as the local connection registry
    #[must_use]
    pub fn connection_store(mut self, store: Arc<ConnectionStore>) -> Self {
        self.connections = Some(store);
        self
    }

    /// Present authorization URLs through `browser`
    #[must_use]
    pub fn browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Answer confirmations through `confirm`
    #[must_use]
    pub fn confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Authenticate gateway calls with a pre-issued token instead of the
    /// interactive session
    #[must_use]
    pub fn static_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Build the context
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the connection
    /// registry file exists but cannot be read.
    pub fn build(self) -> Result<FabricContext> {
        let http = GatewayClient::new(self.config.gateway_base(), &self.config.http)?;
        let state_dir = &self.config.storage.state_dir;

        let tokens: Arc<dyn TokenStore> = match self.tokens {
            Some(t) => t,
            None => Arc::new(FileTokenStore::new(state_dir.clone())),
        };
        let connections = match self.connections {
            Some(c) => c,
            None => Arc::new(ConnectionStore::open(state_dir.join("connections.json"))?),
        };
        let browser: Arc<dyn Browser> = self.browser.unwrap_or_else(|| Arc::new(SystemBrowser));
        let confirm: Arc<dyn Confirm> = self.confirm.unwrap_or_else(|| Arc::new(StdinConfirm));

        let session = Arc::new(OAuthSession::new(
            self.config.identity.clone(),
            http.clone(),
            Arc::clone(&tokens),
            Arc::clone(&browser),
            Arc::clone(&confirm),
        ));
        let bearer: Arc<dyn BearerSource> = match self.bearer {
            Some(token) => Arc::new(StaticBearer::new(token)),
            None => Arc::clone(&session) as Arc<dyn BearerSource>,
        };

        let dispatcher = InvocationDispatcher::new(
            Arc::clone(&connections),
            http.clone(),
            Arc::clone(&bearer),
        );
        let secrets = SecretVaultClient::new(http.clone(), Arc::clone(&bearer));

        Ok(FabricContext {
            config: self.config,
            http,
            tokens,
            connections,
            browser,
            confirm,
            session,
            bearer,
            dispatcher,
            secrets,
        })
    }
}

/// Everything an operation needs, wired once per process or test
pub struct FabricContext {
    config: Config,
    http: GatewayClient,
    tokens: Arc<dyn TokenStore>,
    connections: Arc<ConnectionStore>,
    browser: Arc<dyn Browser>,
    confirm: Arc<dyn Confirm>,
    session: Arc<OAuthSession>,
    bearer: Arc<dyn BearerSource>,
    dispatcher: InvocationDispatcher,
    secrets: SecretVaultClient,
}

impl FabricContext {
    /// Start building a context from `config`
    #[must_use]
    pub fn builder(config: Config) -> ContextBuilder {
        ContextBuilder {
            config,
            tokens: None,
            connections: None,
            browser: None,
            confirm: None,
            bearer: None,
        }
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Interactive identity session
    #[must_use]
    pub fn session(&self) -> &OAuthSession {
        &self.session
    }

    /// Token source used for gateway calls
    #[must_use]
    pub fn bearer(&self) -> Arc<dyn BearerSource> {
        Arc::clone(&self.bearer)
    }

    /// Application credential operations
    #[must_use]
    pub fn applications(&self) -> ApplicationCredentialManager {
        ApplicationCredentialManager::new(
            self.http.clone(),
            Arc::clone(&self.bearer),
            Arc::clone(&self.tokens),
        )
    }

    /// Tool connection operations
    #[must_use]
    pub fn connections(&self) -> ConnectionRegistry {
        ConnectionRegistry::new(
            self.http.clone(),
            Arc::clone(&self.bearer),
            Arc::clone(&self.connections),
            Arc::clone(&self.browser),
            Arc::clone(&self.confirm),
            self.config.connections.clone(),
        )
    }

    /// Invocation dispatcher (register custom connectors here)
    #[must_use]
    pub fn dispatcher(&self) -> &InvocationDispatcher {
        &self.dispatcher
    }

    /// Secret vault client
    #[must_use]
    pub fn secrets(&self) -> &SecretVaultClient {
        &self.secrets
    }

    /// Ask the configured confirmer
    #[must_use]
    pub fn confirm(&self, prompt: &str) -> bool {
        self.confirm.confirm(prompt)
    }
}
