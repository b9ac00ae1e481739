//! Interactive identity session
//!
//! Drives the PKCE login against the identity provider, answers status
//! queries from local state only and refreshes the token behind a
//! single-flight guard so concurrent callers share one exchange.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::callback::start_callback_server;
use super::pkce::{generate_pkce, generate_state};
use super::storage::TokenStore;
use super::token::{IdentityToken, TokenClaims, TokenResponse};
use crate::config::IdentityConfig;
use crate::gateway::{ApiRequest, BearerSource, GatewayClient};
use crate::interact::{Browser, Confirm};
use crate::{Error, Result};

/// Scopes requested at login
const LOGIN_SCOPE: &str = "openid profile email";

/// Login parameters
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// Identity provider hint (`kc_idp_hint`) for tenant-specific sign-in
    pub tenant_hint: Option<String>,
    /// Override of the configured Keycloak base URL
    pub keycloak_url: Option<String>,
    /// Skip the re-login confirmation
    pub force: bool,
}

/// Local view of the session; computed without network I/O
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoginStatus {
    /// No token stored
    Unauthenticated,
    /// Token valid until `expires_at`
    Authenticated {
        /// Expiry
        expires_at: DateTime<Utc>,
        /// Identity
        claims: TokenClaims,
    },
    /// Token past its expiry
    Expired {
        /// Expiry
        expires_at: DateTime<Utc>,
        /// Identity
        claims: TokenClaims,
        /// Whether a refresh token is available
        refreshable: bool,
    },
}

/// Refresh outcome shared with callers that waited on an in-flight refresh
#[derive(Clone)]
enum SharedOutcome {
    Refreshed(IdentityToken),
    NoRefreshToken,
    Failed(String),
}

impl SharedOutcome {
    fn from_result(result: &Result<IdentityToken>) -> Self {
        match result {
            Ok(token) => Self::Refreshed(token.clone()),
            Err(Error::NoRefreshToken) => Self::NoRefreshToken,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    fn into_result(self) -> Result<IdentityToken> {
        match self {
            Self::Refreshed(token) => Ok(token),
            Self::NoRefreshToken => Err(Error::NoRefreshToken),
            Self::Failed(message) => Err(Error::Authentication(message)),
        }
    }
}

/// Interactive login and refresh state machine
pub struct OAuthSession {
    identity: IdentityConfig,
    http: GatewayClient,
    store: Arc<dyn TokenStore>,
    browser: Arc<dyn Browser>,
    confirm: Arc<dyn Confirm>,
    /// Bumped after every completed refresh
    generation: AtomicU64,
    /// Held for the duration of a refresh; stores the last outcome
    flight: Mutex<Option<SharedOutcome>>,
}

impl OAuthSession {
    /// Create a session
    pub fn new(
        identity: IdentityConfig,
        http: GatewayClient,
        store: Arc<dyn TokenStore>,
        browser: Arc<dyn Browser>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        Self {
            identity,
            http,
            store,
            browser,
            confirm,
            generation: AtomicU64::new(0),
            flight: Mutex::new(None),
        }
    }

    /// Run the browser-based PKCE login and persist the resulting token
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if re-login is declined or `cancel` fires;
    /// [`Error::Authentication`] on timeout, IdP error, rejected code or
    /// network failure after retries.
    pub async fn login(
        &self,
        options: &LoginOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<IdentityToken> {
        if matches!(self.status()?, LoginStatus::Authenticated { .. })
            && !options.force
            && !self.confirm.confirm("Already logged in. Log in again?")
        {
            return Err(Error::Cancelled("login".into()));
        }

        let pkce = generate_pkce();
        let state = generate_state();

        let server = start_callback_server(state.clone(), self.identity.callback_port).await?;
        let redirect_uri = server.callback_url.clone();
        let auth_url = self.authorization_url(options, &redirect_uri, &state, &pkce.challenge)?;

        debug!(redirect_uri = %redirect_uri, "Awaiting browser authorization");
        self.browser.open(&auth_url)?;
        let code = server.wait(self.identity.login_timeout, cancel).await?;

        let token_endpoint = self.identity.token_endpoint(options.keycloak_url.as_deref());
        let form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code),
            ("redirect_uri".to_string(), redirect_uri),
            ("client_id".to_string(), self.identity.client_id.clone()),
            ("code_verifier".to_string(), pkce.verifier),
        ];
        let response = self
            .exchange(&token_endpoint, form, "authorization code exchange", cancel)
            .await?;

        let mut token = IdentityToken::from_response(response, Utc::now())?;
        token.token_endpoint = Some(token_endpoint);
        self.store.save_identity(&token)?;

        info!(
            user_id = token.claims.user_id.as_deref().unwrap_or("unknown"),
            tenant_id = token.claims.tenant_id.as_deref().unwrap_or("unknown"),
            expires_at = %token.expires_at,
            "Logged in"
        );
        Ok(token)
    }

    /// Classify the stored token; never touches the network
    ///
    /// # Errors
    ///
    /// Returns an error if the token store cannot be read.
    pub fn status(&self) -> Result<LoginStatus> {
        Ok(match self.store.load_identity()? {
            None => LoginStatus::Unauthenticated,
            Some(token) if !token.is_expired() => LoginStatus::Authenticated {
                expires_at: token.expires_at,
                claims: token.claims,
            },
            Some(token) => LoginStatus::Expired {
                expires_at: token.expires_at,
                claims: token.claims,
                refreshable: token.refresh_token.is_some(),
            },
        })
    }

    /// Exchange the refresh token for a new identity token
    ///
    /// Concurrent calls share a single exchange: callers that queued behind
    /// an in-flight refresh receive its outcome instead of issuing another.
    ///
    /// # Errors
    ///
    /// [`Error::NoRefreshToken`] when none is stored; [`Error::Authentication`]
    /// if the exchange fails or does not move the expiry forward.
    pub async fn refresh(&self) -> Result<IdentityToken> {
        self.refresh_flight(false).await
    }

    /// Single-flight refresh; with `reuse_valid`, a token that became valid
    /// while waiting for the lock is returned without another exchange
    async fn refresh_flight(&self, reuse_valid: bool) -> Result<IdentityToken> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut flight = self.flight.lock().await;

        if reuse_valid {
            if let Some(current) = self.store.load_identity()? {
                if !current.is_expired() {
                    debug!("Token was refreshed while waiting");
                    return Ok(current);
                }
            }
        }

        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(outcome) = flight.as_ref() {
                debug!("Joined completed refresh");
                return outcome.clone().into_result();
            }
        }

        let result = self.refresh_now().await;
        *flight = Some(SharedOutcome::from_result(&result));
        self.generation.fetch_add(1, Ordering::Release);
        result
    }

    async fn refresh_now(&self) -> Result<IdentityToken> {
        let current = self.store.load_identity()?.ok_or(Error::NoRefreshToken)?;
        let refresh_token = current.refresh_token.clone().ok_or(Error::NoRefreshToken)?;

        let token_endpoint = current
            .token_endpoint
            .clone()
            .unwrap_or_else(|| self.identity.token_endpoint(None));
        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.clone()),
            ("client_id".to_string(), self.identity.client_id.clone()),
        ];
        let response = self
            .exchange(&token_endpoint, form, "token refresh", None)
            .await?;

        let mut token = IdentityToken::from_response(response, Utc::now())?;
        if token.expires_at <= current.expires_at {
            warn!(
                current = %current.expires_at,
                returned = %token.expires_at,
                "Refresh did not extend token lifetime"
            );
            return Err(Error::Authentication(
                "refresh returned an expiry not later than the current token".into(),
            ));
        }
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token);
        }
        token.claims = if token.claims == TokenClaims::default() {
            current.claims
        } else {
            token.claims
        };
        token.token_endpoint = Some(token_endpoint);

        self.store.save_identity(&token)?;
        info!(expires_at = %token.expires_at, "Token refreshed");
        Ok(token)
    }

    /// Delete the stored token; `Ok(false)` when already logged out
    ///
    /// # Errors
    ///
    /// Returns an error if the stored token cannot be removed.
    pub fn logout(&self) -> Result<bool> {
        let removed = self.store.clear_identity()?;
        if removed {
            info!("Logged out");
        }
        Ok(removed)
    }

    /// Stored access token, masked unless `full`
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] when not logged in.
    pub fn token(&self, full: bool) -> Result<String> {
        let token = self.require_token()?;
        Ok(if full {
            token.access_token
        } else {
            token.masked()
        })
    }

    fn require_token(&self) -> Result<IdentityToken> {
        self.store
            .load_identity()?
            .ok_or_else(|| Error::Authentication("not logged in; run `fabric auth login`".into()))
    }

    fn authorization_url(
        &self,
        options: &LoginOptions,
        redirect_uri: &str,
        state: &str,
        challenge: &str,
    ) -> Result<String> {
        let endpoint = self
            .identity
            .authorization_endpoint(options.keycloak_url.as_deref());
        let mut url = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid authorization endpoint {endpoint}: {e}")))?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.identity.client_id);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("scope", LOGIN_SCOPE);
            params.append_pair("state", state);
            params.append_pair("code_challenge", challenge);
            params.append_pair("code_challenge_method", "S256");
            if let Some(hint) = &options.tenant_hint {
                params.append_pair("kc_idp_hint", hint);
            }
        }
        Ok(url.to_string())
    }

    async fn exchange(
        &self,
        token_endpoint: &str,
        form: Vec<(String, String)>,
        what: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<TokenResponse> {
        let request = ApiRequest::post("").form(form).entity(what);
        self.http
            .rebased(token_endpoint)
            .json(&request, cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled(_) => e,
                other => Error::Authentication(format!("{what} failed: {other}")),
            })
    }
}

#[async_trait]
impl BearerSource for OAuthSession {
    async fn bearer(&self) -> Result<String> {
        let token = self.require_token()?;
        if !token.is_expired() {
            return Ok(token.access_token);
        }
        debug!("Access token expired, refreshing");
        match self.refresh_flight(true).await {
            Ok(token) => Ok(token.access_token),
            Err(e) => Err(Error::Authentication(format!(
                "session expired and could not be refreshed: {e}"
            ))),
        }
    }
}
