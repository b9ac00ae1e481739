//! Identity token and JWT claim extraction

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Claims surfaced from the access token payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// `sub`
    #[serde(default)]
    pub user_id: Option<String>,
    /// `tenant_id`
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// `name`, falling back to `preferred_username`
    #[serde(default)]
    pub name: Option<String>,
    /// `email`
    #[serde(default)]
    pub email: Option<String>,
}

/// Access/refresh token pair owned by the interactive session
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityToken {
    /// Bearer token (JWT)
    pub access_token: String,
    /// Refresh token, if the IdP issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
    /// Decoded claims
    #[serde(default)]
    pub claims: TokenClaims,
    /// Token endpoint that issued this token; refreshes go back to it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityToken")
            .field("access_token", &mask_token(&self.access_token))
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("claims", &self.claims)
            .finish()
    }
}

/// OAuth token endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl IdentityToken {
    /// Build from a token endpoint response received at `now`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if neither `expires_in` nor an `exp`
    /// claim gives an expiry, or if `expires_in` is not a positive lifetime
    /// that fits the calendar.
    pub(crate) fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self> {
        let payload = decode_payload(&response.access_token);
        let claims = payload.as_ref().map(claims_from).unwrap_or_default();

        let from_lifetime = response
            .expires_in
            .map(|secs| expiry_after(now, secs))
            .transpose()?;
        let expires_at = from_lifetime
            .or_else(|| {
                payload
                    .as_ref()
                    .and_then(|p| p.get("exp"))
                    .and_then(Value::as_i64)
                    .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
                    .filter(|at| *at > now)
            })
            .ok_or_else(|| {
                Error::Authentication("token response carries no usable expiry".to_string())
            })?;

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type.unwrap_or_else(default_token_type),
            expires_at,
            claims,
            token_endpoint: None,
        })
    }

    /// Whether the token is expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the token is expired at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time until expiry, `None` once expired
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Display-safe form of the access token
    #[must_use]
    pub fn masked(&self) -> String {
        mask_token(&self.access_token)
    }
}

/// `now + secs`, rejecting lifetimes that are already over or out of range
fn expiry_after(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>> {
    if secs <= 0 {
        return Err(Error::Authentication(format!(
            "token response carries non-positive expires_in ({secs})"
        )));
    }
    chrono::Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            Error::Authentication(format!("token response expires_in out of range ({secs})"))
        })
}

/// First 12 and last 6 characters around an ellipsis; short tokens fully hidden
#[must_use]
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 24 {
        return "*".repeat(8);
    }
    let head: String = chars[..12].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{head}…{tail}")
}

/// Decode the JWT payload without verifying the signature
fn decode_payload(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn claims_from(payload: &Value) -> TokenClaims {
    let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
    TokenClaims {
        user_id: text("sub"),
        tenant_id: text("tenant_id"),
        name: text("name").or_else(|| text("preferred_username")),
        email: text("email"),
    }
}
