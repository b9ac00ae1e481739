//! Gateway REST boundary

mod client;

pub use client::{ApiRequest, ApiResponse, GatewayClient};

use async_trait::async_trait;

use crate::Result;

/// Supplies the bearer token attached to authenticated gateway calls
#[async_trait]
pub trait BearerSource: Send + Sync {
    /// Current access token, refreshed if the implementation supports it
    async fn bearer(&self) -> Result<String>;
}

/// Pre-issued token (SDK usage, `$AF_TOKEN`)
pub struct StaticBearer {
    token: String,
}

impl StaticBearer {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticBearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticBearer").finish_non_exhaustive()
    }
}

#[async_trait]
impl BearerSource for StaticBearer {
    async fn bearer(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}
