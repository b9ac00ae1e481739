//! Connector contract and the gateway-backed default

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connections::{ToolConnection, ToolType};
use crate::gateway::{ApiRequest, BearerSource, GatewayClient};
use crate::{Error, Result};

/// Tool-specific implementation addressed by the dispatcher
///
/// A connector serves exactly one tool. It receives the method name and the
/// raw parameter mapping; the dispatcher has already checked that the method
/// is declared, available and permitted.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Tool this connector serves
    fn tool(&self) -> ToolType;

    /// Run `method` against `connection`
    ///
    /// # Errors
    ///
    /// [`Error::Connector`] for downstream tool failures; other kinds pass
    /// through unchanged.
    async fn dispatch(
        &self,
        connection: &ToolConnection,
        method: &str,
        parameters: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value>;
}

/// Forwards calls to the gateway invocation endpoint bound to a connection
pub struct GatewayConnector {
    tool: ToolType,
    http: GatewayClient,
    bearer: Arc<dyn BearerSource>,
}

impl GatewayConnector {
    /// Connector for `tool` over the gateway
    pub fn new(tool: ToolType, http: GatewayClient, bearer: Arc<dyn BearerSource>) -> Self {
        Self { tool, http, bearer }
    }
}

#[async_trait]
impl Connector for GatewayConnector {
    fn tool(&self) -> ToolType {
        self.tool
    }

    async fn dispatch(
        &self,
        connection: &ToolConnection,
        method: &str,
        parameters: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value> {
        let id = &connection.connection_id;
        let bearer = self.bearer.bearer().await?;
        let request = ApiRequest::post(format!("/api/v1/tools/connections/{id}/invoke"))
            .bearer(bearer)
            .entity(id.as_str())
            .json(json!({ "method": method, "parameters": parameters }));

        debug!(connection_id = %id, tool = %self.tool, method, "Invoking through gateway");
        let mut body = self.http.send(&request, cancel).await?.body;

        // The gateway wraps tool failures in a 200 envelope
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("tool reported failure");
            return Err(Error::connector(id.as_str(), format!("{method}: {message}")));
        }
        match body.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Ok(body),
        }
    }
}
