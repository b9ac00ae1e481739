//! Invocation routing: connection → catalog → connector

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::catalog::{self, Availability};
use super::connector::{Connector, GatewayConnector};
use crate::connections::{ConnectionState, ConnectionStore, ToolType};
use crate::gateway::{BearerSource, GatewayClient};
use crate::{Error, Result};

/// Output-format hint carried through to the renderer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// JSON (default)
    #[default]
    Json,
    /// Tabular
    Table,
    /// YAML
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            "yaml" => Ok(Self::Yaml),
            other => Err(Error::validation(other, "format must be one of json, table, yaml")),
        }
    }
}

/// One invocation
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Target connection
    pub connection_id: String,
    /// Declared method name
    pub method: String,
    /// Method parameters (an object; `null` is sent as `{}`)
    pub parameters: Value,
    /// Output-format hint
    pub format: OutputFormat,
}

impl InvocationRequest {
    /// Request with empty parameters and JSON output
    pub fn new(connection_id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            method: method.into(),
            parameters: Value::Object(serde_json::Map::new()),
            format: OutputFormat::Json,
        }
    }

    /// Set the parameters
    #[must_use]
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the output-format hint
    #[must_use]
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Result of [`InvocationDispatcher::invoke`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The tool ran
    Completed {
        /// Decoded result payload
        result: Value,
        /// Echoed output-format hint
        format: OutputFormat,
    },
    /// The method is declared but not yet served; nothing was sent
    InDevelopment {
        /// Tool of the connection
        tool: ToolType,
        /// Requested method
        method: String,
    },
}

impl InvocationOutcome {
    /// Whether this is the in-development sentinel
    #[must_use]
    pub fn is_in_development(&self) -> bool {
        matches!(self, Self::InDevelopment { .. })
    }
}

/// Routes invocations by table lookup
pub struct InvocationDispatcher {
    connections: Arc<ConnectionStore>,
    http: GatewayClient,
    bearer: Arc<dyn BearerSource>,
    custom: DashMap<ToolType, Arc<dyn Connector>>,
}

impl InvocationDispatcher {
    /// Dispatcher reading connections from `connections`
    pub fn new(
        connections: Arc<ConnectionStore>,
        http: GatewayClient,
        bearer: Arc<dyn BearerSource>,
    ) -> Self {
        Self {
            connections,
            http,
            bearer,
            custom: DashMap::new(),
        }
    }

    /// Serve a tool with a custom connector instead of the gateway
    pub fn register(&self, connector: Arc<dyn Connector>) {
        let tool = connector.tool();
        info!(tool = %tool, "Registered custom connector");
        self.custom.insert(tool, connector);
    }

    /// Invoke a method on a connection
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown connection
    /// - [`Error::Validation`] if the connection is not connected, the
    ///   method is undeclared or the parameters are not an object
    /// - [`Error::Authorization`] if the granted scopes do not cover the method
    /// - whatever the connector raises
    pub async fn invoke(
        &self,
        request: InvocationRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<InvocationOutcome> {
        let InvocationRequest {
            connection_id,
            method,
            parameters,
            format,
        } = request;

        let connection = self
            .connections
            .get(&connection_id)
            .ok_or_else(|| Error::not_found(&connection_id, "no such connection"))?;
        if connection.state != ConnectionState::Connected {
            return Err(Error::validation(
                &connection_id,
                format!(
                    "connection is {}; run `fabric tools connect {connection_id}`",
                    connection.state
                ),
            ));
        }

        let tool = connection.tool;
        let Some(spec) = catalog::lookup(tool, &method) else {
            let declared: Vec<&str> = catalog::methods(tool).iter().map(|m| m.name).collect();
            return Err(Error::validation(
                &method,
                format!("{tool} has no method '{method}'; declared: {}", declared.join(", ")),
            ));
        };

        if spec.availability == Availability::InDevelopment {
            debug!(connection_id = %connection_id, tool = %tool, method = %method, "Method in development");
            return Ok(InvocationOutcome::InDevelopment { tool, method });
        }

        let granted = connection.granted_scopes();
        if !granted.is_empty()
            && !spec.scopes.is_empty()
            && !catalog::scope_satisfied(&granted, spec.scopes)
        {
            return Err(Error::authorization(
                &connection_id,
                format!("{tool}.{method} requires one of: {}", spec.scopes.join(", ")),
            ));
        }

        let parameters = match parameters {
            Value::Null => Value::Object(serde_json::Map::new()),
            p @ Value::Object(_) => p,
            _ => return Err(Error::validation(&method, "parameters must be a JSON object")),
        };

        let connector: Arc<dyn Connector> = match self.custom.get(&tool) {
            Some(c) => Arc::clone(c.value()),
            None => Arc::new(GatewayConnector::new(
                tool,
                self.http.clone(),
                Arc::clone(&self.bearer),
            )),
        };
        let result = connector
            .dispatch(&connection, &method, parameters, cancel)
            .await?;

        info!(connection_id = %connection_id, tool = %tool, method = %method, "Invocation completed");
        Ok(InvocationOutcome::Completed { result, format })
    }
}
