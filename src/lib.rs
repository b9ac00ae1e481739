//! Fabric Runtime Library
//!
//! Client-side runtime for the Agentic Fabric gateway: interactive identity,
//! application credentials, tool connections, invocation and secrets.
//!
//! # Features
//!
//! - **Identity**: browser PKCE login with a local callback listener, local
//!   status, single-flight token refresh
//! - **Applications**: register → single-use activation → durable secret
//! - **Connections**: `configured → connected ⇄ disconnected → removed`,
//!   OAuth completion polling, paginated local listing, gateway sync
//! - **Invocation**: closed per-tool method catalog with an in-development
//!   sentinel and pluggable connectors
//! - **Failsafes**: timeouts, bounded exponential retry, cooperative
//!   cancellation, atomic owner-only state files
//!
//! Every operation hangs off an explicit [`FabricContext`]; there is no
//! process-global session.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod applications;
pub mod cli;
pub mod config;
pub mod connections;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod failsafe;
pub mod gateway;
pub mod interact;
pub mod oauth;
pub mod persist;
pub mod secrets;

pub use context::{ContextBuilder, FabricContext};
pub use error::{Error, ErrorKind, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// Logs go to stderr so that command output on stdout stays machine-readable.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))
}
