//! OAuth Callback Server
//!
//! A short-lived HTTP listener on the loopback interface that receives the
//! authorization code after the user signs in through the browser.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Error, Result};

/// Path the identity provider redirects to
pub const CALLBACK_PATH: &str = "/callback";

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// State parameter (CSRF protection)
    pub state: Option<String>,
    /// Error code
    pub error: Option<String>,
    /// Error description
    pub error_description: Option<String>,
}

struct CallbackState {
    expected_state: String,
    tx: Option<oneshot::Sender<Result<String>>>,
}

/// A listening callback server awaiting exactly one redirect
pub struct CallbackServer {
    /// Redirect URI to register in the authorization request
    pub callback_url: String,
    rx: oneshot::Receiver<Result<String>>,
    server: JoinHandle<()>,
}

/// Bind the callback listener on `127.0.0.1:port` (0 = ephemeral)
///
/// # Errors
///
/// Returns an error if the port cannot be bound.
pub async fn start_callback_server(expected_state: String, port: u16) -> Result<CallbackServer> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Authentication(format!("cannot bind callback port {port}: {e}")))?;
    let actual = listener.local_addr()?;

    let callback_url = format!("http://localhost:{}{CALLBACK_PATH}", actual.port());
    info!(url = %callback_url, "OAuth callback server listening");

    let (tx, rx) = oneshot::channel();
    let state = Arc::new(Mutex::new(CallbackState {
        expected_state,
        tx: Some(tx),
    }));

    let app = Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(state);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            debug!(error = %e, "Callback server stopped");
        }
    });

    Ok(CallbackServer {
        callback_url,
        rx,
        server,
    })
}

impl CallbackServer {
    /// Wait for the authorization code, bounded by `timeout`
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] on timeout, IdP error or state mismatch;
    /// [`Error::Cancelled`] when `cancel` fires.
    pub async fn wait(
        mut self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);

        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled("login".into())),
            () = tokio::time::sleep(timeout) => Err(Error::Authentication(format!(
                "login not completed within {}s",
                timeout.as_secs()
            ))),
            received = &mut self.rx => received.unwrap_or_else(|_| {
                Err(Error::Authentication("callback listener closed unexpectedly".into()))
            }),
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn handle_callback(
    State(state): State<Arc<Mutex<CallbackState>>>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    let mut state = state.lock().await;
    let outcome = evaluate(&state.expected_state, params);

    let page = match &outcome {
        Ok(_) => success_page(),
        Err(e) => error_page(&e.to_string()),
    };

    if let Some(tx) = state.tx.take() {
        // Receiver gone means the login already timed out
        let _ = tx.send(outcome);
    }
    Html(page)
}

fn evaluate(expected_state: &str, params: CallbackParams) -> Result<String> {
    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "no description".to_string());
        return Err(Error::Authentication(format!(
            "identity provider returned {error}: {description}"
        )));
    }
    let code = params
        .code
        .ok_or_else(|| Error::Authentication("authorization code missing from callback".into()))?;
    match params.state {
        Some(s) if s == expected_state => Ok(code),
        Some(_) => Err(Error::Authentication(
            "state mismatch in callback (possible CSRF)".into(),
        )),
        None => Err(Error::Authentication("state missing from callback".into())),
    }
}

fn success_page() -> String {
    r"<!DOCTYPE html>
<html><head><title>Signed in</title></head>
<body style='font-family:sans-serif;text-align:center;margin-top:4rem'>
<h1>Signed in</h1><p>You can close this window and return to the terminal.</p>
</body></html>"
        .to_string()
}

fn error_page(message: &str) -> String {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        r"<!DOCTYPE html>
<html><head><title>Sign-in failed</title></head>
<body style='font-family:sans-serif;text-align:center;margin-top:4rem'>
<h1>Sign-in failed</h1><p>{escaped}</p>
</body></html>"
    )
}
