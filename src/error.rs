//! Error types for the fabric runtime

use std::io;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for the fabric runtime
pub type Result<T> = std::result::Result<T, Error>;

/// Fabric runtime errors
#[derive(Error, Debug)]
pub enum Error {
    /// Login, refresh or identity failure
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A refresh was requested but no refresh token is stored
    #[error("no refresh token stored; run `fabric auth login`")]
    NoRefreshToken,

    /// The caller lacks the scope or ownership required
    #[error("not authorized for '{entity}': {message}")]
    Authorization {
        /// Entity id involved
        entity: String,
        /// Reason reported by the gateway or the local scope check
        message: String,
    },

    /// Unknown connection, application, secret or endpoint
    #[error("'{entity}' not found: {message}")]
    NotFound {
        /// Entity id involved
        entity: String,
        /// Detail
        message: String,
    },

    /// Malformed input
    #[error("invalid '{entity}': {message}")]
    Validation {
        /// Entity id involved
        entity: String,
        /// Detail
        message: String,
    },

    /// A single-use activation token was rejected as expired or already used
    #[error("activation token for '{app_id}' is expired or was already used")]
    ExpiredOrConsumedToken {
        /// Application the token was issued for
        app_id: String,
    },

    /// OAuth completion polling exceeded its ceiling; the connection stays retryable
    #[error("authorization of connection '{connection_id}' not completed within {}s", waited.as_secs())]
    OAuthTimeout {
        /// Connection being authorized
        connection_id: String,
        /// How long the poll waited
        waited: Duration,
    },

    /// Downstream tool failure
    #[error("connector failure for '{entity}': {message}")]
    Connector {
        /// Entity id involved
        entity: String,
        /// Detail
        message: String,
    },

    /// Transient network failure that outlived the retry budget
    #[error("gateway unavailable for '{entity}': {message}")]
    Transient {
        /// Entity id involved
        entity: String,
        /// Last failure seen
        message: String,
    },

    /// A single-use exchange may or may not have been applied server-side
    #[error(
        "activation of '{app_id}' has an unknown outcome ({message}); check whether the application exists before retrying"
    )]
    ActivationOutcomeUnknown {
        /// Application being activated
        app_id: String,
        /// Underlying transport failure
        message: String,
    },

    /// The caller cancelled or declined the operation
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error classification exposed to callers and renderers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Identity failures
    Authentication,
    /// Scope / ownership failures
    Authorization,
    /// Unknown entity
    NotFound,
    /// Malformed input
    Validation,
    /// Single-use token reuse
    ExpiredOrConsumedToken,
    /// Polling ceiling exceeded
    OAuthTimeout,
    /// Downstream tool failure
    Connector,
    /// Network faults
    Transient,
    /// Ambiguous single-use exchange
    OutcomeUnknown,
    /// Cancelled or declined
    Cancelled,
    /// Configuration and local state
    Local,
    /// Everything else
    Internal,
}

impl ErrorKind {
    /// Stable string form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::ExpiredOrConsumedToken => "expired_or_consumed_token",
            Self::OAuthTimeout => "oauth_timeout",
            Self::Connector => "connector",
            Self::Transient => "transient",
            Self::OutcomeUnknown => "outcome_unknown",
            Self::Cancelled => "cancelled",
            Self::Local => "local",
            Self::Internal => "internal",
        }
    }
}

impl Error {
    /// Not-found error for an entity
    pub fn not_found(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Validation error for an entity
    pub fn validation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Authorization error for an entity
    pub fn authorization(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authorization {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Connector error for an entity
    pub fn connector(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connector {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Append `note` to the message, keeping the variant and so the kind
    ///
    /// Variants without a free-form message are returned unchanged.
    #[must_use]
    pub fn with_note(self, note: impl AsRef<str>) -> Self {
        let note = note.as_ref();
        let extend = |message: String| format!("{message}; {note}");
        match self {
            Self::Authentication(m) => Self::Authentication(extend(m)),
            Self::Authorization { entity, message } => Self::Authorization {
                entity,
                message: extend(message),
            },
            Self::NotFound { entity, message } => Self::NotFound {
                entity,
                message: extend(message),
            },
            Self::Validation { entity, message } => Self::Validation {
                entity,
                message: extend(message),
            },
            Self::Connector { entity, message } => Self::Connector {
                entity,
                message: extend(message),
            },
            Self::Transient { entity, message } => Self::Transient {
                entity,
                message: extend(message),
            },
            Self::ActivationOutcomeUnknown { app_id, message } => Self::ActivationOutcomeUnknown {
                app_id,
                message: extend(message),
            },
            Self::Cancelled(m) => Self::Cancelled(extend(m)),
            Self::Config(m) => Self::Config(extend(m)),
            Self::Internal(m) => Self::Internal(extend(m)),
            other => other,
        }
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) | Self::NoRefreshToken => ErrorKind::Authentication,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ExpiredOrConsumedToken { .. } => ErrorKind::ExpiredOrConsumedToken,
            Self::OAuthTimeout { .. } => ErrorKind::OAuthTimeout,
            Self::Connector { .. } => ErrorKind::Connector,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::ActivationOutcomeUnknown { .. } => ErrorKind::OutcomeUnknown,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Config(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Local,
            Self::Http(e) if is_transient_transport(e) => ErrorKind::Transient,
            Self::Http(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the retry loop may try again after this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Http(e) => is_transient_transport(e),
            _ => false,
        }
    }

    /// Process exit code used by the CLI
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Authentication | ErrorKind::Authorization => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::Validation | ErrorKind::ExpiredOrConsumedToken => 2,
            ErrorKind::OAuthTimeout | ErrorKind::Transient | ErrorKind::OutcomeUnknown => 5,
            ErrorKind::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Network-level faults worth another attempt (connect, timeout, reset)
fn is_transient_transport(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
}
