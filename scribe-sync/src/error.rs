//! Error types for the sync engine.
//!
//! Transport failures are retried internally and only ever surface as a
//! terminal [`ConnectionStatus::Failed`](crate::connection::ConnectionStatus)
//! plus a [`ConnectionEvent::Failed`](crate::connection::ConnectionEvent).
//! Protocol errors are dropped per message. What remains for callers is a
//! configuration violation, a guest session failure, or an HTTP failure.

use std::time::Duration;

use crate::protocol::ProtocolError;

/// Misuse of the engine: fails immediately, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("No session established")]
    NoSession,
}

/// Guest session negotiation failures. Reported once; never auto-retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("No INITIALIZE received within {0:?}")]
    InitializeTimeout(Duration),

    #[error("Session rejected by server: {0}")]
    Rejected(String),

    #[error("Connection closed before the session was initialized")]
    ConnectionLost,

    #[error("Operation requires an owner session")]
    NotOwner,
}

/// Failures of the HTTP collaborator endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

/// Top-level error returned across the crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SyncError {
    /// Whether this is a configuration violation rather than a runtime failure.
    pub fn is_config(&self) -> bool {
        matches!(self, SyncError::Config(_))
    }
}
