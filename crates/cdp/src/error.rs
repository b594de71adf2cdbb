//! Error types for the CDP client.
//!
//! Flat hierarchy, one enum. I/O and protocol failures stay local to the
//! operation that triggered them; nothing here is routed through a global
//! handler.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Result type for CDP operations.
pub type Result<T> = std::result::Result<T, CdpError>;

#[derive(Debug, Error)]
pub enum CdpError {
    /// WebSocket failure on the active connection.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Pipe transport I/O failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP failure talking to the browser's /json endpoints.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error reply from the browser, correlated to a single request.
    #[error("{0}")]
    Protocol(ProtocolError),

    /// Outbound frame could not be serialized. The session stays open.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Tab selection at connect time matched nothing.
    #[error("no matching tab: {0}")]
    NotFound(String),

    /// The selected tab has no webSocketDebuggerUrl to attach to.
    #[error("tab {0} has no webSocketDebuggerUrl")]
    MissingWebSocketUrl(String),

    /// An explicit endpoint URL whose final path segment is not a tab id.
    #[error("endpoint URL carries no tab id: {0}")]
    MalformedEndpoint(String),

    /// The session was torn down while the operation was outstanding.
    #[error("session disconnected")]
    Disconnected,

    /// Operation issued outside the Connected state.
    #[error("session is not connected")]
    NotConnected,

    /// Session was opened over a pipe and has no /json endpoint to query.
    #[error("session has no HTTP discovery endpoint")]
    NoHttpEndpoint,
}

/// Browser-reported error payload, as found in a reply frame.
///
/// Display joins message, data and code with newlines so callers matching on
/// the rendered error see all three.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(data) = &self.data {
            write!(f, "\n{data}")?;
        }
        write!(f, "\n{}", self.code)
    }
}
