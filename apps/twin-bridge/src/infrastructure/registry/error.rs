//! Registry client errors.

use super::models::RegistryErrorBody;

/// Errors from the registry WebSocket and HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum RegistryClientError {
    /// A command was issued while the WebSocket is not connected.
    #[error("not connected to registry WebSocket")]
    NotConnected,

    /// WebSocket transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The registry sent something the client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A request or response body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport failure after retries.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The registry answered with an error status.
    #[error("registry API error: {status} {} - {}", body.error, body.message)]
    Api {
        /// HTTP status.
        status: u16,
        /// Decoded error body.
        body: RegistryErrorBody,
    },

    /// Retries exhausted on a retryable status.
    #[error("registry request failed after {attempts} attempts (last status {status})")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last status seen.
        status: u16,
    },

    /// The configured URL is unusable.
    #[error("invalid registry URL: {0}")]
    InvalidUrl(String),

    /// The registry closed the socket or stopped answering pings.
    #[error("connection closed")]
    ConnectionClosed,

    /// Reconnect attempts exhausted.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl From<tokio_tungstenite::tungstenite::Error> for RegistryClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

impl RegistryClientError {
    /// Whether the error is a 404 from the registry.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}
