//! Error types for the ingestion engine.
//!
//! Every fallible operation in the crate returns [`IngestResult`]. The binary
//! wraps these in `anyhow` at the top level.

use thiserror::Error;

/// Comprehensive error types for relay, decoding and persistence operations.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Transport could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The relay closed the connection or the stream ended
    #[error("Connection closed by relay")]
    ConnectionClosed,

    /// A send was attempted while no connection is live
    #[error("Not connected to relay")]
    NotConnected,

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing required field in an envelope
    #[error("Missing required field '{field}' in {kind}")]
    MissingField { field: String, kind: String },

    /// Field present but with an unusable value
    #[error("Invalid field '{field}' in {kind}: {reason}")]
    InvalidField {
        field: String,
        kind: String,
        reason: String,
    },

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP error (subscription announcement)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence sink rejected a write
    #[error("Sink error: {0}")]
    Sink(String),

    /// Background task panicked or was cancelled
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            kind: kind.into(),
        }
    }

    /// Create an invalid field error
    pub fn invalid_field(
        field: impl Into<String>,
        kind: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            field: field.into(),
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create a sink error
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink(message.into())
    }

    /// 受信ループを終了させる種類のエラーか
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::WebSocket(_) | Self::ConnectionClosed | Self::NotConnected
        )
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
