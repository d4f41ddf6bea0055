use thiserror::Error;

/// Errors produced by the client library.
#[derive(Error, Debug)]
pub enum ClientError {
    /// REST call failed to reach the server or timed out. Read paths fall
    /// back to the local cache on this variant.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a `success: false` envelope.
    #[error("Server rejected the request: {0}")]
    Api(String),

    /// Envelope arrived without the expected payload.
    #[error("Malformed server response")]
    Protocol,

    /// Local cache database error.
    #[error("Cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// WebSocket transport failure.
    #[error("Socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The socket task has gone away.
    #[error("Socket closed")]
    SocketClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
