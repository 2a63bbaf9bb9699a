use thiserror::Error;

use crate::state::ConnectionState;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying transport could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport is not open ({0})")]
    NotOpen(ConnectionState),

    #[error("a session is already active")]
    AlreadyActive,

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("connection closed")]
    Closed,
}
