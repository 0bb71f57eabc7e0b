use thiserror::Error;

use crate::router::RouterState;

/// Errors produced by the router/dispatch core.
///
/// Only [`ClientError::LostConnection`] triggers failover inside
/// [`crate::router::Router::send`]; every other variant surfaces to the
/// caller unmodified.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("bad argument: {0}")]
    IllegalArgument(String),

    #[error("illegal state: {0:?}")]
    IllegalState(RouterState),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("lost connection: {0}")]
    LostConnection(String),

    #[error("operation error (code {code}): {message}")]
    OperationError { code: i32, message: String },

    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::ConnectionFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
