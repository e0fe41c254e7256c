//! Serving-path error kinds.
//!
//! The engine exposes a small closed set: bad input surfaces to the
//! caller, missing viewers and integrity/timeout failures route to the
//! popularity fallback, programmer errors surface and are never retried.

use crate::connector::ConnectorError;
use crate::embedding::EmbeddingError;
use crate::store::StoreError;
use crate::strategy::UnknownStrategy;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("viewer not found: {0}")]
    NotFound(String),

    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("degraded: {0}")]
    Degraded(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Integrity(e.to_string())
    }
}

impl From<ConnectorError> for EngineError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::Unavailable(msg) => EngineError::Degraded(msg),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<EmbeddingError> for EngineError {
    fn from(e: EmbeddingError) -> Self {
        EngineError::Internal(e.to_string())
    }
}

impl From<UnknownStrategy> for EngineError {
    fn from(e: UnknownStrategy) -> Self {
        EngineError::InvalidArgument(e.to_string())
    }
}
