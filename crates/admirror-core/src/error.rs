//! Engine error type.
//!
//! The load and sync engines never raise for per-object remote problems;
//! those are logged and skipped. What does surface is a connection-level
//! client failure (the batch cannot continue without a directory) or an
//! invariant violation raised by the local graph.

use thiserror::Error;

use admirror_client::ClientError;

use crate::model::ModelError;

/// Fatal error from the load/sync engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The directory client failed below the operation level.
    #[error("directory client error: {0}")]
    Client(#[from] ClientError),

    /// The local graph rejected a mutation.
    #[error("identity graph error: {0}")]
    Model(#[from] ModelError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
