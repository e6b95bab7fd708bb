//! Boundary error type for the bridge.
//!
//! Internally the crate distinguishes the failure families below; what
//! crosses the boundary to the host is the `Display` rendering, a single
//! human-readable diagnostic per failure. No operation is retried: every
//! error aborts the call it came from.

use thiserror::Error;

use crate::engine::EngineError;

/// Any failure a bridge operation can surface to the host.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A host-supplied value failed validation before any engine call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Prompt plus requested generation does not fit the session's context.
    #[error("context too small: need {needed} tokens, but the context holds {capacity}")]
    ContextExhausted { needed: i64, capacity: i64 },

    /// The handle does not refer to a live session.
    #[error("session not found")]
    SessionNotFound,

    /// The session exists but its model or context is gone.
    #[error("session is not ready")]
    SessionNotReady,

    /// An empty prompt needs a BOS token and the model has none.
    #[error("model has no beginning-of-sequence token")]
    MissingBosToken,

    /// The engine reported a failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The host's token listener raised an error mid-generation.
    #[error("token listener failed: {0}")]
    Listener(String),
}

/// Result alias used throughout the bridge.
pub type Result<T> = std::result::Result<T, BridgeError>;
