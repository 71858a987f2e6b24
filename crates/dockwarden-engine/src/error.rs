//! Error types for the engine adapter.

use dockwarden_error::CommonError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur talking to the container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Common errors (I/O, config, timeout, etc.).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Transport-level failure from the engine client.
    #[error("engine error: {0}")]
    Transport(#[from] bollard::errors::Error),

    /// An image pull was rejected or its progress stream carried an error.
    #[error("pull failed for {image}: {reason}")]
    PullFailed {
        /// Image reference that was being pulled.
        image: String,
        /// Daemon-reported reason.
        reason: String,
    },

    /// A recreate failed part-way through. The step name tells the operator
    /// what state the container was left in.
    #[error("recreate of {container} failed during {step}: {source}")]
    Recreate {
        /// Container name.
        container: String,
        /// Protocol step that failed (stop, remove, create, connect, start).
        step: &'static str,
        /// Underlying engine error.
        #[source]
        source: bollard::errors::Error,
    },
}
