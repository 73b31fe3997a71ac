//! Shared error kinds.
//!
//! These are semantic *kinds*, not a single type name tied to one crate;
//! `modelplane-server` maps this onto `tonic::Status` codes at the RPC
//! boundary.

use thiserror::Error;

/// A control-plane error, carrying one of the seven named kinds plus a
/// human-readable message.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Malformed request: missing required field, bad name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Model/pipeline/experiment/server unknown; also the data-plane
    /// "model not loaded and load failed" case after retry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Inference call missing required headers; command targeting a
    /// terminating resource.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// No replica with sufficient memory/capabilities (`ScheduleFailed`);
    /// agent out of memory after eviction.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Backend transient failure; triggers one retry on the agent.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Invariant violation; logged at error and surfaced.
    #[error("internal error: {0}")]
    Internal(String),

    /// Unrecoverable startup condition; process exits.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;
