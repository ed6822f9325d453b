use thiserror::Error;

use crate::domain::ids::{JobId, NodeId, NodeName};

/// Errors surfaced by the scheduling core across its component boundaries.
///
/// The placement engine never propagates these across its own boundary —
/// it returns partial results and logs instead. These variants are for the
/// facade-level and resource-level operations that do have a caller able
/// to act on a typed failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration or inventory JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("operation attempted on unmanaged resource {0:?}")]
    UnmanagedResource(NodeName),

    #[error("status {attempted} is not a valid resource status")]
    InvalidStatus { attempted: String },

    #[error("resource {node:?} already reserved by a different owner (user={owner_user}, jobid={owner_jobid:?})")]
    ResourceReservationFailure { node: NodeName, owner_user: String, owner_jobid: JobId },

    #[error("placement bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("bridge reported unknown node {0:?}, ignoring")]
    InventoryMismatch(NodeId),

    #[error("malformed process-group or reservation request: {0}")]
    DataCreation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
