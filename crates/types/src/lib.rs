//! Validated identifier types shared across the dicomstore workspace.
//!
//! Every identifier that crosses a crate boundary is validated once, at construction, so that
//! downstream code (storage paths, index keys, job records) can rely on its shape:
//!
//! - [`DicomUid`]: a DICOM unique identifier (digits and dots, at most 64 characters)
//! - [`PartitionKey`]: the data partition an instance belongs to
//! - [`InstanceIdentifier`] / [`VersionedInstanceIdentifier`]: the logical and physical
//!   address of a stored instance
//! - [`OperationId`]: canonical identifier of a long-running update operation

mod identifier;
mod operation_id;
mod uid;

pub use identifier::{InstanceIdentifier, PartitionKey, Version, VersionedInstanceIdentifier};
pub use operation_id::OperationId;
pub use uid::DicomUid;

/// Errors that can occur when constructing validated identifier types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UidError {
    /// The input was empty or contained only whitespace
    #[error("UID cannot be empty")]
    Empty,

    /// The input exceeded the 64 character limit for DICOM UIDs
    #[error("UID exceeds 64 characters: '{0}'")]
    TooLong(String),

    /// The input was not a well-formed dotted numeric UID
    #[error("UID is not well formed: '{0}'")]
    Malformed(String),

    /// Partition keys start at 1
    #[error("partition key must be a positive integer, got: {0}")]
    InvalidPartition(i64),

    /// Operation identifier was not in canonical form
    #[error("operation id must be 32 lowercase hex characters without hyphens, got: '{0}'")]
    InvalidOperationId(String),
}

/// Result type for identifier construction.
pub type UidResult<T> = Result<T, UidError>;
