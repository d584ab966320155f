//! dicomstore File Store Gateway
//!
//! This crate is the narrow interface between the imaging server and its blob layer. Every
//! stored instance version is one immutable blob addressed by a
//! [`VersionedInstanceIdentifier`] (partition, study, series, instance, version).
//!
//! ## Design Principles
//!
//! - Blobs are immutable once written: writing an existing version fails with
//!   [`FilesError::AlreadyExists`] instead of overwriting it
//! - A version becomes visible at its final path in a single atomic step, so a reader never
//!   sees a partially written payload
//! - Properties are fetched per version and never cached across versions
//! - The gateway knows nothing about the index; publication of a version is the caller's job
//!
//! ## Local Storage Layout
//!
//! ```text
//! <root>/
//! └── <partition>/
//!     └── <study uid>/
//!         └── <series uid>/
//!             └── <sop instance uid>/
//!                 ├── 1.dcm
//!                 └── 2.dcm
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use dicomstore_files::{FileStore, LocalFileStore};
//! use dicomstore_types::{InstanceIdentifier, PartitionKey};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalFileStore::create(Path::new("dicom_data/blobs"))?;
//! let instance = InstanceIdentifier::parse(PartitionKey::DEFAULT, "1.2.3", "1.2.3.4", "1.2.3.4.5")?;
//! let properties = store.get_properties(&instance.at_version(1)).await?;
//! println!("{} bytes", properties.content_length);
//! # Ok(())
//! # }
//! ```

mod constants;
mod local;

pub use constants::{BLOB_EXTENSION, DICOM_MEDIA_TYPE};
pub use local::LocalFileStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dicomstore_types::VersionedInstanceIdentifier;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Errors that can occur during blob operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// No blob exists for the requested version
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// A blob already exists for this version (immutability violation)
    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    /// Requested byte range falls outside the blob
    #[error("Invalid range {offset}+{length} for blob of {content_length} bytes")]
    InvalidRange {
        offset: u64,
        length: u64,
        content_length: u64,
    },

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for blob operations.
pub type FilesResult<T> = Result<T, FilesError>;

/// Properties of one stored blob version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProperties {
    /// Size of the blob in bytes
    pub content_length: u64,

    /// Media type of the stored payload
    pub content_type: String,

    /// Opaque validator that changes whenever the stored bytes could have changed
    pub etag: String,

    /// Location of the blob relative to the store root
    pub location: String,

    /// UTC timestamp of the last modification of the blob
    pub last_modified: DateTime<Utc>,
}

/// A contiguous byte range within a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset, saturating on overflow.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

/// Gateway to the blob layer.
///
/// All operations are keyed by a [`VersionedInstanceIdentifier`] and may suspend on I/O.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Fetches the properties of one version.
    ///
    /// Returns [`FilesError::NotFound`] if the version has no blob.
    async fn get_properties(&self, id: &VersionedInstanceIdentifier) -> FilesResult<FileProperties>;

    /// Reads the whole content of one version.
    async fn read(&self, id: &VersionedInstanceIdentifier) -> FilesResult<Vec<u8>>;

    /// Reads a byte range of one version.
    ///
    /// Returns [`FilesError::InvalidRange`] if the range extends past the end of the blob.
    async fn read_range(
        &self,
        id: &VersionedInstanceIdentifier,
        range: ByteRange,
    ) -> FilesResult<Vec<u8>>;

    /// Whether [`FileStore::read_range`] avoids reading the whole blob.
    fn supports_partial_read(&self) -> bool {
        true
    }

    /// Writes a new version.
    ///
    /// Returns [`FilesError::AlreadyExists`] if the version already has a blob; existing
    /// versions are never replaced.
    async fn write(
        &self,
        id: &VersionedInstanceIdentifier,
        content: &[u8],
    ) -> FilesResult<FileProperties>;

    /// Deletes one version. Deleting a missing version succeeds.
    async fn delete(&self, id: &VersionedInstanceIdentifier) -> FilesResult<()>;
}

/// Hex-encoded SHA-256 digest of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
