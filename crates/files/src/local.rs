//! Local filesystem implementation of the File Store Gateway
//!
//! [`LocalFileStore`] keeps every instance version as one file under a hierarchical directory
//! derived from the instance identifier. Because UIDs are validated to digits and dots, each
//! identifier component is a safe single path segment and cannot escape the store root.
//!
//! # Write protocol
//!
//! A version is written in three steps:
//!
//! 1. the payload is written to a uniquely named temporary file next to its final location
//!    and flushed to disk (`fsync`)
//! 2. the temporary file is hard-linked to the final `<version>.dcm` name; linking fails if
//!    the name already exists, which makes the publish step both atomic and no-replace
//! 3. the temporary name is removed
//!
//! A crash between steps leaves at most a stray `*.tmp` file, never a truncated version.

use crate::constants::TEMP_SUFFIX;
use crate::{
    sha256_hex, ByteRange, FileProperties, FileStore, FilesError, FilesResult, BLOB_EXTENSION,
    DICOM_MEDIA_TYPE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dicomstore_types::{InstanceIdentifier, VersionedInstanceIdentifier};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Blob store rooted at a local directory.
///
/// The store is stateless apart from its root path and can be shared freely between tasks.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    /// Canonicalised root directory containing all partitions
    root_directory: PathBuf,
}

impl LocalFileStore {
    /// Opens a store rooted at an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidRootDirectory`] if the path does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root_directory: &Path) -> FilesResult<Self> {
        if !root_directory.exists() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root_directory.display()
            )));
        }

        if !root_directory.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root_directory.display()
            )));
        }

        let root_directory = root_directory.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self { root_directory })
    }

    /// Creates the root directory if needed, then opens the store.
    pub fn create(root_directory: &Path) -> FilesResult<Self> {
        std::fs::create_dir_all(root_directory).map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot create directory {}: {}",
                root_directory.display(),
                e
            ))
        })?;
        Self::new(root_directory)
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    /// Relative path of the directory holding every version of one instance.
    fn relative_instance_dir(instance: &InstanceIdentifier) -> PathBuf {
        PathBuf::from(instance.partition_key.to_string())
            .join(instance.study_instance_uid.as_str())
            .join(instance.series_instance_uid.as_str())
            .join(instance.sop_instance_uid.as_str())
    }

    /// Relative path of one version: `<partition>/<study>/<series>/<sop>/<version>.dcm`
    fn relative_path(id: &VersionedInstanceIdentifier) -> PathBuf {
        Self::relative_instance_dir(&id.instance).join(format!("{}.{}", id.version, BLOB_EXTENSION))
    }

    fn blob_path(&self, id: &VersionedInstanceIdentifier) -> PathBuf {
        self.root_directory.join(Self::relative_path(id))
    }

    fn temp_path(&self, id: &VersionedInstanceIdentifier, content: &[u8]) -> PathBuf {
        let digest = sha256_hex(content);
        self.root_directory
            .join(Self::relative_instance_dir(&id.instance))
            .join(format!(
                ".{}.{}.{}.{}",
                id.version,
                &digest[..16],
                std::process::id(),
                TEMP_SUFFIX
            ))
    }

    async fn properties_at(
        &self,
        id: &VersionedInstanceIdentifier,
        path: &Path,
    ) -> FilesResult<FileProperties> {
        let metadata = fs::metadata(path).await.map_err(|e| not_found_or_io(e, id))?;
        let last_modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let content_length = metadata.len();

        Ok(FileProperties {
            content_length,
            content_type: DICOM_MEDIA_TYPE.to_string(),
            etag: format!(
                "\"{:x}-{:x}\"",
                content_length,
                last_modified.timestamp_nanos_opt().unwrap_or_default()
            ),
            location: Self::relative_path(id).to_string_lossy().into_owned(),
            last_modified,
        })
    }
}

fn not_found_or_io(e: std::io::Error, id: &VersionedInstanceIdentifier) -> FilesError {
    if e.kind() == ErrorKind::NotFound {
        FilesError::NotFound(id.to_string())
    } else {
        FilesError::Io(e)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn get_properties(&self, id: &VersionedInstanceIdentifier) -> FilesResult<FileProperties> {
        let path = self.blob_path(id);
        self.properties_at(id, &path).await
    }

    async fn read(&self, id: &VersionedInstanceIdentifier) -> FilesResult<Vec<u8>> {
        fs::read(self.blob_path(id))
            .await
            .map_err(|e| not_found_or_io(e, id))
    }

    async fn read_range(
        &self,
        id: &VersionedInstanceIdentifier,
        range: ByteRange,
    ) -> FilesResult<Vec<u8>> {
        let mut file = fs::File::open(self.blob_path(id))
            .await
            .map_err(|e| not_found_or_io(e, id))?;
        let content_length = file.metadata().await?.len();

        if range.end() > content_length || range.end() < range.offset {
            return Err(FilesError::InvalidRange {
                offset: range.offset,
                length: range.length,
                content_length,
            });
        }

        let length = usize::try_from(range.length).map_err(|_| FilesError::InvalidRange {
            offset: range.offset,
            length: range.length,
            content_length,
        })?;

        file.seek(SeekFrom::Start(range.offset)).await?;
        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }

    async fn write(
        &self,
        id: &VersionedInstanceIdentifier,
        content: &[u8],
    ) -> FilesResult<FileProperties> {
        let final_path = self.blob_path(id);

        // Cheap early exit; the hard link below is the authoritative check.
        if fs::try_exists(&final_path).await? {
            return Err(FilesError::AlreadyExists(id.to_string()));
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create storage directory {}: {}",
                        parent.display(),
                        e
                    ),
                ))
            })?;
        }

        let temp_path = self.temp_path(id, content);
        {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .await?;
            file.write_all(content).await?;
            file.sync_all().await?;
        }

        let linked = fs::hard_link(&temp_path, &final_path).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            tracing::warn!("failed to remove temporary blob {}: {}", temp_path.display(), e);
        }

        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(FilesError::AlreadyExists(id.to_string()));
            }
            Err(e) => {
                return Err(FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to write blob to {}: {}", final_path.display(), e),
                )));
            }
        }

        tracing::debug!(
            blob = %id,
            bytes = content.len(),
            "stored blob version"
        );

        self.properties_at(id, &final_path).await
    }

    async fn delete(&self, id: &VersionedInstanceIdentifier) -> FilesResult<()> {
        match fs::remove_file(self.blob_path(id)).await {
            Ok(()) => {
                tracing::debug!(blob = %id, "deleted blob version");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilesError::Io(e)),
        }
    }
}
