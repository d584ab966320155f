//! Resource guard.
//!
//! Every retrieve path calls into this module before it reads a payload, so that an instance
//! larger than the configured limit is rejected from its properties alone and never
//! materialised in memory.

use crate::error::PayloadKind;
use crate::{CoreError, CoreResult};
use dicomstore_files::{ByteRange, FileProperties, FileStore};
use dicomstore_types::VersionedInstanceIdentifier;

/// Fetches the properties of `id` and rejects it if it is larger than `max_bytes`.
///
/// An instance of exactly `max_bytes` passes. The returned properties belong to `id` and
/// should be reused by the caller rather than fetched again.
pub async fn check_file_size(
    files: &dyn FileStore,
    max_bytes: u64,
    id: &VersionedInstanceIdentifier,
    is_render: bool,
) -> CoreResult<FileProperties> {
    let kind = if is_render {
        PayloadKind::Render
    } else {
        PayloadKind::Retrieve
    };
    check_payload_size(files, max_bytes, id, kind).await
}

/// [`check_file_size`] for a caller that names the kind of read, so the rejection message
/// fits the request.
pub async fn check_payload_size(
    files: &dyn FileStore,
    max_bytes: u64,
    id: &VersionedInstanceIdentifier,
    kind: PayloadKind,
) -> CoreResult<FileProperties> {
    let properties = files
        .get_properties(id)
        .await
        .map_err(|e| CoreError::from_files(e, id))?;

    if properties.content_length > max_bytes {
        tracing::warn!(
            instance = %id,
            content_length = properties.content_length,
            max_bytes,
            ?kind,
            "rejected oversized payload"
        );
        return Err(CoreError::payload_too_large(kind, max_bytes));
    }

    Ok(properties)
}

/// Rejects a single frame range larger than `max_bytes`.
pub fn check_frame_size(range: &ByteRange, max_bytes: u64) -> CoreResult<()> {
    if range.length > max_bytes {
        return Err(CoreError::payload_too_large(PayloadKind::Retrieve, max_bytes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicomstore_files::LocalFileStore;
    use dicomstore_types::{InstanceIdentifier, PartitionKey};
    use tempfile::TempDir;

    fn id(version: u64) -> VersionedInstanceIdentifier {
        InstanceIdentifier::parse(PartitionKey::DEFAULT, "1.2.3", "1.2.3.4", "1.2.3.4.5")
            .unwrap()
            .at_version(version)
    }

    #[tokio::test]
    async fn test_boundary_size_is_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path()).unwrap();
        store.write(&id(1), &[0u8; 64]).await.unwrap();

        let properties = check_file_size(&store, 64, &id(1), false).await.unwrap();
        assert_eq!(properties.content_length, 64);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected_with_kind() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path()).unwrap();
        store.write(&id(1), &[0u8; 65]).await.unwrap();

        let err = check_file_size(&store, 64, &id(1), true).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::PayloadTooLarge {
                kind: PayloadKind::Render,
                max_bytes: 64,
                ..
            }
        ));

        let err = check_file_size(&store, 64, &id(1), false).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::PayloadTooLarge {
                kind: PayloadKind::Retrieve,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_version_is_version_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path()).unwrap();

        let err = check_file_size(&store, 64, &id(9), false).await.unwrap_err();
        assert!(matches!(err, CoreError::VersionNotFound(v) if v.version == 9));
    }

    #[test]
    fn test_frame_size_check() {
        assert!(check_frame_size(&ByteRange::new(0, 10), 10).is_ok());
        assert!(check_frame_size(&ByteRange::new(0, 11), 10).is_err());
    }
}
