//! Instance ingest.
//!
//! A new instance is written as version 1 and then indexed. The blob is durable before the
//! index record exists, so a reader that finds the record always finds content.

use crate::codec::DicomCodec;
use crate::index::InstanceIndex;
use crate::locks::KeyedLocks;
use crate::model::{InstanceMetadata, InstanceProperties};
use crate::{CoreError, CoreResult};
use dicomstore_files::{sha256_hex, FileStore, FilesError};
use dicomstore_types::{InstanceIdentifier, PartitionKey, Version};
use std::sync::Arc;

/// Version assigned to newly stored instances.
pub const INITIAL_VERSION: Version = 1;

#[derive(Clone)]
pub struct StoreService {
    index: Arc<dyn InstanceIndex>,
    files: Arc<dyn FileStore>,
    codec: Arc<dyn DicomCodec>,
    instance_locks: KeyedLocks<InstanceIdentifier>,
}

impl StoreService {
    pub fn new(
        index: Arc<dyn InstanceIndex>,
        files: Arc<dyn FileStore>,
        codec: Arc<dyn DicomCodec>,
        instance_locks: KeyedLocks<InstanceIdentifier>,
    ) -> Self {
        Self {
            index,
            files,
            codec,
            instance_locks,
        }
    }

    /// Stores a new instance in `partition_key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] if the instance is already stored, and codec errors if
    /// the payload cannot be decoded.
    pub async fn store(
        &self,
        partition_key: PartitionKey,
        content: &[u8],
    ) -> CoreResult<InstanceMetadata> {
        let uids = self.codec.read_instance_uids(content)?;
        let transfer_syntax_uid = self.codec.transfer_syntax(content)?;
        let frame_ranges = self.codec.frame_ranges(content)?;

        let instance = InstanceIdentifier::new(
            partition_key,
            uids.study_instance_uid,
            uids.series_instance_uid,
            uids.sop_instance_uid,
        );
        let _guard = self.instance_locks.lock(&instance).await;

        if self.index.get_instance(&instance).await?.is_some() {
            return Err(CoreError::Conflict(format!(
                "instance {} is already stored",
                instance
            )));
        }

        let id = instance.at_version(INITIAL_VERSION);
        match self.files.write(&id, content).await {
            Ok(_) => {}
            Err(FilesError::AlreadyExists(_)) => {
                // Left behind by an earlier store that never reached the index.
                tracing::warn!(instance = %id, "replacing unindexed blob");
                self.files.delete(&id).await?;
                self.files.write(&id, content).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let mut properties = InstanceProperties::new(transfer_syntax_uid);
        if !frame_ranges.is_empty() {
            properties.frame_ranges.insert(INITIAL_VERSION, frame_ranges);
        }

        match self.index.add_instance(&id, properties).await {
            Ok(metadata) => {
                tracing::info!(
                    instance = %id,
                    bytes = content.len(),
                    sha256 = %sha256_hex(content),
                    "stored instance"
                );
                Ok(metadata)
            }
            Err(e) => {
                if let Err(cleanup) = self.files.delete(&id).await {
                    tracing::warn!(instance = %id, error = %cleanup, "failed to remove unindexed blob");
                }
                Err(e)
            }
        }
    }
}
