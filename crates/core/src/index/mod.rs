//! Instance index.
//!
//! The index is the source of truth for which version of an instance is current. Blobs are
//! written first and only then published here, so a published version always has content.
//!
//! Version numbers are allocated by [`InstanceIndex::reserve_version`] and are never reused,
//! even when a reservation is released without being published.

mod json;

pub use json::JsonIndex;

use crate::model::{InstanceMetadata, InstanceProperties};
use crate::CoreResult;
use async_trait::async_trait;
use dicomstore_files::ByteRange;
use dicomstore_types::{
    DicomUid, InstanceIdentifier, PartitionKey, Version, VersionedInstanceIdentifier,
};

#[async_trait]
pub trait InstanceIndex: Send + Sync {
    /// Current metadata of an instance, or `None` if it is not indexed.
    async fn get_instance(
        &self,
        instance: &InstanceIdentifier,
    ) -> CoreResult<Option<InstanceMetadata>>;

    /// Every instance of a study, ordered by identifier.
    async fn list_study_instances(
        &self,
        partition_key: PartitionKey,
        study_instance_uid: &DicomUid,
    ) -> CoreResult<Vec<InstanceMetadata>>;

    /// Every instance of a series, ordered by identifier.
    async fn list_series_instances(
        &self,
        partition_key: PartitionKey,
        study_instance_uid: &DicomUid,
        series_instance_uid: &DicomUid,
    ) -> CoreResult<Vec<InstanceMetadata>>;

    /// Indexes a newly stored instance at `identifier.version`.
    ///
    /// Fails with `Conflict` if the instance is already indexed.
    async fn add_instance(
        &self,
        identifier: &VersionedInstanceIdentifier,
        properties: InstanceProperties,
    ) -> CoreResult<InstanceMetadata>;

    /// Reserves the next version of an instance for an update.
    ///
    /// An existing unpublished reservation is returned again, so an update resumed after a
    /// crash writes to the same version it wrote before.
    async fn reserve_version(&self, instance: &InstanceIdentifier) -> CoreResult<Version>;

    /// Drops the reservation of `version`, if it is still the pending one.
    async fn release_reservation(
        &self,
        instance: &InstanceIdentifier,
        version: Version,
    ) -> CoreResult<()>;

    /// Publishes a reserved version as the current one.
    ///
    /// Succeeds only if the current version is still `expected_version` and `new_version` is
    /// the pending reservation; otherwise fails with `Conflict` and changes nothing. The first
    /// publish also records `expected_version` as the instance's original version.
    async fn publish_version(
        &self,
        instance: &InstanceIdentifier,
        expected_version: Version,
        new_version: Version,
        frame_ranges: Vec<ByteRange>,
    ) -> CoreResult<InstanceMetadata>;
}
