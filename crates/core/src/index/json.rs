//! File-backed instance index.
//!
//! Each instance has one JSON record at
//! `<index root>/<partition>/<study>/<series>/<sop>.json`. Records are replaced atomically and
//! every read-modify-write of a record happens under that instance's lock, so concurrent
//! updates of different instances never contend.

use super::InstanceIndex;
use crate::locks::KeyedLocks;
use crate::model::{InstanceMetadata, InstanceProperties};
use crate::persist::{list_dirs, list_files, read_optional, write_atomic};
use crate::{CoreError, CoreResult};
use async_trait::async_trait;
use dicomstore_files::ByteRange;
use dicomstore_types::{
    DicomUid, InstanceIdentifier, PartitionKey, Version, VersionedInstanceIdentifier,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    identifier: VersionedInstanceIdentifier,
    properties: InstanceProperties,
    /// Highest version ever handed out, published or not.
    last_allocated_version: Version,
}

impl IndexRecord {
    fn metadata(&self) -> InstanceMetadata {
        InstanceMetadata {
            identifier: self.identifier.clone(),
            properties: self.properties.clone(),
        }
    }
}

#[derive(Clone)]
pub struct JsonIndex {
    root_directory: PathBuf,
    locks: KeyedLocks<InstanceIdentifier>,
}

impl JsonIndex {
    /// Opens (creating if needed) an index rooted at `root_directory`.
    pub fn create(root_directory: &Path) -> CoreResult<Self> {
        std::fs::create_dir_all(root_directory).map_err(|e| {
            CoreError::IndexUnavailable(format!(
                "cannot create index directory {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self {
            root_directory: root_directory.to_path_buf(),
            locks: KeyedLocks::new(),
        })
    }

    fn study_dir(&self, partition_key: PartitionKey, study_instance_uid: &DicomUid) -> PathBuf {
        self.root_directory
            .join(partition_key.to_string())
            .join(study_instance_uid.as_str())
    }

    fn record_path(&self, instance: &InstanceIdentifier) -> PathBuf {
        self.study_dir(instance.partition_key, &instance.study_instance_uid)
            .join(instance.series_instance_uid.as_str())
            .join(format!(
                "{}.{}",
                instance.sop_instance_uid.as_str(),
                RECORD_EXTENSION
            ))
    }

    async fn read_record_at(path: &Path) -> CoreResult<Option<IndexRecord>> {
        let bytes = read_optional(path).await.map_err(|e| {
            CoreError::IndexUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;

        bytes
            .map(|bytes| {
                serde_json::from_slice::<IndexRecord>(&bytes).map_err(|e| {
                    CoreError::IndexUnavailable(format!(
                        "corrupt index record {}: {}",
                        path.display(),
                        e
                    ))
                })
            })
            .transpose()
    }

    async fn read_record(&self, instance: &InstanceIdentifier) -> CoreResult<Option<IndexRecord>> {
        Self::read_record_at(&self.record_path(instance)).await
    }

    async fn require_record(&self, instance: &InstanceIdentifier) -> CoreResult<IndexRecord> {
        self.read_record(instance)
            .await?
            .ok_or_else(|| CoreError::InstanceNotFound(instance.clone()))
    }

    async fn write_record(&self, record: &IndexRecord) -> CoreResult<()> {
        let path = self.record_path(&record.identifier.instance);
        let bytes = serde_json::to_vec_pretty(record).map_err(CoreError::Serialization)?;
        write_atomic(&path, &bytes).await.map_err(|e| {
            CoreError::IndexUnavailable(format!("cannot write {}: {}", path.display(), e))
        })
    }

    async fn read_series_dir(dir: &Path) -> CoreResult<Vec<InstanceMetadata>> {
        let files = list_files(dir, RECORD_EXTENSION).await.map_err(|e| {
            CoreError::IndexUnavailable(format!("cannot list {}: {}", dir.display(), e))
        })?;

        let mut instances = Vec::with_capacity(files.len());
        for file in files {
            if let Some(record) = Self::read_record_at(&file).await? {
                instances.push(record.metadata());
            }
        }
        Ok(instances)
    }
}

#[async_trait]
impl InstanceIndex for JsonIndex {
    async fn get_instance(
        &self,
        instance: &InstanceIdentifier,
    ) -> CoreResult<Option<InstanceMetadata>> {
        Ok(self.read_record(instance).await?.map(|r| r.metadata()))
    }

    async fn list_study_instances(
        &self,
        partition_key: PartitionKey,
        study_instance_uid: &DicomUid,
    ) -> CoreResult<Vec<InstanceMetadata>> {
        let study_dir = self.study_dir(partition_key, study_instance_uid);
        let series_dirs = list_dirs(&study_dir).await.map_err(|e| {
            CoreError::IndexUnavailable(format!("cannot list {}: {}", study_dir.display(), e))
        })?;

        let mut instances = Vec::new();
        for series_dir in series_dirs {
            instances.extend(Self::read_series_dir(&series_dir).await?);
        }
        instances.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(instances)
    }

    async fn list_series_instances(
        &self,
        partition_key: PartitionKey,
        study_instance_uid: &DicomUid,
        series_instance_uid: &DicomUid,
    ) -> CoreResult<Vec<InstanceMetadata>> {
        let series_dir = self
            .study_dir(partition_key, study_instance_uid)
            .join(series_instance_uid.as_str());
        let mut instances = Self::read_series_dir(&series_dir).await?;
        instances.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(instances)
    }

    async fn add_instance(
        &self,
        identifier: &VersionedInstanceIdentifier,
        properties: InstanceProperties,
    ) -> CoreResult<InstanceMetadata> {
        let _guard = self.locks.lock(&identifier.instance).await;

        if self.read_record(&identifier.instance).await?.is_some() {
            return Err(CoreError::Conflict(format!(
                "instance {} is already stored",
                identifier.instance
            )));
        }

        let record = IndexRecord {
            identifier: identifier.clone(),
            properties,
            last_allocated_version: identifier.version,
        };
        self.write_record(&record).await?;
        tracing::debug!(instance = %identifier, "indexed instance");
        Ok(record.metadata())
    }

    async fn reserve_version(&self, instance: &InstanceIdentifier) -> CoreResult<Version> {
        let _guard = self.locks.lock(instance).await;
        let mut record = self.require_record(instance).await?;

        if let Some(pending) = record.properties.new_version {
            tracing::debug!(%instance, version = pending, "reusing pending reservation");
            return Ok(pending);
        }

        let next = record.last_allocated_version.max(record.identifier.version) + 1;
        record.last_allocated_version = next;
        record.properties.new_version = Some(next);
        self.write_record(&record).await?;
        tracing::debug!(%instance, version = next, "reserved version");
        Ok(next)
    }

    async fn release_reservation(
        &self,
        instance: &InstanceIdentifier,
        version: Version,
    ) -> CoreResult<()> {
        let _guard = self.locks.lock(instance).await;
        let Some(mut record) = self.read_record(instance).await? else {
            return Ok(());
        };

        if record.properties.new_version == Some(version) {
            record.properties.new_version = None;
            self.write_record(&record).await?;
            tracing::debug!(%instance, version, "released reservation");
        }
        Ok(())
    }

    async fn publish_version(
        &self,
        instance: &InstanceIdentifier,
        expected_version: Version,
        new_version: Version,
        frame_ranges: Vec<ByteRange>,
    ) -> CoreResult<InstanceMetadata> {
        let _guard = self.locks.lock(instance).await;
        let mut record = self.require_record(instance).await?;

        if record.identifier.version != expected_version {
            return Err(CoreError::Conflict(format!(
                "instance {} is at version {}, expected {}",
                instance, record.identifier.version, expected_version
            )));
        }
        if record.properties.new_version != Some(new_version) {
            return Err(CoreError::Conflict(format!(
                "version {} is not the pending reservation of {}",
                new_version, instance
            )));
        }

        let original = *record
            .properties
            .original_version
            .get_or_insert(expected_version);
        record.identifier.version = new_version;
        record.properties.new_version = None;
        if !frame_ranges.is_empty() {
            record.properties.frame_ranges.insert(new_version, frame_ranges);
        }
        // Only the original and the current version are ever resolved for reads.
        record
            .properties
            .frame_ranges
            .retain(|version, _| *version == original || *version == new_version);

        self.write_record(&record).await?;
        tracing::info!(%instance, from = expected_version, to = new_version, "published version");
        Ok(record.metadata())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::EXPLICIT_VR_LITTLE_ENDIAN;
    use tempfile::TempDir;

    fn instance(sop: &str) -> InstanceIdentifier {
        InstanceIdentifier::parse(PartitionKey::DEFAULT, "1.2.3", "1.2.3.4", sop).unwrap()
    }

    fn properties() -> InstanceProperties {
        let mut properties = InstanceProperties::new(EXPLICIT_VR_LITTLE_ENDIAN);
        properties
            .frame_ranges
            .insert(1, vec![ByteRange::new(100, 16)]);
        properties
    }

    #[tokio::test]
    async fn test_add_and_get_instance() {
        let temp_dir = TempDir::new().unwrap();
        let index = JsonIndex::create(temp_dir.path()).unwrap();
        let id = instance("1.2.3.4.5").at_version(1);

        index.add_instance(&id, properties()).await.unwrap();

        let md = index.get_instance(&id.instance).await.unwrap().unwrap();
        assert_eq!(md.identifier, id);
        assert_eq!(md.properties.original_version, None);
        assert!(index
            .get_instance(&instance("1.2.3.4.6"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_add_existing_instance_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let index = JsonIndex::create(temp_dir.path()).unwrap();
        let id = instance("1.2.3.4.5").at_version(1);

        index.add_instance(&id, properties()).await.unwrap();
        let err = index.add_instance(&id, properties()).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reserve_and_publish_sets_original_once() {
        let temp_dir = TempDir::new().unwrap();
        let index = JsonIndex::create(temp_dir.path()).unwrap();
        let id = instance("1.2.3.4.5");
        index.add_instance(&id.at_version(1), properties()).await.unwrap();

        let v2 = index.reserve_version(&id).await.unwrap();
        assert_eq!(v2, 2);
        let md = index
            .publish_version(&id, 1, v2, vec![ByteRange::new(120, 16)])
            .await
            .unwrap();
        assert_eq!(md.identifier.version, 2);
        assert_eq!(md.properties.original_version, Some(1));
        assert_eq!(md.properties.new_version, None);

        let v3 = index.reserve_version(&id).await.unwrap();
        assert_eq!(v3, 3);
        let md = index
            .publish_version(&id, 2, v3, vec![ByteRange::new(130, 16)])
            .await
            .unwrap();
        assert_eq!(md.identifier.version, 3);
        assert_eq!(md.properties.original_version, Some(1));
        assert!(md.properties.frame_ranges_for(1).is_some());
        assert!(md.properties.frame_ranges_for(2).is_none());
        assert!(md.properties.frame_ranges_for(3).is_some());
    }

    #[tokio::test]
    async fn test_pending_reservation_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        let index = JsonIndex::create(temp_dir.path()).unwrap();
        let id = instance("1.2.3.4.5");
        index.add_instance(&id.at_version(1), properties()).await.unwrap();

        let first = index.reserve_version(&id).await.unwrap();
        let second = index.reserve_version(&id).await.unwrap();
        assert_eq!(first, second);

        let md = index.get_instance(&id).await.unwrap().unwrap();
        assert_eq!(md.properties.new_version, Some(first));
        assert_eq!(md.identifier.version, 1);
    }

    #[tokio::test]
    async fn test_released_versions_are_not_reused() {
        let temp_dir = TempDir::new().unwrap();
        let index = JsonIndex::create(temp_dir.path()).unwrap();
        let id = instance("1.2.3.4.5");
        index.add_instance(&id.at_version(1), properties()).await.unwrap();

        let reserved = index.reserve_version(&id).await.unwrap();
        index.release_reservation(&id, reserved).await.unwrap();
        let next = index.reserve_version(&id).await.unwrap();

        assert!(next > reserved);
    }

    #[tokio::test]
    async fn test_publish_with_stale_expected_version_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let index = JsonIndex::create(temp_dir.path()).unwrap();
        let id = instance("1.2.3.4.5");
        index.add_instance(&id.at_version(1), properties()).await.unwrap();

        let reserved = index.reserve_version(&id).await.unwrap();
        let err = index
            .publish_version(&id, 7, reserved, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let err = index
            .publish_version(&id, 1, reserved + 1, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let md = index.get_instance(&id).await.unwrap().unwrap();
        assert_eq!(md.identifier.version, 1);
        assert_eq!(md.properties.original_version, None);
    }

    #[tokio::test]
    async fn test_list_study_and_series_instances() {
        let temp_dir = TempDir::new().unwrap();
        let index = JsonIndex::create(temp_dir.path()).unwrap();
        let a = instance("1.2.3.4.5");
        let b = instance("1.2.3.4.6");
        let c =
            InstanceIdentifier::parse(PartitionKey::DEFAULT, "1.2.3", "1.2.3.9", "1.2.3.9.1")
                .unwrap();
        let other_partition =
            InstanceIdentifier::parse(PartitionKey::new(2).unwrap(), "1.2.3", "1.2.3.4", "1.2.3.4.7")
                .unwrap();

        for id in [&b, &a, &c, &other_partition] {
            index.add_instance(&id.at_version(1), properties()).await.unwrap();
        }

        let study = index
            .list_study_instances(PartitionKey::DEFAULT, &a.study_instance_uid)
            .await
            .unwrap();
        let sops: Vec<_> = study.iter().map(|m| m.instance().clone()).collect();
        assert_eq!(sops, vec![a.clone(), b.clone(), c.clone()]);

        let series = index
            .list_series_instances(
                PartitionKey::DEFAULT,
                &a.study_instance_uid,
                &a.series_instance_uid,
            )
            .await
            .unwrap();
        assert_eq!(series.len(), 2);

        let missing = index
            .list_study_instances(PartitionKey::DEFAULT, &DicomUid::new("9.9").unwrap())
            .await
            .unwrap();
        assert!(missing.is_empty());
    }
}
