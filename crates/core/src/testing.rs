//! Shared fixtures for the crate's tests.

use crate::codec::{DicomCodec, EnvelopeCodec};
use crate::config::{CoreConfig, FrameSizePolicy};
use crate::constants::{DEFAULT_MAX_JOB_ATTEMPTS, EXPLICIT_VR_LITTLE_ENDIAN};
use crate::index::InstanceIndex;
use crate::locks::KeyedLocks;
use crate::model::{InstanceMetadata, InstanceProperties};
use crate::update::{ChangeDataset, OperationStore, UpdateOrchestrator};
use crate::{CoreError, CoreResult, Services};
use async_trait::async_trait;
use dicomstore_files::{ByteRange, FileStore};
use dicomstore_types::{
    DicomUid, InstanceIdentifier, PartitionKey, Version, VersionedInstanceIdentifier,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub(crate) fn uid(s: &str) -> DicomUid {
    DicomUid::new(s).unwrap()
}

pub(crate) fn changes(patient_name: &str) -> ChangeDataset {
    let Value::Object(map) = json!({ "PatientName": patient_name }) else {
        unreachable!()
    };
    ChangeDataset::new(map).unwrap()
}

/// Two 2x2 frames: `[0, 1, 2, 3]` and `[4, 5, 6, 7]`.
pub(crate) fn instance_content(study: &str, series: &str, sop: &str) -> Vec<u8> {
    let Value::Object(dataset) = json!({
        "StudyInstanceUID": study,
        "SeriesInstanceUID": series,
        "SOPInstanceUID": sop,
        "PatientName": "Doe^John",
        "PatientID": "12345",
        "Rows": 2,
        "Columns": 2,
    }) else {
        unreachable!()
    };
    EnvelopeCodec
        .encode(
            EXPLICIT_VR_LITTLE_ENDIAN,
            dataset,
            &[vec![0, 1, 2, 3], vec![4, 5, 6, 7]],
        )
        .unwrap()
}

pub(crate) struct Fixture {
    _temp_dir: TempDir,
    pub services: Services,
    pub index: Arc<dyn InstanceIndex>,
    pub files: Arc<dyn FileStore>,
    pub codec: Arc<dyn DicomCodec>,
    pub operations: Arc<dyn OperationStore>,
    pub orchestrator: Arc<UpdateOrchestrator>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_max_payload(crate::constants::DEFAULT_MAX_PAYLOAD_BYTES).await
    }

    pub async fn with_max_payload(max_payload_bytes: u64) -> Self {
        Self::with_limits(max_payload_bytes, FrameSizePolicy::Frame).await
    }

    pub async fn with_limits(max_payload_bytes: u64, frame_size_policy: FrameSizePolicy) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = CoreConfig::new(
            temp_dir.path().to_path_buf(),
            max_payload_bytes,
            frame_size_policy,
            Duration::from_millis(50),
            DEFAULT_MAX_JOB_ATTEMPTS,
        )
        .unwrap();
        let services = Services::open(&config).unwrap();

        Self {
            _temp_dir: temp_dir,
            index: Arc::clone(&services.index),
            files: Arc::clone(&services.files),
            codec: Arc::clone(&services.codec),
            operations: Arc::clone(&services.operation_store),
            orchestrator: Arc::clone(&services.orchestrator),
            services,
        }
    }

    pub async fn store_instance(&self, study: &str, series: &str, sop: &str) -> InstanceIdentifier {
        let content = instance_content(study, series, sop);
        self.services
            .store
            .store(PartitionKey::DEFAULT, &content)
            .await
            .unwrap()
            .identifier
            .instance
    }

    /// An orchestrator over this fixture's blobs and jobs but a different index.
    pub fn orchestrator_with_index(
        &self,
        index: Arc<dyn InstanceIndex>,
        max_job_attempts: u32,
    ) -> UpdateOrchestrator {
        UpdateOrchestrator::new(
            index,
            Arc::clone(&self.files),
            Arc::clone(&self.codec),
            Arc::clone(&self.operations),
            KeyedLocks::new(),
            KeyedLocks::new(),
            max_job_attempts,
        )
    }
}

/// Index whose every call fails as if the backing store were down.
pub(crate) struct FailingIndex;

fn unavailable<T>() -> CoreResult<T> {
    Err(CoreError::IndexUnavailable("backing store offline".into()))
}

#[async_trait]
impl InstanceIndex for FailingIndex {
    async fn get_instance(&self, _: &InstanceIdentifier) -> CoreResult<Option<InstanceMetadata>> {
        unavailable()
    }

    async fn list_study_instances(
        &self,
        _: PartitionKey,
        _: &DicomUid,
    ) -> CoreResult<Vec<InstanceMetadata>> {
        unavailable()
    }

    async fn list_series_instances(
        &self,
        _: PartitionKey,
        _: &DicomUid,
        _: &DicomUid,
    ) -> CoreResult<Vec<InstanceMetadata>> {
        unavailable()
    }

    async fn add_instance(
        &self,
        _: &VersionedInstanceIdentifier,
        _: InstanceProperties,
    ) -> CoreResult<InstanceMetadata> {
        unavailable()
    }

    async fn reserve_version(&self, _: &InstanceIdentifier) -> CoreResult<Version> {
        unavailable()
    }

    async fn release_reservation(&self, _: &InstanceIdentifier, _: Version) -> CoreResult<()> {
        unavailable()
    }

    async fn publish_version(
        &self,
        _: &InstanceIdentifier,
        _: Version,
        _: Version,
        _: Vec<ByteRange>,
    ) -> CoreResult<InstanceMetadata> {
        unavailable()
    }
}

/// Where a [`RacingIndex`] lets a competing writer in.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum RacePoint {
    /// Right after the reservation: the competitor writes its own bytes at the reserved
    /// version and publishes them.
    AfterReserve,
    /// Right before the publish: the competitor publishes the same reservation first.
    BeforePublish,
}

/// Index that lets one competing writer (sharing the reservation, as another process would)
/// publish the reserved version once, at `race_at`.
pub(crate) struct RacingIndex {
    inner: Arc<dyn InstanceIndex>,
    files: Arc<dyn FileStore>,
    race_at: RacePoint,
    competitor_content: Vec<u8>,
    raced: AtomicBool,
}

impl RacingIndex {
    pub fn new(fx: &Fixture, race_at: RacePoint, competitor_content: Vec<u8>) -> Self {
        Self {
            inner: Arc::clone(&fx.index),
            files: Arc::clone(&fx.files),
            race_at,
            competitor_content,
            raced: AtomicBool::new(false),
        }
    }

    fn first_race(&self, point: RacePoint) -> bool {
        self.race_at == point && !self.raced.swap(true, Ordering::SeqCst)
    }

    async fn competitor_publishes(&self, instance: &InstanceIdentifier, version: Version) {
        let current = self.inner.get_instance(instance).await.unwrap().unwrap();
        self.inner
            .publish_version(instance, current.identifier.version, version, Vec::new())
            .await
            .unwrap();
    }
}

#[async_trait]
impl InstanceIndex for RacingIndex {
    async fn get_instance(&self, instance: &InstanceIdentifier) -> CoreResult<Option<InstanceMetadata>> {
        self.inner.get_instance(instance).await
    }

    async fn list_study_instances(
        &self,
        partition_key: PartitionKey,
        study: &DicomUid,
    ) -> CoreResult<Vec<InstanceMetadata>> {
        self.inner.list_study_instances(partition_key, study).await
    }

    async fn list_series_instances(
        &self,
        partition_key: PartitionKey,
        study: &DicomUid,
        series: &DicomUid,
    ) -> CoreResult<Vec<InstanceMetadata>> {
        self.inner.list_series_instances(partition_key, study, series).await
    }

    async fn add_instance(
        &self,
        identifier: &VersionedInstanceIdentifier,
        properties: InstanceProperties,
    ) -> CoreResult<InstanceMetadata> {
        self.inner.add_instance(identifier, properties).await
    }

    async fn reserve_version(&self, instance: &InstanceIdentifier) -> CoreResult<Version> {
        let version = self.inner.reserve_version(instance).await?;
        if self.first_race(RacePoint::AfterReserve) {
            self.files
                .write(&instance.at_version(version), &self.competitor_content)
                .await
                .unwrap();
            self.competitor_publishes(instance, version).await;
        }
        Ok(version)
    }

    async fn release_reservation(&self, instance: &InstanceIdentifier, version: Version) -> CoreResult<()> {
        self.inner.release_reservation(instance, version).await
    }

    async fn publish_version(
        &self,
        instance: &InstanceIdentifier,
        expected_version: Version,
        new_version: Version,
        frame_ranges: Vec<ByteRange>,
    ) -> CoreResult<InstanceMetadata> {
        if self.first_race(RacePoint::BeforePublish) {
            self.competitor_publishes(instance, new_version).await;
        }
        self.inner
            .publish_version(instance, expected_version, new_version, frame_ranges)
            .await
    }
}
