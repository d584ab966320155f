//! # Retrieve Pipeline
//!
//! Serves whole instances, frames, rendered images and decoded metadata. Every request runs
//! the same sequence:
//!
//! 1. look the instance up in the index
//! 2. resolve the physical version to read ([`resolve_version`])
//! 3. check the payload against the size limit ([`check_file_size`]) before reading anything
//! 4. read, then transcode, extract or render through the codec seams
//!
//! Retrieves have no side effects and can be retried freely.

use crate::codec::{negotiate, AcceptHeader, DicomCodec, Renderer, TransferSyntaxRequest};
use crate::config::FrameSizePolicy;
use crate::constants::DICOM_MEDIA_TYPE;
use crate::guard::{check_file_size, check_frame_size, check_payload_size};
use crate::index::InstanceIndex;
use crate::model::InstanceMetadata;
use crate::version::resolve_version;
use crate::{CoreError, CoreResult, PayloadKind};
use dicomstore_files::{ByteRange, FileStore};
use dicomstore_types::{DicomUid, InstanceIdentifier, PartitionKey, Version, VersionedInstanceIdentifier};
use serde_json::Value;
use std::sync::Arc;

/// Quality used for rendering when the caller does not ask for one.
const DEFAULT_RENDER_QUALITY: u8 = 100;

#[derive(Debug, Clone)]
pub struct RetrieveInstanceRequest {
    pub instance: InstanceIdentifier,
    pub transfer_syntax: TransferSyntaxRequest,
    pub want_original: bool,
}

#[derive(Debug, Clone)]
pub struct RetrieveFramesRequest {
    pub instance: InstanceIdentifier,
    /// 1-based frame numbers, returned in the order requested.
    pub frames: Vec<u32>,
    pub transfer_syntax: TransferSyntaxRequest,
    pub want_original: bool,
}

#[derive(Debug, Clone)]
pub struct RetrieveRenderedRequest {
    pub instance: InstanceIdentifier,
    pub accept: Vec<AcceptHeader>,
    /// 1-based frame to render; the first frame when absent.
    pub frame: Option<u32>,
    /// 1-100; full quality when absent.
    pub quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct RetrieveInstanceResponse {
    pub identifier: VersionedInstanceIdentifier,
    pub content: Vec<u8>,
    pub media_type: String,
    pub transfer_syntax_uid: String,
}

#[derive(Debug, Clone)]
pub struct RetrieveFramesResponse {
    pub identifier: VersionedInstanceIdentifier,
    pub frames: Vec<Vec<u8>>,
    pub transfer_syntax_uid: String,
}

#[derive(Debug, Clone)]
pub struct RetrieveRenderedResponse {
    pub identifier: VersionedInstanceIdentifier,
    pub content: Vec<u8>,
    pub media_type: String,
}

#[derive(Clone)]
pub struct RetrieveService {
    index: Arc<dyn InstanceIndex>,
    files: Arc<dyn FileStore>,
    codec: Arc<dyn DicomCodec>,
    renderer: Arc<dyn Renderer>,
    max_payload_bytes: u64,
    frame_size_policy: FrameSizePolicy,
}

impl RetrieveService {
    pub fn new(
        index: Arc<dyn InstanceIndex>,
        files: Arc<dyn FileStore>,
        codec: Arc<dyn DicomCodec>,
        renderer: Arc<dyn Renderer>,
        max_payload_bytes: u64,
        frame_size_policy: FrameSizePolicy,
    ) -> Self {
        Self {
            index,
            files,
            codec,
            renderer,
            max_payload_bytes,
            frame_size_policy,
        }
    }

    async fn lookup(&self, instance: &InstanceIdentifier) -> CoreResult<InstanceMetadata> {
        self.index
            .get_instance(instance)
            .await?
            .ok_or_else(|| CoreError::InstanceNotFound(instance.clone()))
    }

    async fn read_checked(&self, id: &VersionedInstanceIdentifier, kind: PayloadKind) -> CoreResult<Vec<u8>> {
        check_payload_size(self.files.as_ref(), self.max_payload_bytes, id, kind).await?;
        self.files
            .read(id)
            .await
            .map_err(|e| CoreError::from_files(e, id))
    }

    /// Returns a whole instance, transcoded when a different transfer syntax is requested.
    pub async fn retrieve_instance(
        &self,
        request: &RetrieveInstanceRequest,
    ) -> CoreResult<RetrieveInstanceResponse> {
        let metadata = self.lookup(&request.instance).await?;
        let version = resolve_version(&metadata, request.want_original);
        let id = request.instance.at_version(version);

        let content = self.read_checked(&id, PayloadKind::Retrieve).await?;
        let stored_uid = self.codec.transfer_syntax(&content)?;

        let (content, transfer_syntax_uid) =
            match request.transfer_syntax.target_if_different(&stored_uid) {
                Some(target) => {
                    tracing::debug!(instance = %id, from = %stored_uid, to = target, "transcoding instance");
                    (self.codec.transcode(&content, target)?, target.to_string())
                }
                None => (content, stored_uid),
            };

        Ok(RetrieveInstanceResponse {
            identifier: id,
            content,
            media_type: DICOM_MEDIA_TYPE.to_string(),
            transfer_syntax_uid,
        })
    }

    /// Returns one or more frames as raw bytes.
    ///
    /// Frames are served with ranged reads when the store supports them, ranges are known for
    /// the resolved version and no transcoding is requested; otherwise the whole object is
    /// read and the codec extracts the frames.
    pub async fn retrieve_frames(
        &self,
        request: &RetrieveFramesRequest,
    ) -> CoreResult<RetrieveFramesResponse> {
        if request.frames.is_empty() {
            return Err(CoreError::InvalidInput("at least one frame must be requested".into()));
        }

        let metadata = self.lookup(&request.instance).await?;
        let version = resolve_version(&metadata, request.want_original);
        let id = request.instance.at_version(version);
        let stored_uid = metadata.properties.transfer_syntax_uid.as_str();

        let needs_transcode = request.transfer_syntax.target_if_different(stored_uid).is_some();
        let ranges = metadata
            .properties
            .frame_ranges_for(version)
            .filter(|_| self.files.supports_partial_read() && !needs_transcode);

        match ranges {
            Some(ranges) => {
                let frames = self.read_frame_ranges(&id, ranges, &request.frames).await?;
                Ok(RetrieveFramesResponse {
                    identifier: id,
                    frames,
                    transfer_syntax_uid: stored_uid.to_string(),
                })
            }
            None => self.extract_frames(id, request).await,
        }
    }

    async fn read_frame_ranges(
        &self,
        id: &VersionedInstanceIdentifier,
        ranges: &[ByteRange],
        frames: &[u32],
    ) -> CoreResult<Vec<Vec<u8>>> {
        let frame_count = ranges.len() as u32;
        let selected = frames
            .iter()
            .map(|&frame| {
                frame
                    .checked_sub(1)
                    .and_then(|i| ranges.get(i as usize))
                    .copied()
                    .ok_or(CoreError::FrameOutOfRange {
                        requested: frame,
                        frame_count,
                    })
            })
            .collect::<CoreResult<Vec<ByteRange>>>()?;

        match self.frame_size_policy {
            FrameSizePolicy::Frame => {
                for range in &selected {
                    check_frame_size(range, self.max_payload_bytes)?;
                }
            }
            FrameSizePolicy::Instance => {
                check_file_size(self.files.as_ref(), self.max_payload_bytes, id, false).await?;
            }
        }

        let mut out = Vec::with_capacity(selected.len());
        for range in selected {
            let bytes = self
                .files
                .read_range(id, range)
                .await
                .map_err(|e| CoreError::from_files(e, id))?;
            out.push(bytes);
        }
        tracing::debug!(instance = %id, frames = out.len(), "served frames with ranged reads");
        Ok(out)
    }

    async fn extract_frames(
        &self,
        id: VersionedInstanceIdentifier,
        request: &RetrieveFramesRequest,
    ) -> CoreResult<RetrieveFramesResponse> {
        let content = self.read_checked(&id, PayloadKind::Retrieve).await?;
        let stored_uid = self.codec.transfer_syntax(&content)?;

        let (content, transfer_syntax_uid) =
            match request.transfer_syntax.target_if_different(&stored_uid) {
                Some(target) => (self.codec.transcode(&content, target)?, target.to_string()),
                None => (content, stored_uid),
            };

        let frames = request
            .frames
            .iter()
            .map(|&frame| self.codec.extract_frame(&content, frame).map_err(CoreError::from))
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(RetrieveFramesResponse {
            identifier: id,
            frames,
            transfer_syntax_uid,
        })
    }

    /// Convenience for a single frame.
    pub async fn retrieve_frame(
        &self,
        instance: &InstanceIdentifier,
        frame: u32,
        transfer_syntax: TransferSyntaxRequest,
        want_original: bool,
    ) -> CoreResult<Vec<u8>> {
        let request = RetrieveFramesRequest {
            instance: instance.clone(),
            frames: vec![frame],
            transfer_syntax,
            want_original,
        };
        let mut response = self.retrieve_frames(&request).await?;
        response
            .frames
            .pop()
            .ok_or_else(|| CoreError::FrameOutOfRange {
                requested: frame,
                frame_count: 0,
            })
    }

    /// Renders a frame of the current version in the best mutually supported media type.
    pub async fn retrieve_rendered(
        &self,
        request: &RetrieveRenderedRequest,
    ) -> CoreResult<RetrieveRenderedResponse> {
        let quality = request.quality.unwrap_or(DEFAULT_RENDER_QUALITY);
        if !(1..=100).contains(&quality) {
            return Err(CoreError::InvalidInput(format!(
                "quality must be between 1 and 100, got {}",
                quality
            )));
        }

        let metadata = self.lookup(&request.instance).await?;
        let id = request.instance.at_version(resolve_version(&metadata, false));

        let media_type = negotiate(&request.accept, self.renderer.supported_media_types())
            .ok_or_else(|| {
                let requested: Vec<&str> =
                    request.accept.iter().map(|a| a.media_type.as_str()).collect();
                CoreError::UnsupportedAcceptType(requested.join(", "))
            })?;

        let content = self.read_checked(&id, PayloadKind::Render).await?;
        let rendered = self.renderer.render(
            &content,
            request.frame.unwrap_or(1),
            &media_type,
            quality,
        )?;

        Ok(RetrieveRenderedResponse {
            identifier: id,
            content: rendered,
            media_type,
        })
    }

    /// Decoded attribute dataset of one instance.
    pub async fn retrieve_instance_metadata(
        &self,
        instance: &InstanceIdentifier,
        want_original: bool,
    ) -> CoreResult<Value> {
        let metadata = self.lookup(instance).await?;
        self.read_metadata(&metadata, want_original).await
    }

    /// Decoded attribute datasets of every instance in a study, ordered by identifier.
    pub async fn retrieve_study_metadata(
        &self,
        partition_key: PartitionKey,
        study_instance_uid: &DicomUid,
        want_original: bool,
    ) -> CoreResult<Vec<Value>> {
        let instances = self
            .index
            .list_study_instances(partition_key, study_instance_uid)
            .await?;
        if instances.is_empty() {
            return Err(CoreError::StudyNotFound {
                partition_key,
                study_instance_uid: study_instance_uid.clone(),
            });
        }

        let mut out = Vec::with_capacity(instances.len());
        for metadata in &instances {
            out.push(self.read_metadata(metadata, want_original).await?);
        }
        Ok(out)
    }

    async fn read_metadata(&self, metadata: &InstanceMetadata, want_original: bool) -> CoreResult<Value> {
        let version: Version = resolve_version(metadata, want_original);
        let id = metadata.instance().at_version(version);
        let content = self.read_checked(&id, PayloadKind::Metadata).await?;
        Ok(self.codec.read_metadata(&content)?)
    }
}
