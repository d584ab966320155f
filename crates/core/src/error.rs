use crate::codec::CodecError;
use dicomstore_files::FilesError;
use dicomstore_types::{
    DicomUid, InstanceIdentifier, OperationId, PartitionKey, UidError, VersionedInstanceIdentifier,
};

/// Which request tripped the payload size guard.
///
/// Render and retrieve requests report different messages so that clients can pick a
/// different strategy (a frame fetch, or a lower resolution rendering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Render,
    Retrieve,
    /// Metadata is decoded from the whole instance, so there is no smaller read to suggest.
    Metadata,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{message}")]
    PayloadTooLarge {
        kind: PayloadKind,
        max_bytes: u64,
        message: String,
    },

    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceIdentifier),

    #[error("study not found: {partition_key}/{study_instance_uid}")]
    StudyNotFound {
        partition_key: PartitionKey,
        study_instance_uid: DicomUid,
    },

    #[error("instance version not found: {0}")]
    VersionNotFound(VersionedInstanceIdentifier),

    #[error("frame {requested} is out of range; the instance has {frame_count} frame(s)")]
    FrameOutOfRange { requested: u32, frame_count: u32 },

    #[error("transcoding from transfer syntax {source_uid} to {target_uid} is not supported")]
    UnsupportedTransferSyntax {
        source_uid: String,
        target_uid: String,
    },

    #[error("none of the requested media types are supported: {0}")]
    UnsupportedAcceptType(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("orchestration failed: {0}")]
    OrchestrationFailed(String),

    #[error("codec error: {0}")]
    Codec(CodecError),

    #[error("file store error: {0}")]
    Files(#[from] FilesError),

    #[error("invalid identifier: {0}")]
    Uid(#[from] UidError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),

    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
}

impl CoreError {
    /// Builds the size-guard failure, selecting the message by request kind.
    pub fn payload_too_large(kind: PayloadKind, max_bytes: u64) -> Self {
        let message = match kind {
            PayloadKind::Render => format!(
                "the requested instance is too large to render; rendering is supported for \
                 instances up to {} bytes",
                max_bytes
            ),
            PayloadKind::Retrieve => format!(
                "the requested instance is too large to retrieve; the maximum supported size is \
                 {} bytes, retrieve individual frames instead",
                max_bytes
            ),
            PayloadKind::Metadata => format!(
                "the requested instance is too large to read its metadata; the maximum supported \
                 size is {} bytes",
                max_bytes
            ),
        };
        CoreError::PayloadTooLarge {
            kind,
            max_bytes,
            message,
        }
    }

    /// Maps a blob error for a specific version, turning a missing blob into
    /// [`CoreError::VersionNotFound`].
    pub fn from_files(error: FilesError, id: &VersionedInstanceIdentifier) -> Self {
        match error {
            FilesError::NotFound(_) => CoreError::VersionNotFound(id.clone()),
            other => CoreError::Files(other),
        }
    }

    /// Whether this error must halt an update job rather than being recorded against a study.
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::IndexUnavailable(_)
                | CoreError::OrchestrationFailed(_)
                | CoreError::Io(_)
                | CoreError::Serialization(_)
                | CoreError::Deserialization(_)
        )
    }
}

impl From<CodecError> for CoreError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::UnsupportedTransferSyntax {
                source_uid,
                target_uid,
            } => CoreError::UnsupportedTransferSyntax {
                source_uid,
                target_uid,
            },
            CodecError::FrameOutOfRange {
                requested,
                frame_count,
            } => CoreError::FrameOutOfRange {
                requested,
                frame_count,
            },
            CodecError::UnsupportedMediaType(media_type) => {
                CoreError::UnsupportedAcceptType(media_type)
            }
            other => CoreError::Codec(other),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_too_large_messages_differ_by_kind() {
        let render = CoreError::payload_too_large(PayloadKind::Render, 1024).to_string();
        let retrieve = CoreError::payload_too_large(PayloadKind::Retrieve, 1024).to_string();

        assert_ne!(render, retrieve);
        assert!(render.contains("render"));
        assert!(render.contains("1024"));
        assert!(retrieve.contains("retrieve"));
        assert!(retrieve.contains("1024"));

        let metadata = CoreError::payload_too_large(PayloadKind::Metadata, 1024).to_string();
        assert!(metadata.contains("metadata"));
        assert!(metadata.contains("1024"));
        assert!(!metadata.contains("frames"));
    }

    #[test]
    fn test_codec_errors_map_to_taxonomy() {
        let mapped: CoreError = CodecError::FrameOutOfRange {
            requested: 4,
            frame_count: 2,
        }
        .into();
        assert!(matches!(
            mapped,
            CoreError::FrameOutOfRange {
                requested: 4,
                frame_count: 2
            }
        ));

        let mapped: CoreError = CodecError::Malformed("bad header".into()).into();
        assert!(matches!(mapped, CoreError::Codec(_)));
    }

    #[test]
    fn test_job_fatal_classification() {
        assert!(CoreError::IndexUnavailable("down".into()).is_job_fatal());
        assert!(!CoreError::Conflict("raced".into()).is_job_fatal());
        assert!(!CoreError::Codec(CodecError::InvalidChange("uid".into())).is_job_fatal());
    }
}
