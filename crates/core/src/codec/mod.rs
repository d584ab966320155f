//! Imaging codec and renderer seams.
//!
//! The core never interprets instance bytes itself. Reading identity, transcoding, frame
//! extraction, metadata edits and rendering all go through [`DicomCodec`] and [`Renderer`],
//! so a production codec can be dropped in without touching the retrieve or update paths.
//! [`EnvelopeCodec`] is the reference implementation used by the binaries and tests.

mod envelope;
mod negotiate;

pub use envelope::EnvelopeCodec;
pub use negotiate::{negotiate, AcceptHeader, TransferSyntaxRequest};

use dicomstore_files::ByteRange;
use dicomstore_types::DicomUid;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed instance: {0}")]
    Malformed(String),

    #[error("cannot transcode from {source_uid} to {target_uid}")]
    UnsupportedTransferSyntax {
        source_uid: String,
        target_uid: String,
    },

    #[error("frame {requested} out of range; the instance has {frame_count} frame(s)")]
    FrameOutOfRange { requested: u32, frame_count: u32 },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("change rejected: {0}")]
    InvalidChange(String),

    #[error("rendering failed: {0}")]
    Render(String),
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Identity attributes read from an instance payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceUids {
    pub study_instance_uid: DicomUid,
    pub series_instance_uid: DicomUid,
    pub sop_instance_uid: DicomUid,
}

/// Binary codec for stored instances.
///
/// Frame numbers are 1-based throughout.
pub trait DicomCodec: Send + Sync {
    fn read_instance_uids(&self, content: &[u8]) -> CodecResult<InstanceUids>;

    fn transfer_syntax(&self, content: &[u8]) -> CodecResult<String>;

    /// Re-encodes `content` in `target_uid`. Returns the input unchanged when it is already
    /// encoded in the target syntax.
    fn transcode(&self, content: &[u8], target_uid: &str) -> CodecResult<Vec<u8>>;

    fn frame_count(&self, content: &[u8]) -> CodecResult<u32>;

    fn extract_frame(&self, content: &[u8], frame: u32) -> CodecResult<Vec<u8>>;

    /// Byte ranges of every frame within `content`, in frame order. Empty when frames are
    /// not stored contiguously.
    fn frame_ranges(&self, content: &[u8]) -> CodecResult<Vec<ByteRange>>;

    /// Decoded attribute dataset as a JSON object keyed by attribute keyword.
    fn read_metadata(&self, content: &[u8]) -> CodecResult<Value>;

    /// Applies a metadata patch. `null` values remove the attribute.
    ///
    /// Must be deterministic: the same content and changes always give the same bytes, and a
    /// patch that changes nothing returns the input bytes.
    fn apply_changes(&self, content: &[u8], changes: &Map<String, Value>) -> CodecResult<Vec<u8>>;
}

/// Produces consumer image formats from stored frames.
pub trait Renderer: Send + Sync {
    fn supported_media_types(&self) -> &[&'static str];

    /// Renders `frame` (1-based) as `media_type`. `quality` (1-100) applies to lossy formats.
    fn render(
        &self,
        content: &[u8],
        frame: u32,
        media_type: &str,
        quality: u8,
    ) -> CodecResult<Vec<u8>>;
}
