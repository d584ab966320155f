//! Constants used throughout the dicomstore core crate.
//!
//! Directory names, default limits and the well-known identifiers the retrieve pipeline
//! negotiates with, kept in one place so the binaries and the core agree on them.

/// Default directory for all persisted state when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "dicom_data";

/// Directory name (under the data directory) for instance blobs.
pub const BLOBS_DIR_NAME: &str = "blobs";

/// Directory name (under the data directory) for index records.
pub const INDEX_DIR_NAME: &str = "index";

/// Directory name (under the data directory) for update job records.
pub const OPERATIONS_DIR_NAME: &str = "operations";

/// Default maximum payload size materialised in memory for a single retrieve or render.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Default interval at which the update worker looks for unfinished jobs.
pub const DEFAULT_WORKER_POLL_SECS: u64 = 5;

/// Default number of job-fatal failures tolerated before an update job is marked failed.
pub const DEFAULT_MAX_JOB_ATTEMPTS: u32 = 3;

/// Maximum number of studies a single update operation may name.
pub const MAX_UPDATE_STUDIES: usize = 50;

/// Transfer syntax value meaning "return the instance as stored".
pub const WILDCARD_TRANSFER_SYNTAX: &str = "*";

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";

/// Media type of whole-instance payloads.
pub const DICOM_MEDIA_TYPE: &str = "application/dicom";

/// Media type of raw frame payloads.
pub const OCTET_STREAM_MEDIA_TYPE: &str = "application/octet-stream";

/// Media type of decoded metadata.
pub const DICOM_JSON_MEDIA_TYPE: &str = "application/dicom+json";

/// Media type produced by the reference renderer.
pub const PGM_MEDIA_TYPE: &str = "image/x-portable-graymap";

/// Attribute keywords the codec reads instance identity from.
pub const STUDY_INSTANCE_UID: &str = "StudyInstanceUID";
pub const SERIES_INSTANCE_UID: &str = "SeriesInstanceUID";
pub const SOP_INSTANCE_UID: &str = "SOPInstanceUID";
