/// File extension of stored instance blobs.
pub const BLOB_EXTENSION: &str = "dcm";

/// Media type reported for stored instance blobs.
pub const DICOM_MEDIA_TYPE: &str = "application/dicom";

/// Suffix of in-progress writes. Files with this suffix are never valid versions.
pub(crate) const TEMP_SUFFIX: &str = "tmp";
