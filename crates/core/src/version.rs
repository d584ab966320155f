//! Version resolution for retrieve requests.

use crate::model::InstanceMetadata;
use dicomstore_types::Version;

/// Picks the stored version a retrieve request should read.
///
/// With `want_original` set, the first published version is returned when the instance has
/// been updated; otherwise (and for never-updated instances) the current published version.
/// A pending reservation is never returned: only published versions are readable.
pub fn resolve_version(metadata: &InstanceMetadata, want_original: bool) -> Version {
    match metadata.properties.original_version {
        Some(original) if want_original => original,
        _ => metadata.identifier.version,
    }
}
