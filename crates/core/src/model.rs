//! Index-side data model for stored instances.

use dicomstore_files::ByteRange;
use dicomstore_types::{InstanceIdentifier, Version, VersionedInstanceIdentifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version bookkeeping and storage details the index keeps for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceProperties {
    /// The first version ever published for this instance, set on the first update and then
    /// never changed. `None` until the instance has been updated.
    #[serde(default)]
    pub original_version: Option<Version>,

    /// A version reserved by an in-flight update that has not been published yet.
    #[serde(default)]
    pub new_version: Option<Version>,

    /// Transfer syntax of the stored (current) version.
    pub transfer_syntax_uid: String,

    /// Byte ranges of each frame, per stored version. Instances without pixel data, or
    /// versions stored before ranges were known, have no entry.
    #[serde(default)]
    pub frame_ranges: BTreeMap<Version, Vec<ByteRange>>,
}

impl InstanceProperties {
    pub fn new(transfer_syntax_uid: impl Into<String>) -> Self {
        Self {
            original_version: None,
            new_version: None,
            transfer_syntax_uid: transfer_syntax_uid.into(),
            frame_ranges: BTreeMap::new(),
        }
    }

    /// Frame ranges recorded for `version`, if any.
    pub fn frame_ranges_for(&self, version: Version) -> Option<&[ByteRange]> {
        self.frame_ranges
            .get(&version)
            .filter(|ranges| !ranges.is_empty())
            .map(Vec::as_slice)
    }
}

/// What the index returns for an instance: its current published identifier plus properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    pub identifier: VersionedInstanceIdentifier,
    pub properties: InstanceProperties,
}

impl InstanceMetadata {
    pub fn instance(&self) -> &InstanceIdentifier {
        &self.identifier.instance
    }

    /// The current published version.
    pub fn current_version(&self) -> Version {
        self.identifier.version
    }
}
