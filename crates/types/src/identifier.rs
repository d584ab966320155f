use crate::{DicomUid, UidError, UidResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical version number of a stored instance.
///
/// Versions for one logical instance are strictly increasing and never reused.
pub type Version = u64;

/// Data partition an instance belongs to.
///
/// Partition keys are positive integers; partition `1` is the default partition used when a
/// caller does not name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PartitionKey(u32);

impl PartitionKey {
    /// The partition used when none is specified.
    pub const DEFAULT: PartitionKey = PartitionKey(1);

    /// Creates a partition key, rejecting zero, negative and out-of-range values.
    pub fn new(value: i64) -> UidResult<Self> {
        match u32::try_from(value) {
            Ok(v) if v > 0 => Ok(Self(v)),
            _ => Err(UidError::InvalidPartition(value)),
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for PartitionKey {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for PartitionKey {
    type Error = UidError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        PartitionKey::new(value)
    }
}

impl From<PartitionKey> for i64 {
    fn from(key: PartitionKey) -> Self {
        i64::from(key.0)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical address of an instance: partition plus the study/series/instance UID hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceIdentifier {
    pub partition_key: PartitionKey,
    pub study_instance_uid: DicomUid,
    pub series_instance_uid: DicomUid,
    pub sop_instance_uid: DicomUid,
}

impl InstanceIdentifier {
    pub fn new(
        partition_key: PartitionKey,
        study_instance_uid: DicomUid,
        series_instance_uid: DicomUid,
        sop_instance_uid: DicomUid,
    ) -> Self {
        Self {
            partition_key,
            study_instance_uid,
            series_instance_uid,
            sop_instance_uid,
        }
    }

    /// Parses the three UIDs from strings, validating each.
    pub fn parse(
        partition_key: PartitionKey,
        study_instance_uid: &str,
        series_instance_uid: &str,
        sop_instance_uid: &str,
    ) -> UidResult<Self> {
        Ok(Self::new(
            partition_key,
            DicomUid::new(study_instance_uid)?,
            DicomUid::new(series_instance_uid)?,
            DicomUid::new(sop_instance_uid)?,
        ))
    }

    /// Pins this logical identifier to one physical version.
    pub fn at_version(&self, version: Version) -> VersionedInstanceIdentifier {
        VersionedInstanceIdentifier {
            instance: self.clone(),
            version,
        }
    }
}

impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.partition_key,
            self.study_instance_uid,
            self.series_instance_uid,
            self.sop_instance_uid
        )
    }
}

/// Address of one physical, immutable blob: a logical instance at a specific version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionedInstanceIdentifier {
    #[serde(flatten)]
    pub instance: InstanceIdentifier,
    pub version: Version,
}

impl VersionedInstanceIdentifier {
    pub fn instance(&self) -> &InstanceIdentifier {
        &self.instance
    }

    pub fn version(&self) -> Version {
        self.version
    }
}

impl fmt::Display for VersionedInstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.instance, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InstanceIdentifier {
        InstanceIdentifier::parse(PartitionKey::DEFAULT, "1.2.3", "1.2.3.4", "1.2.3.4.5").unwrap()
    }

    #[test]
    fn test_partition_key_rejects_non_positive() {
        assert_eq!(PartitionKey::new(0), Err(UidError::InvalidPartition(0)));
        assert_eq!(PartitionKey::new(-4), Err(UidError::InvalidPartition(-4)));
        assert_eq!(PartitionKey::new(7).unwrap().value(), 7);
    }

    #[test]
    fn test_partition_key_serde_validates() {
        assert!(serde_json::from_str::<PartitionKey>("0").is_err());
        let key: PartitionKey = serde_json::from_str("3").unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "3");
    }

    #[test]
    fn test_versioned_identifier_flattens_instance_fields() {
        let versioned = sample().at_version(4);
        let json = serde_json::to_value(&versioned).unwrap();
        assert_eq!(json["study_instance_uid"], "1.2.3");
        assert_eq!(json["version"], 4);

        let back: VersionedInstanceIdentifier = serde_json::from_value(json).unwrap();
        assert_eq!(back, versioned);
    }

    #[test]
    fn test_display_includes_version() {
        assert_eq!(sample().at_version(2).to_string(), "1/1.2.3/1.2.3.4/1.2.3.4.5@v2");
    }
}
