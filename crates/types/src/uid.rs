use crate::{UidError, UidResult};
use std::fmt;
use std::str::FromStr;

const MAX_UID_LENGTH: usize = 64;

/// A DICOM unique identifier.
///
/// The wrapped string is guaranteed to be a dotted numeric UID: one or more components of ASCII
/// digits separated by single dots, no component with a leading zero unless it is exactly `0`,
/// and no more than 64 characters overall. Surrounding whitespace (and the trailing NUL padding
/// some encoders leave behind) is trimmed during construction.
///
/// Because the character set is restricted to digits and dots, a `DicomUid` is always safe to
/// use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DicomUid(String);

impl DicomUid {
    /// Creates a new `DicomUid` from the given input.
    ///
    /// # Errors
    ///
    /// Returns [`UidError::Empty`] for blank input, [`UidError::TooLong`] when the trimmed value
    /// exceeds 64 characters, and [`UidError::Malformed`] otherwise.
    pub fn new(input: impl AsRef<str>) -> UidResult<Self> {
        let trimmed = input.as_ref().trim().trim_end_matches('\0');
        if trimmed.is_empty() {
            return Err(UidError::Empty);
        }
        if trimmed.len() > MAX_UID_LENGTH {
            return Err(UidError::TooLong(trimmed.to_owned()));
        }
        if !trimmed.split('.').all(is_valid_component) {
            return Err(UidError::Malformed(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_component(component: &str) -> bool {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    component == "0" || !component.starts_with('0')
}

impl fmt::Display for DicomUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DicomUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for DicomUid {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DicomUid::new(s)
    }
}

impl serde::Serialize for DicomUid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for DicomUid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DicomUid::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_well_formed_uid() {
        let uid = DicomUid::new("1.2.840.10008.1.2.1").unwrap();
        assert_eq!(uid.as_str(), "1.2.840.10008.1.2.1");
    }

    #[test]
    fn test_trims_whitespace_and_nul_padding() {
        let uid = DicomUid::new(" 1.2.3\0").unwrap();
        assert_eq!(uid.as_str(), "1.2.3");
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(DicomUid::new("   "), Err(UidError::Empty));
    }

    #[test]
    fn test_rejects_path_traversal() {
        assert!(matches!(DicomUid::new("../1.2"), Err(UidError::Malformed(_))));
        assert!(matches!(DicomUid::new("1/2"), Err(UidError::Malformed(_))));
    }

    #[test]
    fn test_rejects_empty_component_and_leading_zero() {
        assert!(matches!(DicomUid::new("1..2"), Err(UidError::Malformed(_))));
        assert!(matches!(DicomUid::new("1.02"), Err(UidError::Malformed(_))));
        assert!(DicomUid::new("1.0.2").is_ok());
    }

    #[test]
    fn test_rejects_too_long() {
        let long = vec!["1"; 40].join(".");
        assert!(matches!(DicomUid::new(&long), Err(UidError::TooLong(_))));
    }

    #[test]
    fn test_serde_rejects_invalid_uid() {
        let ok: DicomUid = serde_json::from_str("\"1.2.3\"").unwrap();
        assert_eq!(ok.as_str(), "1.2.3");
        assert!(serde_json::from_str::<DicomUid>("\"abc\"").is_err());
    }
}
