//! Identifiers for long-running operations.

use crate::{UidError, UidResult};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Canonical operation identifier (32 lowercase hex characters, no hyphens).
///
/// Once constructed the contained UUID is in canonical form, so it can be used directly as a
/// file name for persisted job records and as a path segment in status URLs.
///
/// # Construction
/// - [`OperationId::new`] allocates a fresh random identifier for a submitted operation.
/// - [`OperationId::parse`] validates an externally supplied identifier. Non-canonical values
///   (uppercase, hyphenated, wrong length, non-hex) are rejected rather than normalised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(Uuid);

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationId {
    /// Generates a new random operation identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates and parses an identifier that must already be in canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`UidError::InvalidOperationId`] if `input` is not canonical.
    pub fn parse(input: &str) -> UidResult<Self> {
        if !Self::is_canonical(input) {
            return Err(UidError::InvalidOperationId(input.to_owned()));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|_| UidError::InvalidOperationId(input.to_owned()))
    }

    /// Returns true if `input` is 32 lowercase hex characters.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for OperationId {
    type Err = UidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationId::parse(s)
    }
}

impl serde::Serialize for OperationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for OperationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        OperationId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_canonical_id() {
        let id = OperationId::new();
        assert!(OperationId::is_canonical(&id.to_string()));
    }

    #[test]
    fn test_parse_round_trips_canonical() {
        let canonical = "550e8400e29b41d4a716446655440000";
        assert_eq!(OperationId::parse(canonical).unwrap().to_string(), canonical);
    }

    #[test]
    fn test_parse_rejects_hyphenated_and_uppercase() {
        assert!(OperationId::parse("550e8400-e29b-41d4-a716-446655440000").is_err());
        assert!(OperationId::parse("550E8400E29B41D4A716446655440000").is_err());
    }
}
