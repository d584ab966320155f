use crate::constants::MAX_UPDATE_STUDIES;
use crate::{CoreError, CoreResult};
use dicomstore_types::{DicomUid, PartitionKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Metadata patch applied to every instance of an update: attribute keyword to new value,
/// with `null` removing the attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeDataset(Map<String, Value>);

impl ChangeDataset {
    pub fn new(changes: Map<String, Value>) -> CoreResult<Self> {
        if changes.is_empty() {
            return Err(CoreError::InvalidInput(
                "change dataset must contain at least one attribute".into(),
            ));
        }
        Ok(Self(changes))
    }

    /// Parses a JSON object.
    pub fn from_json_str(input: &str) -> CoreResult<Self> {
        match serde_json::from_str::<Value>(input) {
            Ok(Value::Object(changes)) => Self::new(changes),
            Ok(_) => Err(CoreError::InvalidInput(
                "change dataset must be a JSON object".into(),
            )),
            Err(e) => Err(CoreError::InvalidInput(format!(
                "change dataset is not valid JSON: {}",
                e
            ))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Validated input of a bulk update. Immutable once the job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOperationInput {
    partition_key: PartitionKey,
    study_instance_uids: Vec<DicomUid>,
    change_dataset: ChangeDataset,
}

impl UpdateOperationInput {
    /// Deduplicates `study_instance_uids` (keeping first occurrences) and enforces the study
    /// limit.
    pub fn new(
        partition_key: PartitionKey,
        study_instance_uids: Vec<DicomUid>,
        change_dataset: ChangeDataset,
    ) -> CoreResult<Self> {
        let mut seen = HashSet::new();
        let study_instance_uids: Vec<DicomUid> = study_instance_uids
            .into_iter()
            .filter(|uid| seen.insert(uid.clone()))
            .collect();

        if study_instance_uids.is_empty() {
            return Err(CoreError::InvalidInput(
                "at least one study must be named".into(),
            ));
        }
        if study_instance_uids.len() > MAX_UPDATE_STUDIES {
            return Err(CoreError::InvalidInput(format!(
                "at most {} studies can be updated in one operation, got {}",
                MAX_UPDATE_STUDIES,
                study_instance_uids.len()
            )));
        }

        Ok(Self {
            partition_key,
            study_instance_uids,
            change_dataset,
        })
    }

    pub fn partition_key(&self) -> PartitionKey {
        self.partition_key
    }

    pub fn study_instance_uids(&self) -> &[DicomUid] {
        &self.study_instance_uids
    }

    pub fn change_dataset(&self) -> &ChangeDataset {
        &self.change_dataset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> DicomUid {
        DicomUid::new(s).unwrap()
    }

    fn changes() -> ChangeDataset {
        ChangeDataset::from_json_str(r#"{"PatientName":"New^PatientName"}"#).unwrap()
    }

    #[test]
    fn test_studies_are_deduplicated_in_order() {
        let input = UpdateOperationInput::new(
            PartitionKey::DEFAULT,
            vec![uid("1.2"), uid("1.1"), uid("1.2"), uid("1.3")],
            changes(),
        )
        .unwrap();
        assert_eq!(
            input.study_instance_uids(),
            &[uid("1.2"), uid("1.1"), uid("1.3")]
        );
    }

    #[test]
    fn test_study_count_limits() {
        assert!(UpdateOperationInput::new(PartitionKey::DEFAULT, vec![], changes()).is_err());

        let many: Vec<DicomUid> = (1..=MAX_UPDATE_STUDIES + 1)
            .map(|i| uid(&format!("1.{}", i)))
            .collect();
        assert!(UpdateOperationInput::new(PartitionKey::DEFAULT, many.clone(), changes()).is_err());
        assert!(UpdateOperationInput::new(
            PartitionKey::DEFAULT,
            many[..MAX_UPDATE_STUDIES].to_vec(),
            changes()
        )
        .is_ok());
    }

    #[test]
    fn test_change_dataset_must_be_object() {
        assert!(ChangeDataset::from_json_str("[1, 2]").is_err());
        assert!(ChangeDataset::from_json_str("{}").is_err());
        assert!(ChangeDataset::from_json_str("{not json").is_err());
        assert!(ChangeDataset::from_json_str(r#"{"PatientID": null}"#).is_ok());
    }
}
