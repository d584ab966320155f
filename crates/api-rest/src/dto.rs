//! Request and response bodies of the REST API.

use chrono::{DateTime, Utc};
use dicomstore_core::model::InstanceMetadata;
use dicomstore_core::update::{StudyProgress, UpdateJob};
use dicomstore_types::OperationId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// The stored instance's identity and version.
#[derive(Debug, Serialize, ToSchema)]
pub struct StoredInstanceRes {
    pub partition_key: u32,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    pub version: u64,
    pub transfer_syntax_uid: String,
}

impl From<&InstanceMetadata> for StoredInstanceRes {
    fn from(metadata: &InstanceMetadata) -> Self {
        let instance = metadata.instance();
        Self {
            partition_key: instance.partition_key.value(),
            study_instance_uid: instance.study_instance_uid.to_string(),
            series_instance_uid: instance.series_instance_uid.to_string(),
            sop_instance_uid: instance.sop_instance_uid.to_string(),
            version: metadata.identifier.version(),
            transfer_syntax_uid: metadata.properties.transfer_syntax_uid.clone(),
        }
    }
}

/// Body of `POST /studies/$bulkUpdate`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkUpdateReq {
    /// Studies to update; duplicates are ignored
    pub study_instance_uids: Vec<String>,
    /// Attribute keyword to new value; `null` removes the attribute
    #[schema(value_type = Object)]
    pub change_dataset: serde_json::Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OperationAcceptedRes {
    pub operation_id: String,
    /// Where to poll for status
    pub href: String,
}

impl OperationAcceptedRes {
    pub fn new(operation_id: OperationId) -> Self {
        Self {
            href: format!("/operations/{}", operation_id),
            operation_id: operation_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StudyProgressRes {
    pub study_instance_uid: String,
    /// One of `pending`, `updated`, `not_found`, `failed`
    pub state: String,
    pub instances_updated: u32,
    pub instances_unchanged: u32,
    pub instances_failed: u32,
    pub error: Option<String>,
}

impl From<&StudyProgress> for StudyProgressRes {
    fn from(progress: &StudyProgress) -> Self {
        Self {
            study_instance_uid: progress.study_instance_uid.to_string(),
            state: progress.state.as_str().to_string(),
            instances_updated: progress.instances_updated,
            instances_unchanged: progress.instances_unchanged,
            instances_failed: progress.instances_failed,
            error: progress.error.clone(),
        }
    }
}

/// Status of an update operation.
#[derive(Debug, Serialize, ToSchema)]
pub struct OperationRes {
    pub operation_id: String,
    /// One of `not_started`, `running`, `completed`, `completed_with_errors`, `failed`,
    /// `canceled`
    pub status: String,
    pub partition_key: u32,
    pub studies: Vec<StudyProgressRes>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&UpdateJob> for OperationRes {
    fn from(job: &UpdateJob) -> Self {
        Self {
            operation_id: job.operation_id.to_string(),
            status: job.status.as_str().to_string(),
            partition_key: job.input.partition_key().value(),
            studies: job.studies.iter().map(StudyProgressRes::from).collect(),
            attempts: job.attempts,
            last_error: job.last_error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
