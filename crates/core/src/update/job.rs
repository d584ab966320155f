//! Durable state of an update operation.
//!
//! ```text
//! NotStarted ──► Running ──► Completed | CompletedWithErrors | Failed | Canceled
//!      └──────────────────► Canceled
//! ```
//!
//! Terminal states have no outgoing transitions, and each study moves from `Pending` to a
//! final state at most once.

use super::input::UpdateOperationInput;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use dicomstore_types::{DicomUid, OperationId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    NotStarted,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Canceled,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::NotStarted => "not_started",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::CompletedWithErrors => "completed_with_errors",
            OperationStatus::Failed => "failed",
            OperationStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::NotStarted | OperationStatus::Running)
    }

    fn can_transition_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        match (self, next) {
            (NotStarted, Running) | (NotStarted, Canceled) => true,
            (Running, Completed)
            | (Running, CompletedWithErrors)
            | (Running, Failed)
            | (Running, Canceled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyState {
    Pending,
    Updated,
    NotFound,
    Failed,
}

impl StudyState {
    pub fn as_str(self) -> &'static str {
        match self {
            StudyState::Pending => "pending",
            StudyState::Updated => "updated",
            StudyState::NotFound => "not_found",
            StudyState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyProgress {
    pub study_instance_uid: DicomUid,
    pub state: StudyState,
    pub instances_updated: u32,
    pub instances_unchanged: u32,
    pub instances_failed: u32,
    /// First instance error seen in this study.
    pub error: Option<String>,
}

impl StudyProgress {
    pub fn pending(study_instance_uid: DicomUid) -> Self {
        Self {
            study_instance_uid,
            state: StudyState::Pending,
            instances_updated: 0,
            instances_unchanged: 0,
            instances_failed: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateJob {
    pub operation_id: OperationId,
    pub input: UpdateOperationInput,
    pub status: OperationStatus,
    pub studies: Vec<StudyProgress>,
    /// Job-fatal failures so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateJob {
    pub fn new(operation_id: OperationId, input: UpdateOperationInput) -> Self {
        let now = Utc::now();
        let studies = input
            .study_instance_uids()
            .iter()
            .cloned()
            .map(StudyProgress::pending)
            .collect();
        Self {
            operation_id,
            input,
            status: OperationStatus::NotStarted,
            studies,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: OperationStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "operation {} cannot move from {:?} to {:?}",
                self.operation_id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Marks the job running. Resuming an already running job is allowed.
    pub fn start(&mut self) -> CoreResult<()> {
        if self.status == OperationStatus::Running {
            return Ok(());
        }
        self.transition(OperationStatus::Running)
    }

    pub fn cancel(&mut self) -> CoreResult<()> {
        self.transition(OperationStatus::Canceled)
    }

    /// Records the outcome of one study. Fails if the study already has an outcome.
    pub fn record_study(&mut self, progress: StudyProgress) -> CoreResult<()> {
        let entry = self
            .studies
            .iter_mut()
            .find(|s| s.study_instance_uid == progress.study_instance_uid)
            .ok_or_else(|| {
                CoreError::InvalidInput(format!(
                    "study {} is not part of operation {}",
                    progress.study_instance_uid, self.operation_id
                ))
            })?;

        if entry.state != StudyState::Pending {
            return Err(CoreError::Conflict(format!(
                "study {} already finished as {:?}",
                entry.study_instance_uid, entry.state
            )));
        }
        if progress.state == StudyState::Pending {
            return Ok(());
        }

        *entry = progress;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Studies still to be processed, in input order.
    pub fn pending_studies(&self) -> Vec<DicomUid> {
        self.studies
            .iter()
            .filter(|s| s.state == StudyState::Pending)
            .map(|s| s.study_instance_uid.clone())
            .collect()
    }

    /// Moves a running job whose studies are all finished to its completed state.
    pub fn complete(&mut self) -> CoreResult<()> {
        if self.studies.iter().any(|s| s.state == StudyState::Pending) {
            return Err(CoreError::Conflict(format!(
                "operation {} still has pending studies",
                self.operation_id
            )));
        }
        let with_errors = self
            .studies
            .iter()
            .any(|s| matches!(s.state, StudyState::Failed | StudyState::NotFound));
        self.transition(if with_errors {
            OperationStatus::CompletedWithErrors
        } else {
            OperationStatus::Completed
        })
    }

    /// Records a job-fatal failure. The job stays running (to be resumed) until
    /// `max_attempts` failures have accumulated, then fails.
    pub fn record_fatal_error(&mut self, error: String, max_attempts: u32) -> CoreResult<()> {
        self.attempts += 1;
        self.last_error = Some(error);
        self.updated_at = Utc::now();
        if self.attempts >= max_attempts {
            self.transition(OperationStatus::Failed)?;
        }
        Ok(())
    }
}
