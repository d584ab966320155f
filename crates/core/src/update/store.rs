//! Durable storage of update jobs.
//!
//! [`JsonOperationStore`] keeps one `<operation id>.json` record per job. Cancellation
//! requests are separate `<operation id>.cancel` marker files so that a request made while the
//! orchestrator holds the job in memory is never overwritten by its next save.

use super::job::UpdateJob;
use crate::persist::{list_files, read_optional, write_atomic};
use crate::{CoreError, CoreResult};
use async_trait::async_trait;
use dicomstore_types::OperationId;
use std::path::{Path, PathBuf};
use tokio::fs;

const JOB_EXTENSION: &str = "json";
const CANCEL_EXTENSION: &str = "cancel";

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Persists a new job. Fails with `Conflict` if the id is taken.
    async fn create(&self, job: &UpdateJob) -> CoreResult<()>;

    async fn get(&self, id: OperationId) -> CoreResult<Option<UpdateJob>>;

    async fn save(&self, job: &UpdateJob) -> CoreResult<()>;

    /// Jobs that are not started or still running, oldest first.
    async fn list_unfinished(&self) -> CoreResult<Vec<UpdateJob>>;

    async fn request_cancel(&self, id: OperationId) -> CoreResult<()>;

    async fn is_cancel_requested(&self, id: OperationId) -> CoreResult<bool>;
}

#[derive(Debug, Clone)]
pub struct JsonOperationStore {
    root_directory: PathBuf,
}

impl JsonOperationStore {
    pub fn create(root_directory: &Path) -> CoreResult<Self> {
        std::fs::create_dir_all(root_directory)?;
        Ok(Self {
            root_directory: root_directory.to_path_buf(),
        })
    }

    fn job_path(&self, id: OperationId) -> PathBuf {
        self.root_directory.join(format!("{}.{}", id, JOB_EXTENSION))
    }

    fn cancel_path(&self, id: OperationId) -> PathBuf {
        self.root_directory.join(format!("{}.{}", id, CANCEL_EXTENSION))
    }

    async fn read_job(path: &Path) -> CoreResult<Option<UpdateJob>> {
        read_optional(path)
            .await?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(CoreError::Deserialization))
            .transpose()
    }
}

#[async_trait]
impl OperationStore for JsonOperationStore {
    async fn create(&self, job: &UpdateJob) -> CoreResult<()> {
        let path = self.job_path(job.operation_id);
        if fs::try_exists(&path).await? {
            return Err(CoreError::Conflict(format!(
                "operation {} already exists",
                job.operation_id
            )));
        }
        self.save(job).await
    }

    async fn get(&self, id: OperationId) -> CoreResult<Option<UpdateJob>> {
        Self::read_job(&self.job_path(id)).await
    }

    async fn save(&self, job: &UpdateJob) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(job).map_err(CoreError::Serialization)?;
        write_atomic(&self.job_path(job.operation_id), &bytes).await?;
        Ok(())
    }

    async fn list_unfinished(&self) -> CoreResult<Vec<UpdateJob>> {
        let mut jobs = Vec::new();
        for path in list_files(&self.root_directory, JOB_EXTENSION).await? {
            match Self::read_job(&path).await {
                Ok(Some(job)) if !job.status.is_terminal() => jobs.push(job),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job record");
                }
            }
        }
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.operation_id.cmp(&b.operation_id))
        });
        Ok(jobs)
    }

    async fn request_cancel(&self, id: OperationId) -> CoreResult<()> {
        write_atomic(&self.cancel_path(id), b"").await?;
        Ok(())
    }

    async fn is_cancel_requested(&self, id: OperationId) -> CoreResult<bool> {
        Ok(fs::try_exists(self.cancel_path(id)).await?)
    }
}
