use super::input::UpdateOperationInput;
use super::job::{OperationStatus, UpdateJob};
use super::store::OperationStore;
use crate::locks::KeyedLocks;
use crate::{CoreError, CoreResult};
use dicomstore_types::OperationId;
use std::sync::Arc;
use tokio::sync::Notify;

/// Entry point for submitting, inspecting and canceling update operations.
///
/// Submitted jobs are picked up by the [`UpdateWorker`](super::UpdateWorker) sharing the same
/// wake signal.
#[derive(Clone)]
pub struct OperationsService {
    operations: Arc<dyn OperationStore>,
    operation_locks: KeyedLocks<OperationId>,
    wake: Arc<Notify>,
}

impl OperationsService {
    pub fn new(
        operations: Arc<dyn OperationStore>,
        operation_locks: KeyedLocks<OperationId>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            operations,
            operation_locks,
            wake,
        }
    }

    /// Persists a new update job and wakes the worker.
    pub async fn submit_update(&self, input: UpdateOperationInput) -> CoreResult<OperationId> {
        let job = UpdateJob::new(OperationId::new(), input);
        self.operations.create(&job).await?;
        tracing::info!(
            operation = %job.operation_id,
            studies = job.studies.len(),
            "update operation submitted"
        );
        self.wake.notify_one();
        Ok(job.operation_id)
    }

    pub async fn get_operation_status(&self, id: OperationId) -> CoreResult<UpdateJob> {
        self.operations
            .get(id)
            .await?
            .ok_or(CoreError::OperationNotFound(id))
    }

    /// Requests cancellation.
    ///
    /// A job nobody has started is canceled immediately; a running job stops at its next
    /// study or instance boundary. Finished jobs cannot be canceled.
    pub async fn cancel_operation(&self, id: OperationId) -> CoreResult<UpdateJob> {
        let job = self.get_operation_status(id).await?;
        if job.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "operation {} has already finished as {:?}",
                id, job.status
            )));
        }

        self.operations.request_cancel(id).await?;
        tracing::info!(operation = %id, "cancellation requested");

        if job.status == OperationStatus::NotStarted {
            if let Some(_guard) = self.operation_locks.try_lock(&id) {
                // Re-read under the lock; a runner may have started it in the meantime.
                let mut job = self.get_operation_status(id).await?;
                if job.status == OperationStatus::NotStarted {
                    job.cancel()?;
                    self.operations.save(&job).await?;
                }
                return Ok(job);
            }
        }

        self.get_operation_status(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{changes, uid, Fixture};
    use dicomstore_types::PartitionKey;

    fn input() -> UpdateOperationInput {
        UpdateOperationInput::new(
            PartitionKey::DEFAULT,
            vec![uid("1.2.3")],
            changes("New^PatientName"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_status() {
        let fx = Fixture::new().await;
        let id = fx.services.operations.submit_update(input()).await.unwrap();

        let job = fx.services.operations.get_operation_status(id).await.unwrap();
        assert_eq!(job.status, OperationStatus::NotStarted);
        assert_eq!(job.input, input());
    }

    #[tokio::test]
    async fn test_cancel_not_started_job() {
        let fx = Fixture::new().await;
        let id = fx.services.operations.submit_update(input()).await.unwrap();

        let job = fx.services.operations.cancel_operation(id).await.unwrap();
        assert_eq!(job.status, OperationStatus::Canceled);

        let err = fx.services.operations.cancel_operation(id).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_operation_status() {
        let fx = Fixture::new().await;
        let err = fx
            .services
            .operations
            .get_operation_status(OperationId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::OperationNotFound(_)));
    }
}
