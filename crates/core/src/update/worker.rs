use super::orchestrator::UpdateOrchestrator;
use super::store::OperationStore;
use crate::CoreResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{error, info};

/// Background loop that runs unfinished update jobs.
///
/// On every pass the worker runs all not-started and running jobs, oldest first, then sleeps
/// until it is woken by a submission, the poll interval elapses, or shutdown is signalled.
#[derive(Clone)]
pub struct UpdateWorker {
    orchestrator: Arc<UpdateOrchestrator>,
    operations: Arc<dyn OperationStore>,
    wake: Arc<Notify>,
    poll_interval: Duration,
}

impl UpdateWorker {
    pub fn new(
        orchestrator: Arc<UpdateOrchestrator>,
        operations: Arc<dyn OperationStore>,
        wake: Arc<Notify>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            operations,
            wake,
            poll_interval,
        }
    }

    /// Runs every unfinished job once. Returns how many jobs were run.
    pub async fn run_pending(&self) -> CoreResult<usize> {
        let jobs = self.operations.list_unfinished().await?;
        let count = jobs.len();
        for job in jobs {
            if let Err(e) = self.orchestrator.run(job.operation_id).await {
                error!(operation = %job.operation_id, error = %e, "update operation failed to run");
            }
        }
        Ok(count)
    }

    /// Loops until `shutdown` becomes `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "update worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_pending().await {
                error!(error = %e, "failed to list unfinished update operations");
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("update worker stopped");
    }
}
