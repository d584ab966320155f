//! # Update Orchestrator
//!
//! Runs one update job: every instance of every named study is rewritten as a new immutable
//! version and then published in the index. Progress is persisted after each study, so a job
//! interrupted at any point can be resumed by running it again.
//!
//! ## Per-instance protocol
//!
//! Under the instance lock:
//!
//! 1. re-read the index record and the current version's content
//! 2. apply the changeset; identical bytes mean the instance is already up to date
//! 3. reserve a version (an interrupted attempt's reservation is reused) and write the blob
//! 4. publish with compare-and-swap on the version read in step 1
//!
//! Readers keep resolving the previous version until step 4 succeeds.

use super::input::ChangeDataset;
use super::job::{StudyProgress, StudyState, UpdateJob};
use super::store::OperationStore;
use crate::codec::DicomCodec;
use crate::index::InstanceIndex;
use crate::locks::KeyedLocks;
use crate::{CoreError, CoreResult};
use dicomstore_files::{sha256_hex, FileStore, FilesError};
use dicomstore_types::{DicomUid, InstanceIdentifier, OperationId, Version, VersionedInstanceIdentifier};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of updating one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceOutcome {
    /// A new version was published.
    Updated(Version),
    /// The changeset was already applied; no version was written.
    Unchanged,
}

enum StudyRun {
    Finished(StudyProgress),
    Canceled,
}

#[derive(Clone)]
pub struct UpdateOrchestrator {
    index: Arc<dyn InstanceIndex>,
    files: Arc<dyn FileStore>,
    codec: Arc<dyn DicomCodec>,
    operations: Arc<dyn OperationStore>,
    instance_locks: KeyedLocks<InstanceIdentifier>,
    operation_locks: KeyedLocks<OperationId>,
    max_job_attempts: u32,
}

impl UpdateOrchestrator {
    pub fn new(
        index: Arc<dyn InstanceIndex>,
        files: Arc<dyn FileStore>,
        codec: Arc<dyn DicomCodec>,
        operations: Arc<dyn OperationStore>,
        instance_locks: KeyedLocks<InstanceIdentifier>,
        operation_locks: KeyedLocks<OperationId>,
        max_job_attempts: u32,
    ) -> Self {
        Self {
            index,
            files,
            codec,
            operations,
            instance_locks,
            operation_locks,
            max_job_attempts,
        }
    }

    /// Runs (or resumes) an operation and returns its persisted state afterwards.
    ///
    /// If another task is already running the operation, its current state is returned
    /// without doing any work.
    pub async fn run(&self, id: OperationId) -> CoreResult<UpdateJob> {
        let Some(_guard) = self.operation_locks.try_lock(&id) else {
            debug!(operation = %id, "operation already running elsewhere");
            return self.load(id).await;
        };

        let mut job = self.load(id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        if self.operations.is_cancel_requested(id).await? {
            job.cancel()?;
            self.operations.save(&job).await?;
            info!(operation = %id, "operation canceled before start");
            return Ok(job);
        }

        job.start()?;
        self.operations.save(&job).await?;
        info!(
            operation = %id,
            studies = job.studies.len(),
            pending = job.pending_studies().len(),
            attempt = job.attempts + 1,
            "running update operation"
        );

        match self.run_studies(&mut job).await {
            Ok(false) => {
                job.complete()?;
                info!(operation = %id, status = ?job.status, "update operation finished");
            }
            Ok(true) => {
                job.cancel()?;
                info!(operation = %id, "update operation canceled");
            }
            Err(e) => {
                error!(operation = %id, error = %e, "update operation interrupted");
                job.record_fatal_error(e.to_string(), self.max_job_attempts)?;
            }
        }

        self.operations.save(&job).await?;
        Ok(job)
    }

    async fn load(&self, id: OperationId) -> CoreResult<UpdateJob> {
        self.operations
            .get(id)
            .await?
            .ok_or(CoreError::OperationNotFound(id))
    }

    /// Processes pending studies in input order. Returns `true` if canceled.
    async fn run_studies(&self, job: &mut UpdateJob) -> CoreResult<bool> {
        for study in job.pending_studies() {
            if self.operations.is_cancel_requested(job.operation_id).await? {
                return Ok(true);
            }

            match self.update_study(job, &study).await? {
                StudyRun::Finished(progress) => {
                    info!(
                        operation = %job.operation_id,
                        study = %study,
                        state = ?progress.state,
                        updated = progress.instances_updated,
                        unchanged = progress.instances_unchanged,
                        failed = progress.instances_failed,
                        "study processed"
                    );
                    job.record_study(progress)?;
                    self.operations.save(job).await?;
                }
                StudyRun::Canceled => return Ok(true),
            }
        }
        Ok(false)
    }

    async fn update_study(&self, job: &UpdateJob, study: &DicomUid) -> CoreResult<StudyRun> {
        let instances = self
            .index
            .list_study_instances(job.input.partition_key(), study)
            .await?;

        let mut progress = StudyProgress::pending(study.clone());
        if instances.is_empty() {
            progress.state = StudyState::NotFound;
            return Ok(StudyRun::Finished(progress));
        }

        let changes = job.input.change_dataset();
        for metadata in instances {
            if self.operations.is_cancel_requested(job.operation_id).await? {
                return Ok(StudyRun::Canceled);
            }

            let instance = metadata.instance();
            match self.update_instance(instance, changes).await {
                Ok(InstanceOutcome::Updated(_)) => progress.instances_updated += 1,
                Ok(InstanceOutcome::Unchanged) => progress.instances_unchanged += 1,
                Err(e) if e.is_job_fatal() => return Err(e),
                Err(e) => {
                    warn!(instance = %instance, error = %e, "instance update failed");
                    progress.instances_failed += 1;
                    progress
                        .error
                        .get_or_insert_with(|| format!("{}: {}", instance, e));
                }
            }
        }

        progress.state = if progress.instances_failed > 0 {
            StudyState::Failed
        } else {
            StudyState::Updated
        };
        Ok(StudyRun::Finished(progress))
    }

    /// Applies `changes` to one instance and publishes the result as a new version.
    pub async fn update_instance(
        &self,
        instance: &InstanceIdentifier,
        changes: &ChangeDataset,
    ) -> CoreResult<InstanceOutcome> {
        let _guard = self.instance_locks.lock(instance).await;

        let metadata = self
            .index
            .get_instance(instance)
            .await?
            .ok_or_else(|| CoreError::InstanceNotFound(instance.clone()))?;
        let current = metadata.identifier.clone();

        let content = self
            .files
            .read(&current)
            .await
            .map_err(|e| CoreError::from_files(e, &current))?;
        let updated = self.codec.apply_changes(&content, changes.as_map())?;

        if updated == content {
            if let Some(pending) = metadata.properties.new_version {
                self.discard_reservation(instance, pending).await?;
            }
            debug!(instance = %current, "instance already up to date");
            return Ok(InstanceOutcome::Unchanged);
        }

        let new_version = self.index.reserve_version(instance).await?;
        let target = instance.at_version(new_version);
        self.write_version(instance, &target, &updated).await?;

        let frame_ranges = self.codec.frame_ranges(&updated)?;
        match self
            .index
            .publish_version(instance, current.version, new_version, frame_ranges)
            .await
        {
            Ok(_) => {
                debug!(
                    instance = %instance,
                    from = current.version,
                    to = new_version,
                    sha256 = %sha256_hex(&updated),
                    "instance updated"
                );
                Ok(InstanceOutcome::Updated(new_version))
            }
            Err(CoreError::Conflict(reason)) => {
                warn!(instance = %target, %reason, "lost publish race");
                self.delete_orphan(instance, &target).await?;
                Err(CoreError::Conflict(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Writes `content` at `target`. A blob left there by an interrupted attempt is accepted
    /// only if it holds exactly the same bytes.
    async fn write_version(
        &self,
        instance: &InstanceIdentifier,
        target: &VersionedInstanceIdentifier,
        content: &[u8],
    ) -> CoreResult<()> {
        match self.files.write(target, content).await {
            Ok(_) => Ok(()),
            Err(FilesError::AlreadyExists(_)) => {
                let existing = self
                    .files
                    .read(target)
                    .await
                    .map_err(|e| CoreError::from_files(e, target))?;
                if existing == content {
                    debug!(instance = %target, "reusing version written by an earlier attempt");
                    return Ok(());
                }

                self.discard_reservation(instance, target.version).await?;
                Err(CoreError::Conflict(format!(
                    "version {} already holds different content",
                    target
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_reservation(&self, instance: &InstanceIdentifier, version: Version) -> CoreResult<()> {
        let target = instance.at_version(version);
        self.delete_orphan(instance, &target).await?;
        self.index.release_reservation(instance, version).await
    }

    /// Deletes the blob at `target` unless the index now serves it.
    ///
    /// A reservation is shared by every writer of the instance, so a competing writer may have
    /// published `target` since this one reserved it. The record is re-read under the instance
    /// lock and the blob is kept if it is the current or the original version.
    async fn delete_orphan(
        &self,
        instance: &InstanceIdentifier,
        target: &VersionedInstanceIdentifier,
    ) -> CoreResult<()> {
        if let Some(metadata) = self.index.get_instance(instance).await? {
            let served = metadata.identifier.version == target.version
                || metadata.properties.original_version == Some(target.version);
            if served {
                warn!(instance = %target, "version was published by another writer, keeping it");
                return Ok(());
            }
        }

        debug!(instance = %target, "removing orphaned version");
        if let Err(e) = self.files.delete(target).await {
            warn!(instance = %target, error = %e, "failed to delete orphaned version");
        }
        Ok(())
    }
}
