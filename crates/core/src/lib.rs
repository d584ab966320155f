//! # dicomstore Core
//!
//! Core logic of the versioned imaging store.
//!
//! This crate contains the data operations behind every API surface:
//! - Version resolution and the payload size guard
//! - The instance index with compare-and-swap publication
//! - The retrieve pipeline (instances, frames, rendered images, metadata)
//! - Ingest of new instances
//! - Bulk update operations: durable jobs, the orchestrator and its background worker
//!
//! **No API concerns**: HTTP servers and command-line handling belong in `api-rest` and
//! `dicomstore-cli`.

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod guard;
pub mod index;
pub mod locks;
pub mod model;
mod persist;
pub mod retrieve;
pub mod store;
pub mod update;
pub mod version;

#[cfg(test)]
mod testing;

pub use config::{CoreConfig, FrameSizePolicy};
pub use error::{CoreError, CoreResult, PayloadKind};

use codec::{DicomCodec, EnvelopeCodec, Renderer};
use dicomstore_files::{FileStore, LocalFileStore};
use index::{InstanceIndex, JsonIndex};
use locks::KeyedLocks;
use retrieve::RetrieveService;
use std::sync::Arc;
use std::time::Duration;
use store::StoreService;
use tokio::sync::Notify;
use update::{JsonOperationStore, OperationStore, OperationsService, UpdateOrchestrator, UpdateWorker};

/// The wired-up services of one data directory.
///
/// Retrieve, store and update paths share the same index, blob store and instance locks, so
/// binaries should build one `Services` per process and clone the `Arc`s out of it.
#[derive(Clone)]
pub struct Services {
    pub index: Arc<dyn InstanceIndex>,
    pub files: Arc<dyn FileStore>,
    pub codec: Arc<dyn DicomCodec>,
    pub operation_store: Arc<dyn OperationStore>,
    pub retrieve: Arc<RetrieveService>,
    pub store: Arc<StoreService>,
    pub operations: Arc<OperationsService>,
    pub orchestrator: Arc<UpdateOrchestrator>,
    wake: Arc<Notify>,
    worker_poll_interval: Duration,
}

impl Services {
    /// Opens the local stack under `cfg.data_dir()`: blob store, JSON index, JSON job store
    /// and the envelope codec.
    pub fn open(cfg: &CoreConfig) -> CoreResult<Self> {
        let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::create(&cfg.blobs_dir())?);
        let index: Arc<dyn InstanceIndex> = Arc::new(JsonIndex::create(&cfg.index_dir())?);
        let operation_store: Arc<dyn OperationStore> =
            Arc::new(JsonOperationStore::create(&cfg.operations_dir())?);
        let codec = Arc::new(EnvelopeCodec::new());

        tracing::debug!(data_dir = %cfg.data_dir().display(), "opened local storage");
        Ok(Self::from_parts(
            cfg,
            index,
            files,
            codec.clone(),
            codec,
            operation_store,
        ))
    }

    /// Wires services over caller-provided backends.
    pub fn from_parts(
        cfg: &CoreConfig,
        index: Arc<dyn InstanceIndex>,
        files: Arc<dyn FileStore>,
        codec: Arc<dyn DicomCodec>,
        renderer: Arc<dyn Renderer>,
        operation_store: Arc<dyn OperationStore>,
    ) -> Self {
        let instance_locks = KeyedLocks::new();
        let operation_locks = KeyedLocks::new();
        let wake = Arc::new(Notify::new());

        let retrieve = Arc::new(RetrieveService::new(
            Arc::clone(&index),
            Arc::clone(&files),
            Arc::clone(&codec),
            renderer,
            cfg.max_payload_bytes(),
            cfg.frame_size_policy(),
        ));
        let store = Arc::new(StoreService::new(
            Arc::clone(&index),
            Arc::clone(&files),
            Arc::clone(&codec),
            instance_locks.clone(),
        ));
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            Arc::clone(&index),
            Arc::clone(&files),
            Arc::clone(&codec),
            Arc::clone(&operation_store),
            instance_locks,
            operation_locks.clone(),
            cfg.max_job_attempts(),
        ));
        let operations = Arc::new(OperationsService::new(
            Arc::clone(&operation_store),
            operation_locks,
            Arc::clone(&wake),
        ));

        Self {
            index,
            files,
            codec,
            operation_store,
            retrieve,
            store,
            operations,
            orchestrator,
            wake,
            worker_poll_interval: cfg.worker_poll_interval(),
        }
    }

    /// A worker that runs this process's submitted and unfinished update jobs.
    pub fn worker(&self) -> UpdateWorker {
        UpdateWorker::new(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.operation_store),
            Arc::clone(&self.wake),
            self.worker_poll_interval,
        )
    }
}
