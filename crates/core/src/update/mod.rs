//! Bulk metadata update: validated input, durable job state, the orchestrator that applies a
//! job, the service that accepts jobs, and the worker that runs them in the background.

mod input;
mod job;
mod orchestrator;
mod service;
mod store;
mod worker;

pub use input::{ChangeDataset, UpdateOperationInput};
pub use job::{OperationStatus, StudyProgress, StudyState, UpdateJob};
pub use orchestrator::{InstanceOutcome, UpdateOrchestrator};
pub use service::OperationsService;
pub use store::{JsonOperationStore, OperationStore};
pub use worker::UpdateWorker;
