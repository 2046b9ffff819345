//! The external surface both dispatch backends present: the process API
//! never sees whether a process runs inline or on a named queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch backend is not accepting new work")]
    Unavailable,
    #[error("queue `{0}` is full")]
    QueueFull(String),
}

/// Starts, resumes, and aborts processes without the caller needing to
/// know which backend (`ThreadPoolExecutor` or `WorkerQueueExecutor`)
/// actually carries the work out.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn start(&self, process_id: Uuid, user: String) -> Result<(), DispatchError>;

    async fn resume(&self, process_id: Uuid, user: String, resume_inputs: Vec<Value>) -> Result<(), DispatchError>;

    async fn abort(&self, process_id: Uuid, user: String) -> Result<(), DispatchError>;
}

/// A snapshot of a dispatch backend's load, surfaced by the
/// worker-status CLI/API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub executor_type: String,
    pub number_of_workers_online: usize,
    pub number_of_queued_jobs: usize,
    pub number_of_running_jobs: usize,
}
