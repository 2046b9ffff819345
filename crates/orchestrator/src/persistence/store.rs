//! The durability contract: the `ProcessStore` a `Runtime` persists
//! through, and the dedup/broadcast rules that turn a raw `Outcome` into a
//! durable process step row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{Assignee, Outcome, ProcessStatus, State, Step, StepStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("process not found: {0}")]
    ProcessNotFound(Uuid),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A persisted process row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRow {
    pub process_id: Uuid,
    pub workflow_name: String,
    pub last_status: ProcessStatus,
    pub last_step: String,
    pub assignee: Assignee,
    pub is_task: bool,
    pub subscription_ids: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub created_by: String,
}

/// A persisted process step row. `retries` and `completed_at` grow
/// together: each retry of a `waiting`/`failed` step appends a timestamp
/// and bumps the counter rather than the row being duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStepRow {
    pub process_id: Uuid,
    pub sequence: i64,
    pub name: String,
    pub status: StepStatus,
    pub state: State,
    pub retries: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Vec<DateTime<Utc>>,
}

/// An append to `ProcessStore::append_input_state`, recording the raw form
/// payloads a resume call supplied (kept separately from step state for
/// auditability).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputStateRow {
    pub process_id: Uuid,
    pub step_name: String,
    pub inputs: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProcessRow {
    pub process_id: Uuid,
    pub workflow_name: String,
    pub is_task: bool,
    pub created_by: String,
}

/// A field-level update applied to a process row after a step is logged.
#[derive(Debug, Clone, Default)]
pub struct ProcessUpdate {
    pub last_status: Option<ProcessStatus>,
    pub last_step: Option<String>,
    pub assignee: Option<Assignee>,
}

/// Durable storage for processes, their step history, and their submitted
/// form inputs. A `Workflow`/`Step`/`Outcome`'s in-memory shape never
/// appears here undigested: everything crossing this trait is a plain
/// row a SQL database (or an in-memory map, for tests) can hold.
#[async_trait]
pub trait ProcessStore: Send + Sync + 'static {
    async fn create_process(&self, row: NewProcessRow) -> Result<(), StoreError>;

    async fn get_process(&self, process_id: Uuid) -> Result<ProcessRow, StoreError>;

    async fn update_process(&self, process_id: Uuid, update: ProcessUpdate) -> Result<(), StoreError>;

    /// The most recently written step row for a process, if any.
    async fn last_step(&self, process_id: Uuid) -> Result<Option<ProcessStepRow>, StoreError>;

    /// Every step row for a process, oldest first.
    async fn steps_for(&self, process_id: Uuid) -> Result<Vec<ProcessStepRow>, StoreError>;

    async fn append_step(&self, row: ProcessStepRow) -> Result<(), StoreError>;

    /// Update an existing step row in place (the retry-dedup path).
    async fn update_step(&self, row: ProcessStepRow) -> Result<(), StoreError>;

    async fn append_input_state(&self, row: InputStateRow) -> Result<(), StoreError>;

    async fn add_subscription(&self, process_id: Uuid, subscription_id: Uuid) -> Result<(), StoreError>;

    async fn list_processes(&self) -> Result<Vec<ProcessRow>, StoreError>;
}

/// Map an outcome to the process-level status and assignee it leaves
/// behind. A `Failed` outcome is split further by the `class` field of its
/// error state, per the engine's error-handling design: an assertion
/// failure means the data disagreed with an invariant, an API failure
/// means a collaborator was unreachable, anything else is just failed.
pub fn process_status_for(outcome: &Outcome) -> ProcessStatus {
    match outcome {
        Outcome::Success(_) | Outcome::Skipped(_) => ProcessStatus::Running,
        Outcome::Suspend(_) => ProcessStatus::Suspended,
        Outcome::Waiting(_) => ProcessStatus::Waiting,
        Outcome::Abort(_) => ProcessStatus::Aborted,
        Outcome::Complete(_) => ProcessStatus::Completed,
        Outcome::Failed(state) => match state.get("class").and_then(|v| v.as_str()) {
            Some("AssertionError") => ProcessStatus::InconsistentData,
            Some("ApiException") => ProcessStatus::ApiUnavailable,
            _ => ProcessStatus::Failed,
        },
    }
}

/// Broadcast hook invoked after a step is durably logged. Errors are
/// intentionally swallowed by the caller: a failed broadcast must never
/// turn a successfully logged step into a failed one.
pub type BroadcastFn = std::sync::Arc<dyn Fn(Uuid, &Outcome) + Send + Sync>;

/// Implements the append/dedup contract described for the durability
/// layer: a fresh step is appended; a step whose name matches the most
/// recently written row, where that row is `waiting` or `failed`, is
/// updated in place instead (incrementing `retries` and appending to
/// `completed_at`) so retries don't pile up duplicate rows.
pub struct Durability<S: ProcessStore> {
    store: std::sync::Arc<S>,
    broadcast: Option<BroadcastFn>,
}

impl<S: ProcessStore> Durability<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Durability { store, broadcast: None }
    }

    pub fn with_broadcast(mut self, broadcast: BroadcastFn) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    pub fn store(&self) -> &std::sync::Arc<S> {
        &self.store
    }

    /// Log one step outcome, applying the dedup rule, updating the parent
    /// process row, and firing the broadcast hook. Returns the outcome
    /// unchanged so it can be chained straight back into `runwf`.
    pub async fn log_step(
        &self,
        process_id: Uuid,
        current_user: &str,
        step: &Step,
        outcome: Outcome,
    ) -> Result<Outcome, StoreError> {
        let process = self.store.get_process(process_id).await?;
        let status = StepStatus::from(&outcome);
        let now = Utc::now();

        let last = self.store.last_step(process_id).await?;
        let retried_in_place = match &last {
            Some(last_row)
                if last_row.name == step.name()
                    && matches!(last_row.status, StepStatus::Waiting | StepStatus::Failed) =>
            {
                let mut row = last_row.clone();
                row.status = status;
                row.state = outcome.state().clone();
                row.retries += 1;
                row.completed_at.push(now);
                self.store.update_step(row).await?;
                true
            }
            _ => false,
        };

        if !retried_in_place {
            let sequence = last.map(|row| row.sequence + 1).unwrap_or(0);
            self.store
                .append_step(ProcessStepRow {
                    process_id,
                    sequence,
                    name: step.name().to_string(),
                    status,
                    state: outcome.state().clone(),
                    retries: 0,
                    created_at: now,
                    completed_at: vec![now],
                })
                .await?;
        }

        let _ = process; // process_id validated to exist; fields updated below
        self.store
            .update_process(
                process_id,
                ProcessUpdate {
                    last_status: Some(process_status_for(&outcome)),
                    last_step: Some(step.name().to_string()),
                    assignee: Some(step.assignee()),
                },
            )
            .await?;

        if let Some(broadcast) = &self.broadcast {
            broadcast(process_id, &outcome);
        }

        let _ = current_user;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_failure_is_inconsistent_data() {
        let mut state = State::new();
        state.insert("class".into(), serde_json::Value::String("AssertionError".into()));
        assert_eq!(
            process_status_for(&Outcome::Failed(state)),
            ProcessStatus::InconsistentData
        );
    }

    #[test]
    fn api_failure_is_api_unavailable() {
        let mut state = State::new();
        state.insert("class".into(), serde_json::Value::String("ApiException".into()));
        assert_eq!(process_status_for(&Outcome::Failed(state)), ProcessStatus::ApiUnavailable);
    }

    #[test]
    fn generic_failure_is_plain_failed() {
        let state = State::new();
        assert_eq!(process_status_for(&Outcome::Failed(state)), ProcessStatus::Failed);
    }

    #[test]
    fn suspend_maps_to_suspended() {
        assert_eq!(process_status_for(&Outcome::Suspend(State::new())), ProcessStatus::Suspended);
    }
}
