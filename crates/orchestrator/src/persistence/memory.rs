//! In-memory `ProcessStore`, used by unit tests and by the `TESTING`
//! configuration flag so a process can be driven synchronously without a
//! database.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::{
    InputStateRow, NewProcessRow, ProcessRow, ProcessStepRow, ProcessStore, ProcessUpdate, StoreError,
};
use crate::workflow::ProcessStatus;

struct ProcessState {
    row: ProcessRow,
    steps: Vec<ProcessStepRow>,
    input_states: Vec<InputStateRow>,
}

/// A `parking_lot::RwLock`-guarded map of process id to its state, mirroring
/// the shape a `ProcessStore` needs without paying for a database round
/// trip. Not durable across a process restart; meant for tests and the
/// `TESTING=true` synchronous execution path.
#[derive(Default)]
pub struct InMemoryProcessStore {
    processes: RwLock<HashMap<Uuid, ProcessState>>,
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        InMemoryProcessStore {
            processes: RwLock::new(HashMap::new()),
        }
    }

    pub fn process_count(&self) -> usize {
        self.processes.read().len()
    }

    pub fn clear(&self) {
        self.processes.write().clear();
    }

    /// Number of `InputStateRow`s recorded for a process. Test-only: lets
    /// tests assert that a form submission was (or wasn't) persisted
    /// without reaching into storage internals.
    pub fn input_state_count(&self, process_id: Uuid) -> usize {
        self.processes
            .read()
            .get(&process_id)
            .map(|s| s.input_states.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ProcessStore for InMemoryProcessStore {
    async fn create_process(&self, row: NewProcessRow) -> Result<(), StoreError> {
        let now = chrono::Utc::now();
        let mut processes = self.processes.write();
        processes.insert(
            row.process_id,
            ProcessState {
                row: ProcessRow {
                    process_id: row.process_id,
                    workflow_name: row.workflow_name,
                    last_status: ProcessStatus::Created,
                    last_step: String::new(),
                    assignee: crate::workflow::Assignee::System,
                    is_task: row.is_task,
                    subscription_ids: Vec::new(),
                    started_at: now,
                    last_modified_at: now,
                    created_by: row.created_by,
                },
                steps: Vec::new(),
                input_states: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_process(&self, process_id: Uuid) -> Result<ProcessRow, StoreError> {
        self.processes
            .read()
            .get(&process_id)
            .map(|s| s.row.clone())
            .ok_or(StoreError::ProcessNotFound(process_id))
    }

    async fn update_process(&self, process_id: Uuid, update: ProcessUpdate) -> Result<(), StoreError> {
        let mut processes = self.processes.write();
        let state = processes
            .get_mut(&process_id)
            .ok_or(StoreError::ProcessNotFound(process_id))?;
        if let Some(status) = update.last_status {
            state.row.last_status = status;
        }
        if let Some(step) = update.last_step {
            state.row.last_step = step;
        }
        if let Some(assignee) = update.assignee {
            state.row.assignee = assignee;
        }
        state.row.last_modified_at = chrono::Utc::now();
        Ok(())
    }

    async fn last_step(&self, process_id: Uuid) -> Result<Option<ProcessStepRow>, StoreError> {
        let processes = self.processes.read();
        let state = processes
            .get(&process_id)
            .ok_or(StoreError::ProcessNotFound(process_id))?;
        Ok(state.steps.last().cloned())
    }

    async fn steps_for(&self, process_id: Uuid) -> Result<Vec<ProcessStepRow>, StoreError> {
        let processes = self.processes.read();
        let state = processes
            .get(&process_id)
            .ok_or(StoreError::ProcessNotFound(process_id))?;
        Ok(state.steps.clone())
    }

    async fn append_step(&self, row: ProcessStepRow) -> Result<(), StoreError> {
        let mut processes = self.processes.write();
        let state = processes
            .get_mut(&row.process_id)
            .ok_or(StoreError::ProcessNotFound(row.process_id))?;
        state.steps.push(row);
        Ok(())
    }

    async fn update_step(&self, row: ProcessStepRow) -> Result<(), StoreError> {
        let mut processes = self.processes.write();
        let state = processes
            .get_mut(&row.process_id)
            .ok_or(StoreError::ProcessNotFound(row.process_id))?;
        if let Some(existing) = state.steps.iter_mut().find(|s| s.sequence == row.sequence) {
            *existing = row;
        } else {
            state.steps.push(row);
        }
        Ok(())
    }

    async fn append_input_state(&self, row: InputStateRow) -> Result<(), StoreError> {
        let mut processes = self.processes.write();
        let state = processes
            .get_mut(&row.process_id)
            .ok_or(StoreError::ProcessNotFound(row.process_id))?;
        state.input_states.push(row);
        Ok(())
    }

    async fn add_subscription(&self, process_id: Uuid, subscription_id: Uuid) -> Result<(), StoreError> {
        let mut processes = self.processes.write();
        let state = processes
            .get_mut(&process_id)
            .ok_or(StoreError::ProcessNotFound(process_id))?;
        if !state.row.subscription_ids.contains(&subscription_id) {
            state.row.subscription_ids.push(subscription_id);
        }
        Ok(())
    }

    async fn list_processes(&self) -> Result<Vec<ProcessRow>, StoreError> {
        Ok(self.processes.read().values().map(|s| s.row.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryProcessStore::new();
        let process_id = Uuid::new_v4();
        store
            .create_process(NewProcessRow {
                process_id,
                workflow_name: "create_node".into(),
                is_task: false,
                created_by: "system".into(),
            })
            .await
            .unwrap();
        let row = store.get_process(process_id).await.unwrap();
        assert_eq!(row.workflow_name, "create_node");
        assert_eq!(row.last_status, ProcessStatus::Created);
    }

    #[tokio::test]
    async fn unknown_process_is_not_found() {
        let store = InMemoryProcessStore::new();
        let err = store.get_process(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::ProcessNotFound(_)));
    }
}
