//! The narrow surface an HTTP layer (deliberately out of scope for this
//! crate) would sit on top of: `start_process`, `resume_process`,
//! `abort_process`, `load_process`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::engine::{create_process, Engine, ExecutorError, ProcessStat, RegistryError};
use crate::form::FormError;
use crate::persistence::{InputStateRow, ProcessRow, ProcessStore, StoreError};
use crate::workflow::{ProcessStatus, State, Target};
use crate::worker::{Dispatch, DispatchError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    /// `resume_process`/`abort_process` called with a process that has
    /// already moved past the state the caller assumed it was in.
    #[error("process {0} is not in a resumable state")]
    IllegalState(Uuid),
    /// `resume_process` called against a process whose workflow has since
    /// been removed from the live registry. The process row is still
    /// inspectable through `load_process`; it just can no longer advance.
    #[error("cannot resume process {0}: workflow `{1}` has been removed from the registry")]
    WorkflowRemoved(Uuid, String),
}

/// Wires the engine and a dispatch backend into the four operations an
/// outer API surface needs: starting, resuming, and aborting processes,
/// and reconstructing a process's in-memory cursor for inspection.
pub struct ProcessApi<S: ProcessStore> {
    engine: Arc<Engine<S>>,
    dispatch: Arc<dyn Dispatch>,
}

impl<S: ProcessStore> ProcessApi<S> {
    pub fn new(engine: Arc<Engine<S>>, dispatch: Arc<dyn Dispatch>) -> Self {
        ProcessApi { engine, dispatch }
    }

    /// Resolve `workflow_name`, validate `user_inputs` against its
    /// starting form (if any), persist the process row, and hand off to
    /// the dispatch backend. Nothing is persisted if validation fails.
    #[instrument(skip(self, user_inputs))]
    pub async fn start_process(
        &self,
        workflow_name: &str,
        user_inputs: Vec<Value>,
        user: &str,
    ) -> Result<Uuid, ApiError> {
        let workflow = self.engine.registry().read().get(workflow_name)?.clone();

        let mut initial_state = State::new();
        if let Some(form) = &workflow.initial_input_form {
            let validated = form.apply_all(&State::new(), &user_inputs)?;
            initial_state.extend(validated);
        }

        let process_id = Uuid::new_v4();
        create_process(
            &**self.engine.store(),
            process_id,
            workflow_name,
            workflow.target == Target::System,
            user,
        )
        .await?;

        if workflow.initial_input_form.is_some() {
            self.engine
                .store()
                .append_input_state(InputStateRow {
                    process_id,
                    step_name: "Start".to_string(),
                    inputs: user_inputs,
                    created_at: Utc::now(),
                })
                .await?;
        }

        info!(%process_id, workflow = workflow_name, "process created");
        self.dispatch.start(process_id, user.to_string()).await?;
        Ok(process_id)
    }

    /// Resume a suspended or waiting process. A no-op (returns
    /// `IllegalState`) if the process is already `Running`/`Resumed`,
    /// matching the engine's refusal to double-dispatch a live process.
    /// If the process is parked on an input step, `user_inputs` is
    /// validated against that step's form before anything is persisted or
    /// dispatched, mirroring `start_process`'s synchronous validation.
    #[instrument(skip(self, user_inputs))]
    pub async fn resume_process(
        &self,
        process_id: Uuid,
        user_inputs: Vec<Value>,
        user: &str,
    ) -> Result<Uuid, ApiError> {
        let row = self.engine.store().get_process(process_id).await?;

        if self.engine.registry().read().get(&row.workflow_name).is_err() {
            return Err(ApiError::WorkflowRemoved(process_id, row.workflow_name.clone()));
        }

        if matches!(row.last_status, ProcessStatus::Running | ProcessStatus::Resumed) {
            return Err(ApiError::IllegalState(process_id));
        }

        let pstat = self.engine.load_process_stat(&row).await?;
        if let Some(next_step) = pstat.log.steps().first() {
            if let Some(form) = next_step.input_form() {
                form.apply_all(pstat.state.state(), &user_inputs)?;
                self.engine
                    .store()
                    .append_input_state(InputStateRow {
                        process_id,
                        step_name: next_step.name().to_string(),
                        inputs: user_inputs.clone(),
                        created_at: Utc::now(),
                    })
                    .await?;
            }
        }

        self.dispatch.resume(process_id, user.to_string(), user_inputs).await?;
        Ok(process_id)
    }

    /// Abort a process in place. Idempotent: aborting an already-aborted
    /// process dispatches the abort pipeline again, which re-emits the
    /// same terminal outcome without writing a new row.
    #[instrument(skip(self))]
    pub async fn abort_process(&self, process_id: Uuid, user: &str) -> Result<Uuid, ApiError> {
        self.dispatch.abort(process_id, user.to_string()).await?;
        Ok(process_id)
    }

    /// Reconstruct a process's in-memory cursor from its persisted rows,
    /// for inspection. Tolerates a workflow that has since been removed
    /// from the registry (the process can still be inspected, just not
    /// resumed, started, or aborted).
    #[instrument(skip(self))]
    pub async fn load_process(&self, process_id: Uuid) -> Result<ProcessStat, ApiError> {
        let row = self.engine.store().get_process(process_id).await?;
        Ok(self.engine.load_process_stat_for_inspection(&row).await?)
    }

    pub async fn process_row(&self, process_id: Uuid) -> Result<ProcessRow, ApiError> {
        Ok(self.engine.store().get_process(process_id).await?)
    }

    pub async fn list_processes(&self) -> Result<Vec<ProcessRow>, ApiError> {
        Ok(self.engine.store().list_processes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, WorkflowRegistry};
    use crate::form::{require_string, FormField, FormSpec, InputForm};
    use crate::persistence::InMemoryProcessStore;
    use crate::worker::ThreadPoolExecutor;
    use crate::workflow::{done, init, step, Workflow};
    use serde_json::json;

    fn engine_with(workflow: Workflow) -> Arc<Engine<InMemoryProcessStore>> {
        let store = Arc::new(InMemoryProcessStore::new());
        let mut registry = WorkflowRegistry::new();
        registry.register(workflow);
        Arc::new(Engine::new(store, registry))
    }

    #[tokio::test]
    async fn start_process_with_no_form_dispatches_immediately() {
        let engine = engine_with(Workflow::new(
            "noop",
            Target::Create,
            "t",
            None,
            init() >> step("only", &[], |_| Ok(None)) >> done(),
        ));
        let dispatch = Arc::new(ThreadPoolExecutor::new(engine.clone(), 2, true));
        let api = ProcessApi::new(engine, dispatch);

        let process_id = api.start_process("noop", vec![], "john.doe").await.unwrap();
        let row = api.process_row(process_id).await.unwrap();
        assert_eq!(row.last_status, ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn start_process_rejects_bad_form_input_without_persisting() {
        let form = InputForm::single(
            FormSpec::new("name", vec![FormField::new("name", "string", true)]),
            |_state, payload| {
                let name = require_string(payload, "name")?;
                let mut update = State::new();
                update.insert("name".into(), Value::String(name));
                Ok(update)
            },
        );
        let engine = engine_with(Workflow::new(
            "needs_name",
            Target::Create,
            "t",
            Some(form),
            init() >> done(),
        ));
        let dispatch = Arc::new(ThreadPoolExecutor::new(engine.clone(), 2, true));
        let api = ProcessApi::new(engine.clone(), dispatch);

        let err = api.start_process("needs_name", vec![json!({})], "john.doe").await;
        assert!(matches!(err, Err(ApiError::Form(_))));
        assert!(engine.store().list_processes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_workflow_is_rejected() {
        let engine = engine_with(Workflow::new("known", Target::Create, "t", None, init() >> done()));
        let dispatch = Arc::new(ThreadPoolExecutor::new(engine.clone(), 2, true));
        let api = ProcessApi::new(engine, dispatch);
        let err = api.start_process("unknown", vec![], "john.doe").await;
        assert!(matches!(err, Err(ApiError::Registry(_))));
    }

    #[tokio::test]
    async fn resuming_a_process_whose_workflow_was_removed_is_rejected() {
        let engine = engine_with(Workflow::new(
            "transient",
            Target::Create,
            "t",
            None,
            init() >> crate::workflow::inputstep(
                "wait",
                crate::workflow::Assignee::Noc,
                InputForm::single(FormSpec::new("x", vec![]), |s, _| Ok(s.clone())),
            ) >> done(),
        ));
        let dispatch = Arc::new(ThreadPoolExecutor::new(engine.clone(), 2, true));
        let api = ProcessApi::new(engine.clone(), dispatch);

        let process_id = api.start_process("transient", vec![], "john.doe").await.unwrap();
        *engine.registry().write() = WorkflowRegistry::new();

        let err = api.resume_process(process_id, vec![json!({})], "john.doe").await;
        assert!(matches!(err, Err(ApiError::WorkflowRemoved(_, _))));

        // Inspection still works even though resume is refused.
        let pstat = api.load_process(process_id).await.unwrap();
        assert_eq!(pstat.workflow.name, "transient");
    }

    #[tokio::test]
    async fn resuming_a_running_process_is_illegal_state() {
        let engine = engine_with(Workflow::new(
            "slow",
            Target::Create,
            "t",
            None,
            init() >> step("only", &[], |_| Ok(None)) >> done(),
        ));
        let dispatch = Arc::new(ThreadPoolExecutor::new(engine.clone(), 2, true));
        let api = ProcessApi::new(engine.clone(), dispatch);

        let process_id = Uuid::new_v4();
        crate::engine::create_process(&**engine.store(), process_id, "slow", false, "john.doe")
            .await
            .unwrap();
        engine
            .store()
            .update_process(
                process_id,
                crate::persistence::ProcessUpdate {
                    last_status: Some(ProcessStatus::Running),
                    last_step: None,
                    assignee: None,
                },
            )
            .await
            .unwrap();

        let err = api.resume_process(process_id, vec![], "john.doe").await;
        assert!(matches!(err, Err(ApiError::IllegalState(_))));
    }

    #[tokio::test]
    async fn start_process_persists_the_submitted_form_once() {
        let form = InputForm::single(
            FormSpec::new("name", vec![FormField::new("name", "string", true)]),
            |_state, payload| {
                let name = require_string(payload, "name")?;
                let mut update = State::new();
                update.insert("name".into(), Value::String(name));
                Ok(update)
            },
        );
        let engine = engine_with(Workflow::new(
            "needs_name",
            Target::Create,
            "t",
            Some(form),
            init() >> done(),
        ));
        let dispatch = Arc::new(ThreadPoolExecutor::new(engine.clone(), 2, true));
        let api = ProcessApi::new(engine.clone(), dispatch);

        let process_id = api
            .start_process("needs_name", vec![json!({"name": "Alice"})], "john.doe")
            .await
            .unwrap();
        assert_eq!(engine.store().input_state_count(process_id), 1);
    }

    #[tokio::test]
    async fn resume_process_rejects_bad_form_input_without_dispatching() {
        let form = InputForm::single(
            FormSpec::new("details", vec![FormField::new("node_name", "string", true)]),
            |_state, payload| {
                let node_name = require_string(payload, "node_name")?;
                let mut update = State::new();
                update.insert("node_name".into(), Value::String(node_name));
                Ok(update)
            },
        );
        let engine = engine_with(Workflow::new(
            "create_node",
            Target::Create,
            "t",
            None,
            init() >> crate::workflow::inputstep("Provide node details", crate::workflow::Assignee::Noc, form) >> done(),
        ));
        let dispatch = Arc::new(ThreadPoolExecutor::new(engine.clone(), 2, true));
        let api = ProcessApi::new(engine.clone(), dispatch);

        let process_id = api.start_process("create_node", vec![], "john.doe").await.unwrap();
        let row = api.process_row(process_id).await.unwrap();
        assert_eq!(row.last_status, ProcessStatus::Suspended);

        let err = api.resume_process(process_id, vec![json!({})], "john.doe").await;
        assert!(matches!(err, Err(ApiError::Form(_))));
        assert_eq!(engine.store().input_state_count(process_id), 0);

        let row = api.process_row(process_id).await.unwrap();
        assert_eq!(row.last_status, ProcessStatus::Suspended, "a rejected resume must not touch the process row");
    }

    #[tokio::test]
    async fn resume_process_persists_the_submitted_form_once() {
        let form = InputForm::single(
            FormSpec::new("details", vec![FormField::new("node_name", "string", true)]),
            |_state, payload| {
                let node_name = require_string(payload, "node_name")?;
                let mut update = State::new();
                update.insert("node_name".into(), Value::String(node_name));
                Ok(update)
            },
        );
        let engine = engine_with(Workflow::new(
            "create_node",
            Target::Create,
            "t",
            None,
            init() >> crate::workflow::inputstep("Provide node details", crate::workflow::Assignee::Noc, form) >> done(),
        ));
        let dispatch = Arc::new(ThreadPoolExecutor::new(engine.clone(), 2, true));
        let api = ProcessApi::new(engine.clone(), dispatch);

        let process_id = api.start_process("create_node", vec![], "john.doe").await.unwrap();
        api.resume_process(process_id, vec![json!({"node_name": "edge-1"})], "john.doe")
            .await
            .unwrap();

        assert_eq!(engine.store().input_state_count(process_id), 1);
        let row = api.process_row(process_id).await.unwrap();
        assert_eq!(row.last_status, ProcessStatus::Completed);
    }
}
