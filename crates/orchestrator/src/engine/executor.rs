//! The runtime: `ProcessStat`, the `runwf` loop that drives it through its
//! remaining steps, and the `Engine` that wires `runwf` to a `ProcessStore`
//! and a `WorkflowRegistry`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::form::FormError;
use crate::persistence::{Durability, NewProcessRow, ProcessRow, ProcessStore, StoreError};
use crate::workflow::{Outcome, RunOutcome, Step, StepKind, StepList, StepStatus, Workflow};

use super::registry::{RegistryError, WorkflowRegistry};

/// Tunables for the executor; currently just a cap on how long a single
/// pipeline is allowed to run before the engine refuses to keep going,
/// guarding against an accidentally-infinite `StepList`.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_steps_per_run: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            max_steps_per_run: 10_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("form validation failed: {0}")]
    Form(#[from] FormError),
    #[error("logging step `{step}` failed and could not be recovered: {source}")]
    LogStep {
        step: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("process {0} ran for more than {1} steps in a single pass")]
    TooManySteps(Uuid, usize),
}

/// The in-memory cursor `runwf` advances: which process, which workflow,
/// the outcome of the step most recently run, and the steps still to go.
pub struct ProcessStat {
    pub process_id: Uuid,
    pub workflow: Workflow,
    pub state: Outcome,
    pub log: StepList,
    pub current_user: String,
}

/// The durability contract `runwf` logs each step outcome through.
/// Implemented directly by `Durability<S>` for production, and by a
/// simple in-memory recorder in tests.
#[async_trait]
pub trait LogStep: Send + Sync {
    async fn log(&self, process_id: Uuid, step: &Step, outcome: Outcome) -> Result<Outcome, anyhow::Error>;
}

#[async_trait]
impl<S: ProcessStore> LogStep for Durability<S> {
    async fn log(&self, process_id: Uuid, step: &Step, outcome: Outcome) -> Result<Outcome, anyhow::Error> {
        Ok(self.log_step(process_id, "system", step, outcome).await?)
    }
}

/// Classify a raised `StepError` into the `Outcome` it produces: an
/// assertion or API failure is always `Failed` regardless of step kind;
/// any other error is `Waiting` for a retry step and `Failed` otherwise.
fn classify(step: &Step, err: crate::workflow::StepError) -> Outcome {
    let mut state = crate::workflow::State::new();
    state.insert("class".to_string(), Value::String(err.class_name().to_string()));
    state.insert("error".to_string(), Value::String(err.message().to_string()));

    match &err {
        crate::workflow::StepError::Assertion(_) | crate::workflow::StepError::ApiUnavailable(_) => {
            Outcome::Failed(state)
        }
        crate::workflow::StepError::Other { .. } => {
            if step.effective_kind() == StepKind::Retry {
                Outcome::Waiting(state)
            } else {
                Outcome::Failed(state)
            }
        }
    }
}

/// Drive `pstat` through its remaining log, persisting each step's outcome
/// through `logstep`, until a step produces a non-continuable outcome
/// (suspend, waiting, failed, abort, complete) or the log is exhausted.
///
/// `resume_inputs`, if present, is handed only to the very first step in
/// `pstat.log` — the one the caller is resuming — and ignored for every
/// step after that.
pub async fn runwf(
    pstat: &mut ProcessStat,
    logstep: &dyn LogStep,
    mut resume_inputs: Option<Vec<Value>>,
    config: &ExecutorConfig,
) -> Result<Outcome, ExecutorError> {
    let steps = pstat.log.steps().to_vec();
    if steps.len() > config.max_steps_per_run {
        return Err(ExecutorError::TooManySteps(pstat.process_id, steps.len()));
    }

    for (index, step) in steps.iter().enumerate() {
        if matches!(pstat.state, Outcome::Failed(_) | Outcome::Abort(_) | Outcome::Complete(_)) {
            pstat.log = StepList::from_steps(steps[index..].to_vec());
            return Ok(pstat.state.clone());
        }

        let resume = if index == 0 { resume_inputs.take() } else { None };
        let input_state = pstat.state.state().clone();

        let outcome = match step.run(&input_state, resume.as_deref()) {
            Ok(RunOutcome::Success(s)) => Outcome::Success(s),
            Ok(RunOutcome::Direct(outcome)) => outcome,
            Ok(RunOutcome::FormRejected(e)) => return Err(ExecutorError::Form(e)),
            Err(e) => classify(step, e),
        };

        let logged = logstep
            .log(pstat.process_id, step, outcome)
            .await
            .map_err(|source| ExecutorError::LogStep {
                step: step.name().to_string(),
                source,
            })?;
        pstat.state = logged;

        if !pstat.state.is_continuable() {
            pstat.log = StepList::from_steps(steps[index + 1..].to_vec());
            return Ok(pstat.state.clone());
        }
    }

    pstat.log = StepList::empty();
    Ok(pstat.state.clone())
}

/// Run the singleton `abort` pipeline against a process's current state,
/// producing the `User Aborted` outcome it always ends in.
pub async fn abort_wf(pstat: &ProcessStat, logstep: &dyn LogStep, config: &ExecutorConfig) -> Result<Outcome, ExecutorError> {
    let mut aborting = ProcessStat {
        process_id: pstat.process_id,
        workflow: pstat.workflow.clone(),
        state: pstat.state.clone(),
        log: crate::workflow::abort(),
        current_user: pstat.current_user.clone(),
    };
    runwf(&mut aborting, logstep, None, config).await
}

/// Wires `runwf` to a `ProcessStore` and a `WorkflowRegistry`: loads a
/// process's current cursor from storage, runs it, and relies on
/// `Durability` (driven from inside `runwf`) to persist every step along
/// the way.
pub struct Engine<S: ProcessStore> {
    store: Arc<S>,
    registry: Arc<parking_lot::RwLock<WorkflowRegistry>>,
    config: ExecutorConfig,
    broadcast: Option<crate::persistence::BroadcastFn>,
}

impl<S: ProcessStore> Engine<S> {
    pub fn new(store: Arc<S>, registry: WorkflowRegistry) -> Self {
        Engine {
            store,
            registry: Arc::new(parking_lot::RwLock::new(registry)),
            config: ExecutorConfig::default(),
            broadcast: None,
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_broadcast(mut self, broadcast: crate::persistence::BroadcastFn) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<parking_lot::RwLock<WorkflowRegistry>> {
        &self.registry
    }

    /// Reconstruct a `ProcessStat` from a process's persisted row and step
    /// history: the workflow definition, the outcome the last logged step
    /// produced, and the steps of its pipeline not yet executed. Errors if
    /// the process's workflow has since been removed from the registry;
    /// starting, resuming, and aborting all require the live definition.
    #[instrument(skip(self))]
    pub async fn load_process_stat(&self, row: &ProcessRow) -> Result<ProcessStat, ExecutorError> {
        let workflow = self.registry.read().get(&row.workflow_name)?.clone();
        self.build_process_stat(row, workflow).await
    }

    /// Like [`Engine::load_process_stat`], but tolerant of a workflow that
    /// has been removed from the live registry: the process row still
    /// persists and can be inspected, it just falls back to an empty
    /// placeholder pipeline instead of erroring. Used only by
    /// `ProcessApi::load_process`; nothing here can be resumed or started,
    /// since `run_started`/`run_resumed`/`run_aborted` go through
    /// `load_process_stat` and keep refusing a removed workflow.
    #[instrument(skip(self))]
    pub async fn load_process_stat_for_inspection(&self, row: &ProcessRow) -> Result<ProcessStat, ExecutorError> {
        let workflow = match self.registry.read().get(&row.workflow_name) {
            Ok(workflow) => workflow.clone(),
            Err(_) => removed_workflow_placeholder(&row.workflow_name),
        };
        self.build_process_stat(row, workflow).await
    }

    async fn build_process_stat(&self, row: &ProcessRow, workflow: Workflow) -> Result<ProcessStat, ExecutorError> {
        let steps_run = self.store.steps_for(row.process_id).await?;

        let last_state = match steps_run.last() {
            Some(last) => outcome_from_row(last),
            None => Outcome::Success(crate::workflow::State::new()),
        };

        let remaining = remaining_steps(&workflow, &steps_run);

        Ok(ProcessStat {
            process_id: row.process_id,
            workflow,
            state: last_state,
            log: StepList::from_steps(remaining),
            current_user: row.created_by.clone(),
        })
    }

    /// Run a freshly created process from its first step.
    #[instrument(skip(self))]
    pub async fn run_started(&self, process_id: Uuid, user: String) -> Result<Outcome, ExecutorError> {
        let row = self.store.get_process(process_id).await?;
        let mut pstat = self.load_process_stat(&row).await?;
        pstat.current_user = user;
        let durability = self.durability();
        let result = runwf(&mut pstat, &durability, None, &self.config).await;
        self.log_terminal_outcome(process_id, &result);
        result
    }

    /// Resume a suspended or waiting process with freshly submitted
    /// inputs (form payloads for a suspended process, nothing for a
    /// waiting retry step).
    #[instrument(skip(self, resume_inputs))]
    pub async fn run_resumed(
        &self,
        process_id: Uuid,
        user: String,
        resume_inputs: Vec<Value>,
    ) -> Result<Outcome, ExecutorError> {
        let row = self.store.get_process(process_id).await?;
        let mut pstat = self.load_process_stat(&row).await?;
        pstat.current_user = user;
        let inputs = if resume_inputs.is_empty() { None } else { Some(resume_inputs) };
        let durability = self.durability();
        let result = runwf(&mut pstat, &durability, inputs, &self.config).await;
        self.log_terminal_outcome(process_id, &result);
        result
    }

    /// Abort a running process in place.
    #[instrument(skip(self))]
    pub async fn run_aborted(&self, process_id: Uuid, user: String) -> Result<Outcome, ExecutorError> {
        let row = self.store.get_process(process_id).await?;
        let mut pstat = self.load_process_stat(&row).await?;
        pstat.current_user = user;
        let durability = self.durability();
        let result = abort_wf(&pstat, &durability, &self.config).await;
        self.log_terminal_outcome(process_id, &result);
        result
    }

    fn durability(&self) -> Durability<S> {
        let durability = Durability::new(self.store.clone());
        match &self.broadcast {
            Some(b) => durability.with_broadcast(b.clone()),
            None => durability,
        }
    }

    fn log_terminal_outcome(&self, process_id: Uuid, result: &Result<Outcome, ExecutorError>) {
        match result {
            Ok(outcome) if outcome.is_failed() => warn!(%process_id, "process failed"),
            Ok(outcome) if outcome.is_complete() => info!(%process_id, "process completed"),
            Err(e) => warn!(%process_id, error = %e, "process run errored"),
            _ => {}
        }
    }
}

/// A sentinel standing in for a workflow that used to be registered under
/// `name` but no longer is. Carries no steps, so a process loaded against
/// it can only ever be inspected, never run.
fn removed_workflow_placeholder(name: &str) -> Workflow {
    Workflow::new(
        name,
        crate::workflow::Target::System,
        "workflow removed from the registry",
        None,
        crate::workflow::begin(),
    )
}

/// Walk the workflow's step names and the persisted step names in
/// parallel: a persisted name that matches the current workflow pointer
/// advances it, *unless* that row is the process's last recorded stop
/// (`suspend`/`waiting`), in which case the walk stops there and the step
/// is left as the first entry of the remaining log, so resuming re-runs it
/// with the freshly submitted payload instead of silently handing that
/// payload to whatever comes next. A persisted name that no longer appears
/// in the workflow (it was edited after this process last ran) is silently
/// skipped without advancing. Whatever the pointer has not reached yet is
/// the remaining log.
fn remaining_steps(workflow: &Workflow, steps_run: &[crate::persistence::ProcessStepRow]) -> Vec<Step> {
    let all = workflow.steps.steps();
    let mut cursor = 0;
    for row in steps_run {
        if cursor < all.len() && all[cursor].name() == row.name {
            if matches!(row.status, StepStatus::Suspend | StepStatus::Waiting) {
                break;
            }
            cursor += 1;
        }
    }
    all[cursor..].to_vec()
}

fn outcome_from_row(row: &crate::persistence::ProcessStepRow) -> Outcome {
    let state = row.state.clone();
    match row.status {
        crate::workflow::StepStatus::Success => Outcome::Success(state),
        crate::workflow::StepStatus::Skipped => Outcome::Skipped(state),
        crate::workflow::StepStatus::Suspend => Outcome::Suspend(state),
        crate::workflow::StepStatus::Waiting => Outcome::Waiting(state),
        crate::workflow::StepStatus::Failed => Outcome::Failed(state),
        crate::workflow::StepStatus::Abort => Outcome::Abort(state),
        crate::workflow::StepStatus::Complete => Outcome::Complete(state),
    }
}

pub async fn create_process<S: ProcessStore>(
    store: &S,
    process_id: Uuid,
    workflow_name: impl Into<String>,
    is_task: bool,
    created_by: impl Into<String>,
) -> Result<(), StoreError> {
    store
        .create_process(NewProcessRow {
            process_id,
            workflow_name: workflow_name.into(),
            is_task,
            created_by: created_by.into(),
        })
        .await
}
