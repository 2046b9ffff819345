//! # Subscription Workflow Orchestrator
//!
//! A durable workflow orchestration engine for provisioning and lifecycle
//! management of network subscriptions: ordered pipelines of **steps**
//! executed against a persistent store, with interactive suspension points,
//! retry semantics, and pluggable executors.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ProcessApi                             │
//! │  (start_process, resume_process, abort_process, load_process)│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatch                               │
//! │  (ThreadPoolExecutor or WorkerQueueExecutor)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      runwf (engine)                          │
//! │  (drives a ProcessStat through its remaining StepList)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ProcessStore                             │
//! │  (Postgres: processes, process_steps, input_states)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use subscr_orchestrator::prelude::*;
//!
//! let pipeline = init() >> step1 >> step2 >> done();
//! let wf = Workflow::new("example", Target::Create, "example workflow", None, pipeline);
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod form;
pub mod persistence;
pub mod validation;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::api::{ApiError, ProcessApi};
    pub use crate::config::EngineSettings;
    pub use crate::engine::{Engine, ExecutorConfig, ExecutorError, ProcessStat, RegistryError, WorkflowRegistry};
    pub use crate::form::{FormError, FormField, FormSpec, InputForm};
    pub use crate::persistence::{InMemoryProcessStore, PostgresProcessStore, ProcessStore, StoreError};
    pub use crate::worker::{Dispatch, DispatchError, ThreadPoolExecutor, WorkerQueueExecutor, WorkerStatus};
    pub use crate::workflow::{
        abort, begin, conditional, done, focussteps, init, inputstep, purestep, retrystep, step,
        Assignee, Outcome, ProcessStatus, State, Step, StepList, StepStatus, Target, Workflow,
    };
}

// Re-export key types at crate root
pub use api::{ApiError, ProcessApi};
pub use config::EngineSettings;
pub use engine::{Engine, ExecutorConfig, ExecutorError, ProcessStat, RegistryError, WorkflowRegistry};
pub use form::{FormError, FormField, FormSpec, InputForm};
pub use persistence::{InMemoryProcessStore, PostgresProcessStore, ProcessStore, StoreError};
pub use worker::{Dispatch, DispatchError, ThreadPoolExecutor, WorkerQueueExecutor, WorkerStatus};
pub use workflow::{
    abort, begin, conditional, done, focussteps, init, inputstep, purestep, retrystep, step,
    Assignee, Outcome, ProcessStatus, State, Step, StepList, StepStatus, Target, Workflow,
};
