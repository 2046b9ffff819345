//! The runtime: the `runwf` step loop, the `Engine` that wires it to
//! storage, and the `WorkflowRegistry` it looks workflows up in.

mod executor;
mod registry;

pub use executor::{
    abort_wf, create_process, runwf, Engine, ExecutorConfig, ExecutorError, LogStep, ProcessStat,
};
pub use registry::{RegistryError, WorkflowRegistry};
