//! A small registry of sample workflows so the CLI has something to
//! start, resume, and inspect without a real subscription domain model
//! wired in behind it.

use subscr_orchestrator::form::require_string;
use subscr_orchestrator::{
    done, init, inputstep, step, Assignee, FormField, FormSpec, InputForm, RegistryError, State,
    StepError, Target, Workflow, WorkflowRegistry,
};

fn create_node_workflow() -> Workflow {
    let form = InputForm::single(
        FormSpec::new(
            "Node details",
            vec![FormField::new("node_name", "string", true), FormField::new("tag", "string", true)],
        ),
        |_state, payload| {
            let node_name = require_string(payload, "node_name")?;
            let tag = require_string(payload, "tag")?;
            let mut update = State::new();
            update.insert("node_name".into(), node_name.into());
            update.insert("tag".into(), tag.into());
            Ok(update)
        },
    );

    let pipeline = init()
        >> inputstep("Provide node details", Assignee::Changes, form)
        >> step("Reserve node name", &["node_name"], |state| {
            let name = state.get("node_name").and_then(|v| v.as_str()).unwrap_or_default();
            if name.is_empty() {
                return Err(StepError::assertion("node_name must not be empty"));
            }
            Ok(None)
        })
        >> step("Provision node", &[], |_state| Ok(None))
        >> done();

    // No top-level starting form: this workflow suspends for its input
    // mid-pipeline via the `inputstep` above instead of validating inputs
    // at `start_process` time.
    Workflow::new("create_node", Target::Create, "Create a new network node", None, pipeline)
}

fn terminate_node_workflow() -> Workflow {
    let pipeline = init()
        >> step("Deprovision node", &[], |_state| Ok(None))
        >> step("Release node name", &[], |_state| Ok(None))
        >> done();
    Workflow::new("terminate_node", Target::Terminate, "Terminate a network node", None, pipeline)
}

pub fn registry() -> Result<WorkflowRegistry, RegistryError> {
    let mut registry = WorkflowRegistry::new();
    registry.register(create_node_workflow());
    registry.register(terminate_node_workflow());
    Ok(registry)
}
