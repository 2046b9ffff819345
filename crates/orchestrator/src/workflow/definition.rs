//! The `Workflow` definition: a named, composed pipeline with the metadata
//! the rest of the engine needs to run and persist it.

use crate::form::InputForm;
use crate::workflow::outcome::Outcome;
use crate::workflow::step::{purestep, Step, StepList, Target};

/// A named, ordered pipeline of steps together with the metadata the
/// engine needs to start and persist processes for it.
#[derive(Clone)]
pub struct Workflow {
    pub name: String,
    pub target: Target,
    pub description: String,
    /// Validated against `start_process`'s `user_inputs` before any row is
    /// written. `None` means the workflow takes no starting input.
    pub initial_input_form: Option<InputForm>,
    pub steps: StepList,
}

impl Workflow {
    pub fn new(
        name: impl Into<String>,
        target: Target,
        description: impl Into<String>,
        initial_input_form: Option<InputForm>,
        steps: StepList,
    ) -> Self {
        Workflow {
            name: name.into(),
            target,
            description: description.into(),
            initial_input_form,
            steps,
        }
    }

    /// Whether this workflow is meant to be dispatched as a system task
    /// rather than addressed to a subscription (used to route between the
    /// task and workflow queue pairs).
    pub fn is_task(&self) -> bool {
        self.target == Target::System
    }
}

/// An empty pipeline prefix: composing `begin >> ...` adds no synthetic
/// step, unlike [`init`].
pub fn begin() -> StepList {
    StepList::empty()
}

/// The singleton `[Start]` pipeline. The synthetic `Start` step leaves
/// state untouched and always succeeds; its only purpose is to produce a
/// logged `Success` row marking where a process began.
pub fn init() -> StepList {
    StepList::single(purestep("Start", |state| Outcome::Success(state)))
}

/// The singleton `[Done]` pipeline: a pure step that marks the process
/// `Complete`.
pub fn done() -> StepList {
    StepList::single(purestep("Done", |state| Outcome::Complete(state)))
}

/// The singleton `[UserAborted]` pipeline, run in place of a process's
/// remaining steps when a user aborts it.
pub fn abort() -> StepList {
    StepList::single(purestep("User Aborted", |state| Outcome::Abort(state)))
}

/// A single step, kept as its own pipeline, used for focused sub-workflows.
pub fn single(step: Step) -> StepList {
    StepList::single(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::step as make_step;

    #[test]
    fn init_has_one_start_step() {
        let pipeline = init();
        assert_eq!(pipeline.len(), 1);
        assert_eq!(pipeline.steps()[0].name(), "Start");
    }

    #[test]
    fn begin_is_empty() {
        assert!(begin().is_empty());
    }

    #[test]
    fn composition_builds_a_full_pipeline() {
        let s1 = make_step("s1", &[], |_| Ok(None));
        let pipeline = init() >> s1 >> done();
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.steps()[0].name(), "Start");
        assert_eq!(pipeline.steps()[2].name(), "Done");
    }

    #[test]
    fn workflow_system_target_is_a_task() {
        let wf = Workflow::new("check", Target::System, "validation", None, init() >> done());
        assert!(wf.is_task());
    }
}
