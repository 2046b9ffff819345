//! Lookup table from workflow name to its [`Workflow`] definition.

use std::collections::HashMap;

use thiserror::Error;

use crate::workflow::Workflow;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no workflow registered under the name `{0}`")]
    UnknownWorkflow(String),
}

/// Holds every workflow definition the engine knows how to start. A
/// process always records the name it was started under, so the registry
/// is keyed by that name rather than by type.
#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Workflow>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        WorkflowRegistry {
            workflows: HashMap::new(),
        }
    }

    pub fn register(&mut self, workflow: Workflow) {
        self.workflows.insert(workflow.name.clone(), workflow);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Workflow, RegistryError> {
        self.workflows
            .get(name)
            .ok_or_else(|| RegistryError::UnknownWorkflow(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn workflow_names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{done, init, Target};

    fn dummy(name: &str) -> Workflow {
        Workflow::new(name, Target::Create, "test", None, init() >> done())
    }

    #[test]
    fn register_and_get_round_trip() {
        let mut registry = WorkflowRegistry::new();
        registry.register(dummy("create_node"));
        assert!(registry.contains("create_node"));
        assert_eq!(registry.get("create_node").unwrap().name, "create_node");
    }

    #[test]
    fn unknown_workflow_is_an_error() {
        let registry = WorkflowRegistry::new();
        assert_eq!(
            registry.get("missing").unwrap_err(),
            RegistryError::UnknownWorkflow("missing".to_string())
        );
    }
}
