//! The bundled `SYSTEM`-target validation workflow: a fixed sequence of
//! plain steps, each checking one registry/catalog invariant and raising
//! a `StepError` on violation. The product catalog, translation bundle,
//! fixed-input configuration, and subscription store this workflow reads
//! are external collaborators outside this crate's scope, so each check
//! is written against a small trait the deployment implements; an
//! in-memory implementation of each backs the tests here.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::WorkflowRegistry;
use crate::workflow::{done, init, step, State, StepError, StepList, Target};

/// A workflow as recorded in the database, compared against what's
/// actually registered in code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRecord {
    pub name: String,
    pub target: Target,
    pub description: String,
}

pub trait WorkflowCatalog: Send + Sync {
    fn db_workflows(&self) -> Vec<WorkflowRecord>;
    fn has_translation(&self, workflow_name: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub name: String,
    pub active: bool,
    pub workflow_names: HashSet<String>,
    pub workflow_targets: HashSet<Target>,
}

pub trait ProductCatalog: Send + Sync {
    fn products(&self) -> Vec<ProductRecord>;
}

#[derive(Debug, Clone)]
pub struct FixedInputRecord {
    pub name: String,
    pub value: String,
    pub tag: String,
}

/// `allowed_values(name)` and `required_for_tag(tag)` describe the
/// configuration a deployment ships; `db_fixed_inputs()` is what's
/// actually persisted for active products.
pub trait FixedInputCatalog: Send + Sync {
    fn allowed_values(&self, name: &str) -> Option<Vec<String>>;
    fn required_for_tag(&self, tag: &str) -> Vec<String>;
    fn db_fixed_inputs(&self) -> Vec<FixedInputRecord>;
}

pub trait SubscriptionCatalog: Send + Sync {
    fn subscription_ids(&self) -> Vec<Uuid>;
    fn rehydrate(&self, subscription_id: Uuid) -> Result<(), String>;
}

/// The collaborators the validation workflow's steps read from. Held as
/// trait objects so a deployment's real database-backed implementations
/// slot in without this crate depending on them.
#[derive(Clone)]
pub struct ValidationContext {
    pub registry: Arc<WorkflowRegistry>,
    pub workflows: Arc<dyn WorkflowCatalog>,
    pub products: Arc<dyn ProductCatalog>,
    pub fixed_inputs: Arc<dyn FixedInputCatalog>,
    pub subscriptions: Arc<dyn SubscriptionCatalog>,
}

const COMPLETE_TARGETS: [Target; 4] = [Target::Create, Target::Modify, Target::Terminate, Target::Validate];

/// Build the 8-step validation pipeline bound to `ctx`. The sixth check
/// (product workflow-target completeness) reports into state rather than
/// raising, matching its source: an operational signal, not a hard
/// failure.
pub fn validation_workflow(ctx: ValidationContext) -> StepList {
    init()
        >> registry_db_parity_step(ctx.clone())
        >> matching_targets_and_descriptions_step(ctx.clone())
        >> translations_step(ctx.clone())
        >> products_have_a_workflow_step(ctx.clone())
        >> products_have_modify_note_step(ctx.clone())
        >> products_have_complete_targets_step(ctx.clone())
        >> fixed_input_config_step(ctx.clone())
        >> subscription_rehydration_step(ctx)
        >> done()
}

fn registry_db_parity_step(ctx: ValidationContext) -> crate::workflow::Step {
    step("Check all workflows in database", &[], move |_state| {
        let in_code: HashSet<String> = ctx.registry.workflow_names().into_iter().map(String::from).collect();
        let in_db: HashSet<String> = ctx.workflows.db_workflows().into_iter().map(|w| w.name).collect();

        let not_in_db: Vec<&String> = in_code.difference(&in_db).collect();
        let not_in_code: Vec<&String> = in_db.difference(&in_code).collect();
        if !not_in_db.is_empty() || !not_in_code.is_empty() {
            return Err(StepError::other(format!(
                "found missing workflows in database or implementations: not in db={not_in_db:?}, not in registry={not_in_code:?}"
            )));
        }
        Ok(state_flag("check_all_workflows_are_in_db"))
    })
}

fn matching_targets_and_descriptions_step(ctx: ValidationContext) -> crate::workflow::Step {
    step("Check workflows for matching targets and descriptions", &[], move |_state| {
        let mut mismatches = Vec::new();
        for record in ctx.workflows.db_workflows() {
            if let Ok(wf) = ctx.registry.get(&record.name) {
                if wf.target != record.target || wf.description != record.description {
                    mismatches.push(format!(
                        "{}: {} <=> {}, {} <=> {}",
                        record.name, wf.target, record.target, wf.description, record.description
                    ));
                }
            }
        }
        if !mismatches.is_empty() {
            return Err(StepError::other(format!(
                "workflows with non-matching targets and descriptions: {}",
                mismatches.join("\n")
            )));
        }
        Ok(state_flag("check_workflows_for_matching_targets_and_descriptions"))
    })
}

fn translations_step(ctx: ValidationContext) -> crate::workflow::Step {
    step("Check workflow translations", &[], move |_state| {
        let missing: Vec<&str> = ctx
            .registry
            .workflow_names()
            .into_iter()
            .filter(|name| !ctx.workflows.has_translation(name))
            .collect();
        if !missing.is_empty() {
            return Err(StepError::other(format!("workflows with missing translations: {missing:?}")));
        }
        Ok(state_flag("check_workflow_translations"))
    })
}

fn products_have_a_workflow_step(ctx: ValidationContext) -> crate::workflow::Step {
    step("Check that all products have at least one workflow", &[], move |_state| {
        let without_wf: Vec<String> = ctx
            .products
            .products()
            .into_iter()
            .filter(|p| p.workflow_names.is_empty())
            .map(|p| p.name)
            .collect();
        if !without_wf.is_empty() {
            return Err(StepError::other(format!(
                "found products that do not have a workflow associated with them: {without_wf:?}"
            )));
        }
        Ok(state_flag("check_that_products_have_at_least_one_workflow"))
    })
}

fn products_have_modify_note_step(ctx: ValidationContext) -> crate::workflow::Step {
    step("Check that all active products have a modify note", &[], move |_state| {
        let missing: Vec<String> = ctx
            .products
            .products()
            .into_iter()
            .filter(|p| p.active && !p.workflow_names.contains("modify_note"))
            .map(|p| p.name)
            .collect();
        if !missing.is_empty() {
            return Err(StepError::other(format!(
                "found products that do not have a modify_note workflow: {missing:?}"
            )));
        }
        Ok(state_flag("check_that_active_products_have_a_modify_note"))
    })
}

fn products_have_complete_targets_step(ctx: ValidationContext) -> crate::workflow::Step {
    step("Check that all products have a create, modify, terminate and validate workflow", &[], move |_state| {
        let incomplete: Vec<String> = ctx
            .products
            .products()
            .into_iter()
            .filter(|p| p.active)
            .filter(|p| !COMPLETE_TARGETS.iter().all(|t| p.workflow_targets.contains(t)))
            .map(|p| p.name)
            .collect();

        let mut result = state_flag("check_that_products_have_create_modify_and_terminate_workflows");
        result.insert(
            "products_without_at_least_create_modify_terminate_validate_workflows".to_string(),
            json!(incomplete),
        );
        Ok(Some(result))
    })
}

fn fixed_input_config_step(ctx: ValidationContext) -> crate::workflow::Step {
    step("Check the DB fixed input config", &[], move |_state| {
        let mut errors = Vec::new();
        for fi in ctx.fixed_inputs.db_fixed_inputs() {
            match ctx.fixed_inputs.allowed_values(&fi.name) {
                Some(values) if values.contains(&fi.value) => {}
                _ => errors.push(format!("{}={} is not an allowed value", fi.name, fi.value)),
            }
            let required = ctx.fixed_inputs.required_for_tag(&fi.tag);
            if required.is_empty() {
                errors.push(format!("tag `{}` has no configured fixed inputs", fi.tag));
            }
        }
        if !errors.is_empty() {
            return Err(StepError::other(format!("errors in fixed input config: {errors:?}")));
        }
        Ok(state_flag("check_db_fixed_input_config"))
    })
}

fn subscription_rehydration_step(ctx: ValidationContext) -> crate::workflow::Step {
    step("Check subscription models", &[], move |_state| {
        let mut failures = Vec::new();
        for id in ctx.subscriptions.subscription_ids() {
            if let Err(e) = ctx.subscriptions.rehydrate(id) {
                failures.push(format!("{id}: {e}"));
            }
        }
        if !failures.is_empty() {
            return Err(StepError::other(format!("found subscriptions that could not be loaded: {failures:?}")));
        }
        Ok(state_flag("check_subscription_models"))
    })
}

fn state_flag(name: &str) -> Option<State> {
    let mut state = State::new();
    state.insert(name.to_string(), Value::Bool(true));
    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutorConfig;
    use crate::persistence::{InMemoryProcessStore, ProcessStore};
    use crate::workflow::Workflow;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FakeWorkflowCatalog {
        db: Vec<WorkflowRecord>,
        translations: HashSet<String>,
    }
    impl WorkflowCatalog for FakeWorkflowCatalog {
        fn db_workflows(&self) -> Vec<WorkflowRecord> {
            self.db.clone()
        }
        fn has_translation(&self, workflow_name: &str) -> bool {
            self.translations.contains(workflow_name)
        }
    }

    struct FakeProductCatalog(Vec<ProductRecord>);
    impl ProductCatalog for FakeProductCatalog {
        fn products(&self) -> Vec<ProductRecord> {
            self.0.clone()
        }
    }

    struct FakeFixedInputCatalog {
        allowed: HashMap<String, Vec<String>>,
        required_by_tag: HashMap<String, Vec<String>>,
        db: Vec<FixedInputRecord>,
    }
    impl FixedInputCatalog for FakeFixedInputCatalog {
        fn allowed_values(&self, name: &str) -> Option<Vec<String>> {
            self.allowed.get(name).cloned()
        }
        fn required_for_tag(&self, tag: &str) -> Vec<String> {
            self.required_by_tag.get(tag).cloned().unwrap_or_default()
        }
        fn db_fixed_inputs(&self) -> Vec<FixedInputRecord> {
            self.db.clone()
        }
    }

    struct FakeSubscriptionCatalog {
        ids: Vec<Uuid>,
        broken: Mutex<HashSet<Uuid>>,
    }
    impl SubscriptionCatalog for FakeSubscriptionCatalog {
        fn subscription_ids(&self) -> Vec<Uuid> {
            self.ids.clone()
        }
        fn rehydrate(&self, subscription_id: Uuid) -> Result<(), String> {
            if self.broken.lock().contains(&subscription_id) {
                Err("could not construct domain model".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn healthy_ctx() -> ValidationContext {
        let mut registry = WorkflowRegistry::new();
        registry.register(Workflow::new("create_node", Target::Create, "create a node", None, init() >> done()));
        registry.register(Workflow::new("modify_note", Target::Modify, "modify note", None, init() >> done()));

        let db_workflows = vec![
            WorkflowRecord { name: "create_node".to_string(), target: Target::Create, description: "create a node".to_string() },
            WorkflowRecord { name: "modify_note".to_string(), target: Target::Modify, description: "modify note".to_string() },
        ];
        let translations: HashSet<String> = ["create_node", "modify_note"].iter().map(|s| s.to_string()).collect();

        let product = ProductRecord {
            name: "node".to_string(),
            active: true,
            workflow_names: ["create_node", "modify_note"].iter().map(|s| s.to_string()).collect(),
            workflow_targets: [Target::Create].iter().copied().collect(),
        };

        ValidationContext {
            registry: Arc::new(registry),
            workflows: Arc::new(FakeWorkflowCatalog { db: db_workflows, translations }),
            products: Arc::new(FakeProductCatalog(vec![product])),
            fixed_inputs: Arc::new(FakeFixedInputCatalog {
                allowed: HashMap::from([("bandwidth".to_string(), vec!["1G".to_string()])]),
                required_by_tag: HashMap::from([("NODE".to_string(), vec!["bandwidth".to_string()])]),
                db: vec![FixedInputRecord { name: "bandwidth".to_string(), value: "1G".to_string(), tag: "NODE".to_string() }],
            }),
            subscriptions: Arc::new(FakeSubscriptionCatalog { ids: vec![], broken: Mutex::new(HashSet::new()) }),
        }
    }

    async fn run_validation(ctx: ValidationContext) -> crate::workflow::Outcome {
        let store = Arc::new(InMemoryProcessStore::new());
        let workflow = Workflow::new("validate_products", Target::System, "validate", None, validation_workflow(ctx));
        let process_id = Uuid::new_v4();
        store
            .create_process(crate::persistence::NewProcessRow {
                process_id,
                workflow_name: workflow.name.clone(),
                is_task: true,
                created_by: "system".to_string(),
            })
            .await
            .unwrap();

        let mut pstat = crate::engine::ProcessStat {
            process_id,
            workflow: workflow.clone(),
            state: crate::workflow::Outcome::Success(State::new()),
            log: workflow.steps,
            current_user: "system".to_string(),
        };
        let durability = crate::persistence::Durability::new(store);
        crate::engine::runwf(&mut pstat, &durability, None, &ExecutorConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn healthy_catalogs_complete_the_validation_workflow() {
        let outcome = run_validation(healthy_ctx()).await;
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn registry_db_mismatch_fails() {
        let mut ctx = healthy_ctx();
        ctx.workflows = Arc::new(FakeWorkflowCatalog {
            db: vec![WorkflowRecord { name: "ghost_workflow".to_string(), target: Target::Create, description: "x".to_string() }],
            translations: HashSet::new(),
        });
        let outcome = run_validation(ctx).await;
        assert!(outcome.is_failed());
    }

    #[tokio::test]
    async fn incomplete_product_targets_is_reported_not_fatal() {
        let mut ctx = healthy_ctx();
        ctx.products = Arc::new(FakeProductCatalog(vec![ProductRecord {
            name: "node".to_string(),
            active: true,
            workflow_names: ["create_node", "modify_note"].iter().map(|s| s.to_string()).collect(),
            workflow_targets: HashSet::new(),
        }]));
        let outcome = run_validation(ctx).await;
        assert!(outcome.is_complete());
        let flagged = outcome
            .state()
            .get("products_without_at_least_create_modify_terminate_validate_workflows")
            .unwrap();
        assert_eq!(flagged, &json!(["node"]));
    }

    #[tokio::test]
    async fn broken_subscription_fails() {
        let mut ctx = healthy_ctx();
        let id = Uuid::new_v4();
        ctx.subscriptions = Arc::new(FakeSubscriptionCatalog {
            ids: vec![id],
            broken: Mutex::new(HashSet::from([id])),
        });
        let outcome = run_validation(ctx).await;
        assert!(outcome.is_failed());
    }
}
