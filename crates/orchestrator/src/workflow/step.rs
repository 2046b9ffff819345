//! The step algebra: typed `Step` values and the `>>` composition operator
//! used to assemble them into a [`StepList`].
//!
//! A step is a small function from state to state. Five shapes cover every
//! process in this engine: a plain step runs once and fails hard, a retry
//! step runs until it stops raising, a pure step never touches the state it
//! is given and only computes an [`Outcome`] from it, an input step suspends
//! for a user-supplied form, and `conditional`/`focussteps` wrap an existing
//! step rather than introducing a new primitive.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::form::{FormError, InputForm};
use crate::workflow::outcome::Outcome;

/// The mutable bag of values threaded through a running process.
pub type State = serde_json::Map<String, Value>;

/// Who is responsible for acting on a process parked in this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Assignee {
    System,
    Changes,
    Noc,
}

impl Default for Assignee {
    fn default() -> Self {
        Assignee::System
    }
}

impl fmt::Display for Assignee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Assignee::System => "SYSTEM",
            Assignee::Changes => "CHANGES",
            Assignee::Noc => "NOC",
        };
        f.write_str(s)
    }
}

/// The lifecycle operation a workflow performs against a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Target {
    Create,
    Modify,
    Terminate,
    Validate,
    System,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Target::Create => "CREATE",
            Target::Modify => "MODIFY",
            Target::Terminate => "TERMINATE",
            Target::Validate => "VALIDATE",
            Target::System => "SYSTEM",
        };
        f.write_str(s)
    }
}

/// The composed shape of a step, carried as persisted metadata. Wrapping
/// combinators (`conditional`, `focussteps`) report their own tag here even
/// though execution defers to the step they wrap; see
/// [`Step::effective_kind`] for the tag that actually drives retry
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Plain,
    Input,
    Retry,
    Pure,
    Conditional,
    Focus,
}

/// An error raised out of a step body. The three shapes mirror the
/// distinction the durability layer needs to make between data
/// inconsistencies, a collaborator being down, and everything else.
#[derive(Debug, Clone)]
pub enum StepError {
    /// An invariant the step expected of its input state did not hold.
    Assertion(String),
    /// A downstream system (inventory, provisioning API, ...) is unreachable.
    ApiUnavailable(String),
    /// Any other failure, tagged with a class name for diagnostics.
    Other { class: String, message: String },
}

impl StepError {
    pub fn assertion(message: impl Into<String>) -> Self {
        StepError::Assertion(message.into())
    }

    pub fn api_unavailable(message: impl Into<String>) -> Self {
        StepError::ApiUnavailable(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        StepError::Other {
            class: "StepError".to_string(),
            message: message.into(),
        }
    }

    pub fn with_class(class: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Other {
            class: class.into(),
            message: message.into(),
        }
    }

    pub(crate) fn class_name(&self) -> &str {
        match self {
            StepError::Assertion(_) => "AssertionError",
            StepError::ApiUnavailable(_) => "ApiException",
            StepError::Other { class, .. } => class,
        }
    }

    pub(crate) fn message(&self) -> &str {
        match self {
            StepError::Assertion(m) => m,
            StepError::ApiUnavailable(m) => m,
            StepError::Other { message, .. } => message,
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name(), self.message())
    }
}

impl std::error::Error for StepError {}

/// A step body returns the partial state update to merge on top of the
/// current state, or `None` to leave it unchanged. Missing declared
/// parameters are the caller's bug, not the step's, so they surface as a
/// `StepError::Other` rather than a panic.
pub type StepFn = Arc<dyn Fn(&State) -> Result<Option<State>, StepError> + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&State) -> bool + Send + Sync>;
pub type PureCtor = Arc<dyn Fn(State) -> Outcome + Send + Sync>;

pub(crate) enum StepBody {
    Plain(StepFn),
    Retry(StepFn),
    Pure(PureCtor),
    Input(InputForm),
    Conditional { predicate: PredicateFn, inner: Box<Step> },
    Focus { key: String, inner: Box<Step> },
}

/// What running a step's body produced, before the runtime turns it into an
/// [`Outcome`] and hands it to the durability layer.
pub(crate) enum RunOutcome {
    /// A plain/retry/input step succeeded; state to merge.
    Success(State),
    /// A pure step or a skipped conditional already produced a full outcome.
    Direct(Outcome),
    /// An input step rejected its resume payloads; never persisted.
    FormRejected(FormError),
}

/// A single unit of work in a process pipeline.
///
/// `Step` is cheap to clone (an `Arc` around its body) so the same step
/// value can be reused across many [`StepList`]s, as `conditional` and
/// `focussteps` both do.
#[derive(Clone)]
pub struct Step {
    name: Arc<str>,
    assignee: Assignee,
    params: Arc<[String]>,
    body: Arc<StepBody>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("assignee", &self.assignee)
            .field("kind", &self.kind())
            .finish()
    }
}

impl Step {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn assignee(&self) -> Assignee {
        self.assignee
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// The step's own composed shape (`Conditional`/`Focus` for wrappers).
    pub fn kind(&self) -> StepKind {
        match &*self.body {
            StepBody::Plain(_) => StepKind::Plain,
            StepBody::Retry(_) => StepKind::Retry,
            StepBody::Pure(_) => StepKind::Pure,
            StepBody::Input(_) => StepKind::Input,
            StepBody::Conditional { .. } => StepKind::Conditional,
            StepBody::Focus { .. } => StepKind::Focus,
        }
    }

    /// The kind of the innermost wrapped step, used to decide whether a
    /// raised error should park the process as `Waiting` (retry) or
    /// `Failed` (everything else).
    pub fn effective_kind(&self) -> StepKind {
        match &*self.body {
            StepBody::Conditional { inner, .. } => inner.effective_kind(),
            StepBody::Focus { inner, .. } => inner.effective_kind(),
            _ => self.kind(),
        }
    }

    /// The form behind this step (or whatever it wraps), if it is an input
    /// step. `None` for every other step shape.
    pub(crate) fn input_form(&self) -> Option<&InputForm> {
        match &*self.body {
            StepBody::Input(form) => Some(form),
            StepBody::Conditional { inner, .. } => inner.input_form(),
            StepBody::Focus { inner, .. } => inner.input_form(),
            _ => None,
        }
    }

    fn with_body(name: impl Into<String>, assignee: Assignee, params: &[&str], body: StepBody) -> Step {
        Step {
            name: Arc::from(name.into()),
            assignee,
            params: Arc::from(params.iter().map(|s| s.to_string()).collect::<Vec<_>>()),
            body: Arc::new(body),
        }
    }

    pub(crate) fn body(&self) -> &StepBody {
        &self.body
    }

    /// Run this step (and anything it wraps) against `state`. `resume` is
    /// only meaningful for an input step encountered as the very first step
    /// of a `runwf` call; everywhere else it is `None`.
    pub(crate) fn run(&self, state: &State, resume: Option<&[Value]>) -> Result<RunOutcome, StepError> {
        match &*self.body {
            StepBody::Plain(f) | StepBody::Retry(f) => {
                let sub = select_params(state, &self.params)?;
                let update = f(&sub)?;
                Ok(RunOutcome::Success(merge(state, update)))
            }
            StepBody::Pure(ctor) => Ok(RunOutcome::Direct(ctor(state.clone()))),
            StepBody::Input(form) => match resume {
                None => {
                    let schema = form.first_page(state);
                    let mut suspended = state.clone();
                    suspended.insert(
                        "__form__".to_string(),
                        serde_json::to_value(&schema).unwrap_or(Value::Null),
                    );
                    Ok(RunOutcome::Direct(Outcome::Suspend(suspended)))
                }
                Some(payloads) => match form.apply_all(state, payloads) {
                    Ok(updated) => Ok(RunOutcome::Success(updated)),
                    Err(e) => Ok(RunOutcome::FormRejected(e)),
                },
            },
            StepBody::Conditional { predicate, inner } => {
                if predicate(state) {
                    inner.run(state, resume)
                } else {
                    Ok(RunOutcome::Direct(Outcome::Skipped(state.clone())))
                }
            }
            StepBody::Focus { key, inner } => {
                let sub = focus_substate(state, key);
                let result = inner.run(&sub, resume)?;
                Ok(refocus(result, state, key))
            }
        }
    }
}

fn select_params(state: &State, params: &[String]) -> Result<State, StepError> {
    if params.is_empty() {
        return Ok(state.clone());
    }
    let mut sub = State::new();
    for p in params {
        match state.get(p) {
            Some(v) => {
                sub.insert(p.clone(), v.clone());
            }
            None => {
                return Err(StepError::other(format!(
                    "step declares parameter `{p}` but it is missing from state"
                )));
            }
        }
    }
    Ok(sub)
}

pub(crate) fn merge(base: &State, update: Option<State>) -> State {
    match update {
        None => base.clone(),
        Some(update) => {
            let mut merged = base.clone();
            merged.extend(update);
            merged
        }
    }
}

fn focus_substate(outer: &State, key: &str) -> State {
    match outer.get(key).and_then(Value::as_object) {
        Some(inner) => inner.clone(),
        None => State::new(),
    }
}

fn refocus(result: RunOutcome, outer: &State, key: &str) -> RunOutcome {
    match result {
        RunOutcome::Success(inner_state) => RunOutcome::Success(refocus_state(outer, key, inner_state)),
        RunOutcome::Direct(outcome) => {
            RunOutcome::Direct(outcome.map_state(|inner_state| refocus_state(outer, key, inner_state)))
        }
        rejected @ RunOutcome::FormRejected(_) => rejected,
    }
}

fn refocus_state(outer: &State, key: &str, inner_state: State) -> State {
    let mut merged = outer.clone();
    merged.insert(key.to_string(), Value::Object(inner_state));
    merged
}

/// A step that runs its body once; any raised error fails the process.
pub fn step(
    name: impl Into<String>,
    params: &[&str],
    f: impl Fn(&State) -> Result<Option<State>, StepError> + Send + Sync + 'static,
) -> Step {
    Step::with_body(name, Assignee::System, params, StepBody::Plain(Arc::new(f)))
}

/// A step whose unclassified errors park the process as `Waiting` instead
/// of `Failed`, so a later `resume_process` call retries it in place.
pub fn retrystep(
    name: impl Into<String>,
    params: &[&str],
    f: impl Fn(&State) -> Result<Option<State>, StepError> + Send + Sync + 'static,
) -> Step {
    Step::with_body(name, Assignee::System, params, StepBody::Retry(Arc::new(f)))
}

/// A step that suspends for user input the first time it runs, and applies
/// the submitted form payloads the next time `runwf` reaches it.
pub fn inputstep(name: impl Into<String>, assignee: Assignee, form: InputForm) -> Step {
    Step::with_body(name, assignee, &[], StepBody::Input(form))
}

/// A step that computes an [`Outcome`] directly from the state it is given,
/// without the plain success/merge machinery. Used for the `Done` and
/// `UserAborted` singleton steps, and for custom terminal steps.
pub fn purestep(name: impl Into<String>, ctor: impl Fn(State) -> Outcome + Send + Sync + 'static) -> Step {
    Step::with_body(name, Assignee::System, &[], StepBody::Pure(Arc::new(ctor)))
}

/// Gate a step behind a predicate over the current state: when the
/// predicate is false the step is skipped (state passes through
/// unchanged) instead of running.
pub fn conditional<P>(predicate: P) -> impl Fn(Step) -> Step
where
    P: Fn(&State) -> bool + Send + Sync + 'static,
{
    let predicate: PredicateFn = Arc::new(predicate);
    move |inner: Step| Step {
        name: inner.name.clone(),
        assignee: inner.assignee,
        params: inner.params.clone(),
        body: Arc::new(StepBody::Conditional {
            predicate: predicate.clone(),
            inner: Box::new(inner),
        }),
    }
}

/// Run a step against the sub-object stored under `key` in the outer
/// state, merging its result back under that same key. Lets a workflow
/// reuse a step written against a self-contained sub-state.
pub fn focussteps(key: impl Into<String>) -> impl Fn(Step) -> Step {
    let key: Arc<str> = Arc::from(key.into());
    move |inner: Step| {
        let key = key.to_string();
        Step {
            name: inner.name.clone(),
            assignee: inner.assignee,
            params: inner.params.clone(),
            body: Arc::new(StepBody::Focus {
                key,
                inner: Box::new(inner),
            }),
        }
    }
}

/// An ordered sequence of steps, assembled with the associative `>>`
/// operator. `StepList` is the unit both `Workflow::steps` and
/// `ProcessStat::log` are expressed in.
#[derive(Debug, Clone, Default)]
pub struct StepList(pub(crate) Vec<Step>);

impl StepList {
    pub fn empty() -> Self {
        StepList(Vec::new())
    }

    pub fn single(step: Step) -> Self {
        StepList(vec![step])
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        StepList(steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::ops::Shr<Step> for Step {
    type Output = StepList;
    fn shr(self, rhs: Step) -> StepList {
        StepList(vec![self, rhs])
    }
}

impl std::ops::Shr<StepList> for Step {
    type Output = StepList;
    fn shr(self, rhs: StepList) -> StepList {
        let mut v = Vec::with_capacity(1 + rhs.0.len());
        v.push(self);
        v.extend(rhs.0);
        StepList(v)
    }
}

impl std::ops::Shr<Step> for StepList {
    type Output = StepList;
    fn shr(mut self, rhs: Step) -> StepList {
        self.0.push(rhs);
        self
    }
}

impl std::ops::Shr<StepList> for StepList {
    type Output = StepList;
    fn shr(mut self, rhs: StepList) -> StepList {
        self.0.extend(rhs.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_ok(_: &State) -> Result<Option<State>, StepError> {
        Ok(None)
    }

    #[test]
    fn shr_composes_steps_into_a_list() {
        let a = step("a", &[], noop_ok);
        let b = step("b", &[], noop_ok);
        let c = step("c", &[], noop_ok);
        let list = a >> b >> c;
        assert_eq!(list.len(), 3);
        assert_eq!(list.steps()[0].name(), "a");
        assert_eq!(list.steps()[2].name(), "c");
    }

    #[test]
    fn shr_is_associative_over_steplists() {
        let a = StepList::single(step("a", &[], noop_ok));
        let b = StepList::single(step("b", &[], noop_ok));
        let c = StepList::single(step("c", &[], noop_ok));
        let left = (a.clone() >> b.clone()) >> c.clone();
        let right = a >> (b >> c);
        let left_names: Vec<_> = left.steps().iter().map(Step::name).collect();
        let right_names: Vec<_> = right.steps().iter().map(Step::name).collect();
        assert_eq!(left_names, right_names);
    }

    #[test]
    fn conditional_wraps_without_changing_identity() {
        let inner = step("maybe", &[], noop_ok);
        let gate = conditional(|s: &State| s.contains_key("go"));
        let wrapped = gate(inner);
        assert_eq!(wrapped.name(), "maybe");
        assert_eq!(wrapped.kind(), StepKind::Conditional);
        assert_eq!(wrapped.effective_kind(), StepKind::Plain);
    }

    #[test]
    fn missing_declared_param_is_a_step_error() {
        let s = step("needs_x", &["x"], |state: &State| {
            Ok(Some(state.clone()))
        });
        let err = s.run(&State::new(), None).unwrap_err();
        assert!(matches!(err, StepError::Other { .. }));
    }
}
