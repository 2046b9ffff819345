//! The form protocol for input steps.
//!
//! The original engine models an input step as a generator that yields a
//! form class and resumes with the submitted payload, possibly more than
//! once for a multi-page form. Without generators, the same contract is
//! expressed as a pair of plain functions keyed by page index:
//! `form_for(page, state) -> FormSpec` to describe what to show, and
//! `apply(page, state, payload) -> State` to validate and fold a submitted
//! payload back into the state. `InputForm` is that pair, plus the page
//! count the pipeline expects to receive back from `resume_process` in one
//! call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::workflow::State;

/// One field of a form page, enough to describe a schema to a caller that
/// renders it (a CLI prompt, a web form, ...) without this crate knowing
/// anything about presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub type_name: String,
    pub required: bool,
    #[serde(default)]
    pub choices: Vec<String>,
}

impl FormField {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, required: bool) -> Self {
        FormField {
            name: name.into(),
            type_name: type_name.into(),
            required,
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }
}

/// The schema for a single form page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSpec {
    pub title: String,
    pub fields: Vec<FormField>,
}

impl FormSpec {
    pub fn new(title: impl Into<String>, fields: Vec<FormField>) -> Self {
        FormSpec {
            title: title.into(),
            fields,
        }
    }
}

/// A rejected form submission. Never persisted as a process step; the
/// caller of `resume_process`/`start_process` gets this back directly.
#[derive(Debug, Clone, Error)]
pub enum FormError {
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}` expected type {expected}")]
    WrongType { field: String, expected: String },
    #[error("field `{field}` is not one of the allowed choices")]
    InvalidChoice { field: String },
    #[error("this form expects {expected} page(s) of input, received {received}")]
    PageCountMismatch { expected: usize, received: usize },
}

pub type FormForFn = Arc<dyn Fn(usize, &State) -> FormSpec + Send + Sync>;
pub type FormApplyFn = Arc<dyn Fn(usize, &State, &Value) -> Result<State, FormError> + Send + Sync>;

/// A (possibly multi-page) form attached to an input step or to a
/// workflow's starting input.
#[derive(Clone)]
pub struct InputForm {
    pages: usize,
    form_for: FormForFn,
    apply: FormApplyFn,
}

impl InputForm {
    /// A single-page form: one schema, one payload.
    pub fn single(
        spec: FormSpec,
        apply: impl Fn(&State, &Value) -> Result<State, FormError> + Send + Sync + 'static,
    ) -> Self {
        let spec = Arc::new(spec);
        InputForm {
            pages: 1,
            form_for: Arc::new(move |_page, _state| (*spec).clone()),
            apply: Arc::new(move |_page, state, payload| apply(state, payload)),
        }
    }

    /// A form spanning `pages` pages, each described and applied
    /// independently; `apply` for page *N* sees the state already updated
    /// by pages `0..N`.
    pub fn multi_page(
        pages: usize,
        form_for: impl Fn(usize, &State) -> FormSpec + Send + Sync + 'static,
        apply: impl Fn(usize, &State, &Value) -> Result<State, FormError> + Send + Sync + 'static,
    ) -> Self {
        InputForm {
            pages,
            form_for: Arc::new(form_for),
            apply: Arc::new(apply),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages
    }

    pub(crate) fn first_page(&self, state: &State) -> FormSpec {
        (self.form_for)(0, state)
    }

    pub fn page(&self, index: usize, state: &State) -> FormSpec {
        (self.form_for)(index, state)
    }

    /// Drive every page of this form against the payloads supplied in one
    /// `resume_process` call, returning the fully merged state.
    pub(crate) fn apply_all(&self, state: &State, payloads: &[Value]) -> Result<State, FormError> {
        if payloads.len() != self.pages {
            return Err(FormError::PageCountMismatch {
                expected: self.pages,
                received: payloads.len(),
            });
        }
        let mut current = state.clone();
        for (index, payload) in payloads.iter().enumerate() {
            let update = (self.apply)(index, &current, payload)?;
            current.extend(update);
        }
        Ok(current)
    }
}

/// Pull a required string field out of a submitted payload.
pub fn require_string(payload: &Value, field: &str) -> Result<String, FormError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FormError::MissingField(field.to_string()))
}

/// Pull a required integer field out of a submitted payload.
pub fn require_i64(payload: &Value, field: &str) -> Result<i64, FormError> {
    payload
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| FormError::WrongType {
            field: field.to_string(),
            expected: "integer".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_form() -> InputForm {
        InputForm::single(
            FormSpec::new("name", vec![FormField::new("subscriber_name", "string", true)]),
            |_state, payload| {
                let name = require_string(payload, "subscriber_name")?;
                let mut update = State::new();
                update.insert("subscriber_name".into(), Value::String(name));
                Ok(update)
            },
        )
    }

    #[test]
    fn single_page_form_merges_submitted_value() {
        let form = sample_form();
        let result = form
            .apply_all(&State::new(), &[json!({ "subscriber_name": "Alice" })])
            .unwrap();
        assert_eq!(result.get("subscriber_name").unwrap(), "Alice");
    }

    #[test]
    fn missing_field_is_rejected() {
        let form = sample_form();
        let err = form.apply_all(&State::new(), &[json!({})]).unwrap_err();
        assert!(matches!(err, FormError::MissingField(_)));
    }

    #[test]
    fn wrong_number_of_pages_is_rejected() {
        let form = sample_form();
        let err = form.apply_all(&State::new(), &[]).unwrap_err();
        assert!(matches!(err, FormError::PageCountMismatch { expected: 1, received: 0 }));
    }

    #[test]
    fn multi_page_form_threads_state_between_pages() {
        let form = InputForm::multi_page(
            2,
            |page, _state| match page {
                0 => FormSpec::new("first", vec![FormField::new("a", "string", true)]),
                _ => FormSpec::new("second", vec![FormField::new("b", "string", true)]),
            },
            |page, state, payload| {
                let mut update = state.clone();
                if page == 0 {
                    update.insert("a".into(), Value::String(require_string(payload, "a")?));
                } else {
                    update.insert("b".into(), Value::String(require_string(payload, "b")?));
                }
                Ok(update)
            },
        );
        let result = form
            .apply_all(&State::new(), &[json!({"a": "x"}), json!({"b": "y"})])
            .unwrap();
        assert_eq!(result.get("a").unwrap(), "x");
        assert_eq!(result.get("b").unwrap(), "y");
    }
}
