// Copyright 2025 Cowboy AI, LLC.

//! The ordered sequence of steps a saga executes, and the validation that
//! must pass before a definition can be handed to an orchestrator.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::{CompensationContext, MiddlewareOutcome, StepContext};
use crate::error::SagaTaskError;
use crate::message::TaskName;

/// A single step's forward and compensating logic. Implementors typically
/// close over configuration captured at definition-build time (a repository
/// handle, a client, static parameters) — the idiomatic replacement for a
/// dynamically-typed callable pair.
#[async_trait]
pub trait Task: Send + Sync {
    /// Perform the task's forward action. `ctx.prev` is the previous step's
    /// output, or `null` for the first step. Returns the data recorded on
    /// `EndTask`.
    async fn invoke(&self, ctx: &StepContext) -> Result<Value, SagaTaskError>;

    /// Undo the task's forward action. `ctx.task_data` is the data this
    /// task's `invoke` produced. Returns the data recorded on
    /// `EndCompensatingTask`. The default no-op compensation is valid for
    /// steps with nothing to undo (e.g. a pure read).
    async fn compensate(&self, _ctx: &CompensationContext) -> Result<Value, SagaTaskError> {
        Ok(Value::Null)
    }
}

/// Wraps a step's invoke/compensate with a pass/fail gate evaluated before
/// the step runs. A vetoing middleware causes the step to fail as if
/// `invoke` itself had failed (§4.6.3). A middleware may also contribute to
/// the step's accumulated middleware bag, visible to later middleware in the
/// same chain and to the step's `invoke`.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Evaluate this middleware against `task_name`/`prev` and the bag
    /// accumulated by earlier middleware in the same chain.
    async fn check(
        &self,
        task_name: &TaskName,
        prev: &Value,
        bag: &Map<String, Value>,
    ) -> Result<MiddlewareOutcome, SagaTaskError>;
}

/// One step of a [`Definition`]: a named task plus the middleware chain
/// guarding it.
pub struct Step {
    /// The step's unique name within its definition.
    pub name: TaskName,
    /// The forward/compensating logic.
    pub task: Arc<dyn Task>,
    /// Middleware evaluated, in order, before `task.invoke` runs.
    pub middleware: Vec<Arc<dyn Middleware>>,
    /// If true, this step's forward failure does not abort the saga
    /// (§4.6.2).
    pub is_optional: bool,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("is_optional", &self.is_optional)
            .field("middleware_count", &self.middleware.len())
            .finish()
    }
}

impl Step {
    /// Build a required step with no middleware.
    pub fn new(name: impl Into<TaskName>, task: Arc<dyn Task>) -> Self {
        Self {
            name: name.into(),
            task,
            middleware: Vec::new(),
            is_optional: false,
        }
    }

    /// Mark this step optional.
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    /// Append a middleware to this step's chain.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }
}

/// A single violation found while validating a [`Definition`]. Display text
/// is stable and suitable for direct inclusion in
/// [`crate::error::SagaError::InvalidDefinition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionError(pub String);

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered, validated sequence of steps. Construct via [`Definition::build`];
/// there is no public constructor that skips validation, so a `Definition` in
/// hand is always well-formed.
#[derive(Debug)]
pub struct Definition {
    name: String,
    steps: Vec<Step>,
}

impl Definition {
    /// Validate `steps` and produce a `Definition`, or every violation found.
    /// All checks run regardless of earlier failures (Testable Property 5):
    /// an empty step list, a blank or duplicate step name, and a step with
    /// no invoke path are each reported independently.
    pub fn build(name: impl Into<String>, steps: Vec<Step>) -> Result<Self, Vec<DefinitionError>> {
        let mut errors = Vec::new();

        if steps.is_empty() {
            errors.push(DefinitionError("definition has no steps".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for step in &steps {
            if step.name.0.trim().is_empty() {
                errors.push(DefinitionError("step name must not be empty".to_string()));
                continue;
            }
            if !seen.insert(step.name.clone()) {
                errors.push(DefinitionError(format!(
                    "duplicate step name: {}",
                    step.name
                )));
            }
        }

        if errors.is_empty() {
            Ok(Self {
                name: name.into(),
                steps,
            })
        } else {
            Err(errors)
        }
    }

    /// The definition's name, used in logging and inspection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Look up a step by name.
    pub fn step(&self, name: &TaskName) -> Option<&Step> {
        self.steps.iter().find(|s| &s.name == name)
    }

    /// The index of a step by name, used to resume forward execution or
    /// begin reverse compensation at the right point.
    pub fn position(&self, name: &TaskName) -> Option<usize> {
        self.steps.iter().position(|s| &s.name == name)
    }
}
