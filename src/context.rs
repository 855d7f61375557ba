// Copyright 2025 Cowboy AI, LLC.

//! The ambient parameter bundle handed to task callbacks.
//!
//! §4.6.1 and the Design Notes ("shared mutable context as ambient
//! parameter") specify that a task body never touches raw saga state: it
//! receives a read-only [`SagaApi`] view and a [`ContextHandle`] whose
//! `get`/`update` round-trip through the message protocol. Both are defined
//! as object-safe traits here (rather than a generic parameter on
//! [`crate::definition::Task`]) so task implementations stay decoupled from
//! any particular [`crate::log::SagaLog`] backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::SagaError;
use crate::message::{SagaId, TaskName};

/// Read-only capability over the saga driving the current task. Handed to
/// callbacks as `context.api`; backed by
/// [`crate::instance::ReadOnlySagaView`].
#[async_trait]
pub trait SagaApi: Send + Sync {
    /// The id of the saga this view reads from.
    fn saga_id(&self) -> &SagaId;
    /// The job payload the saga was started with.
    async fn get_job(&self) -> Value;
    /// Whether `task_id` has a recorded `StartTask`.
    async fn is_task_started(&self, task_id: &TaskName) -> bool;
    /// Whether `task_id` has a recorded `EndTask`.
    async fn is_task_completed(&self, task_id: &TaskName) -> bool;
    /// Whether `EndSaga` has applied.
    async fn is_saga_completed(&self) -> bool;
    /// Whether `AbortSaga` has applied.
    async fn is_saga_aborted(&self) -> bool;
    /// A snapshot of the saga's shared context bag.
    async fn get_saga_context(&self) -> Map<String, Value>;
}

/// Writable capability over the saga's shared `sagaContext` bag. Both
/// methods funnel through `UpdateSagaContext`/the read side of the fold —
/// callbacks never see the raw `SagaState` map.
#[async_trait]
pub trait ContextHandle: Send + Sync {
    /// Read the current context bag.
    async fn get(&self) -> Map<String, Value>;
    /// Shallow-merge `delta` into the context bag. Fails per §3.2 invariant 5
    /// if the saga is already completed or aborted — in particular, calling
    /// this from inside a `compensate` body always fails, since compensation
    /// only runs once the saga has been aborted (DESIGN.md Open Question 2).
    async fn update(&self, delta: Map<String, Value>) -> Result<(), SagaError>;
}

/// Bundle passed to [`crate::definition::Task::invoke`]: everything §4.6.1
/// says a forward callback may consult.
pub struct StepContext {
    /// The previous step's end-data, or `null` for the first step (also
    /// `null` if the previous step was optional and failed).
    pub prev: Value,
    /// This step's accumulated middleware bag (§4.6.3): the shallow-merged
    /// union of every non-vetoing middleware's returned object, in chain
    /// order.
    pub middleware: Map<String, Value>,
    /// Read-only view of the driving saga.
    pub api: Arc<dyn SagaApi>,
    /// The id of the saga this task is running within.
    pub saga_id: SagaId,
    /// This saga's parent saga id, if it was spawned by a parent task.
    pub parent_saga_id: Option<SagaId>,
    /// This saga's parent task name, if it was spawned by a parent task.
    pub parent_task_id: Option<TaskName>,
    /// Writable handle onto the saga's shared context bag.
    pub ctx: Arc<dyn ContextHandle>,
}

/// Bundle passed to [`crate::definition::Task::compensate`]: §4.6.5's
/// `compensationContext`.
pub struct CompensationContext {
    /// The task's own end-data — the value `compensate` is undoing.
    pub task_data: Value,
    /// Always empty: "middleware (empty for compensation)" per §4.6.5.
    pub middleware: Map<String, Value>,
    /// Read-only view of the driving saga.
    pub api: Arc<dyn SagaApi>,
    /// The id of the saga this task is running within.
    pub saga_id: SagaId,
    /// This saga's parent saga id, if it was spawned by a parent task.
    pub parent_saga_id: Option<SagaId>,
    /// This saga's parent task name, if it was spawned by a parent task.
    pub parent_task_id: Option<TaskName>,
    /// Writable handle onto the saga's shared context bag. See
    /// [`ContextHandle::update`]'s doc for why calls from here always fail.
    pub ctx: Arc<dyn ContextHandle>,
}

/// Outcome of a single middleware's check (§4.6.3).
pub enum MiddlewareOutcome {
    /// Allow the step to proceed with no change to the bag.
    Allow,
    /// Allow the step to proceed, shallow-merging `delta` into the bag for
    /// subsequent middleware and for the step's `invoke`.
    AllowWithUpdate(Map<String, Value>),
    /// Veto the step — treated as if `invoke` itself had failed.
    Veto,
}
