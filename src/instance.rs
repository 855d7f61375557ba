// Copyright 2025 Cowboy AI, LLC.

//! The single programmatic handle to one logical saga.
//!
//! All writes flow through [`SagaInstance::update_saga_state`], which runs
//! the two-phase protocol: validate the message against a working copy of
//! the current state, durably append on success, then apply to the live
//! state. The `RwLock<SagaState>` write guard is held for the entire
//! sequence, so two concurrent writers on the same instance can never
//! interleave (§5's per-saga serialization discipline).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::context::{ContextHandle, SagaApi};
use crate::error::SagaError;
use crate::log::SagaLog;
use crate::message::{Message, MessageKind, ParentLink, SagaId, TaskName};
use crate::state::{self, SagaState, TaskState};

/// A live handle to one saga: its id, a reference to the backing log, and
/// its current projected state.
pub struct SagaInstance<L: SagaLog> {
    saga_id: SagaId,
    log: Arc<L>,
    state: RwLock<SagaState>,
}

impl<L: SagaLog> SagaInstance<L> {
    /// Wrap an already-projected state as a live instance. Used by the
    /// coordinator after folding a saga's log, or immediately after a
    /// successful `StartSaga`.
    pub fn new(log: Arc<L>, state: SagaState) -> Self {
        Self {
            saga_id: state.saga_id.clone(),
            log,
            state: RwLock::new(state),
        }
    }

    /// The id of the saga this instance handles.
    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    /// Run the two-phase write protocol for `kind`: validate against a
    /// working copy, append to the log on success, then commit the
    /// projection. On a validation failure, neither the log nor the live
    /// state are touched. On a log failure, the live state is left
    /// untouched and the error is reported as [`SagaError::PersistenceFailure`]
    /// if the log didn't already produce a typed `SagaError`.
    #[instrument(skip(self, kind), fields(saga_id = %self.saga_id))]
    pub async fn update_saga_state(&self, kind: MessageKind) -> Result<(), SagaError> {
        self.update_saga_state_with_metadata(kind, crate::message::Metadata::new()).await
    }

    /// As [`Self::update_saga_state`], but attaches `metadata` to the
    /// appended message (e.g. an `error` key recording why an optional
    /// task's forward invocation failed).
    #[instrument(skip(self, kind, metadata), fields(saga_id = %self.saga_id))]
    pub async fn update_saga_state_with_metadata(
        &self,
        kind: MessageKind,
        metadata: crate::message::Metadata,
    ) -> Result<(), SagaError> {
        let msg = Message::new(self.saga_id.clone(), kind).with_metadata(metadata);
        let mut guard = self.state.write().await;
        let candidate = state::apply(Some(&*guard), &msg)?;
        self.log.log_message(msg).await?;
        *guard = candidate;
        Ok(())
    }

    /// Begin a task's forward invocation.
    pub async fn start_task(&self, task_id: TaskName, data: Value, is_optional: bool) -> Result<(), SagaError> {
        self.update_saga_state(MessageKind::StartTask { task_id, data, is_optional }).await
    }

    /// Record a task's successful forward completion.
    pub async fn end_task(&self, task_id: TaskName, data: Value) -> Result<(), SagaError> {
        self.update_saga_state(MessageKind::EndTask { task_id, data }).await
    }

    /// Record a task's forward completion with metadata attached (used to
    /// surface an optional task's failure reason on its `EndTask` message).
    pub async fn end_task_with_metadata(
        &self,
        task_id: TaskName,
        data: Value,
        metadata: crate::message::Metadata,
    ) -> Result<(), SagaError> {
        self.update_saga_state_with_metadata(MessageKind::EndTask { task_id, data }, metadata).await
    }

    /// Mark the saga aborted.
    pub async fn abort_saga(&self) -> Result<(), SagaError> {
        self.update_saga_state(MessageKind::AbortSaga).await
    }

    /// Mark the saga completed.
    pub async fn end_saga(&self) -> Result<(), SagaError> {
        self.update_saga_state(MessageKind::EndSaga).await
    }

    /// Begin a task's compensating action.
    pub async fn start_compensating_task(&self, task_id: TaskName, data: Value) -> Result<(), SagaError> {
        self.update_saga_state(MessageKind::StartCompensatingTask { task_id, data }).await
    }

    /// Record a task's successful compensation.
    pub async fn end_compensating_task(&self, task_id: TaskName, data: Value) -> Result<(), SagaError> {
        self.update_saga_state(MessageKind::EndCompensatingTask { task_id, data }).await
    }

    /// Shallow-merge `delta` into the saga's context.
    pub async fn update_saga_context(&self, delta: Map<String, Value>) -> Result<(), SagaError> {
        self.update_saga_state(MessageKind::UpdateSagaContext { delta }).await
    }

    /// The job payload the saga was started with.
    pub async fn get_job(&self) -> Value {
        self.state.read().await.job.clone()
    }

    /// All task names seen so far, in first-started order.
    pub async fn get_task_ids(&self) -> Vec<TaskName> {
        self.state.read().await.task_state.keys().cloned().collect()
    }

    /// Whether `task_id` has a recorded `StartTask`.
    pub async fn is_task_started(&self, task_id: &TaskName) -> bool {
        self.with_task(task_id, |t| t.started).await.unwrap_or(false)
    }

    /// Whether `task_id` has a recorded `EndTask`.
    pub async fn is_task_completed(&self, task_id: &TaskName) -> bool {
        self.with_task(task_id, |t| t.completed).await.unwrap_or(false)
    }

    /// The input data recorded by `StartTask`, if started.
    pub async fn get_start_task_data(&self, task_id: &TaskName) -> Option<Value> {
        self.with_task(task_id, |t| t.start_data.clone()).await.flatten()
    }

    /// The output data recorded by `EndTask`, if completed.
    pub async fn get_end_task_data(&self, task_id: &TaskName) -> Option<Value> {
        self.with_task(task_id, |t| t.end_data.clone()).await.flatten()
    }

    /// Whether `task_id` has a recorded `StartCompensatingTask`.
    pub async fn is_compensating_task_started(&self, task_id: &TaskName) -> bool {
        self.with_task(task_id, |t| t.comp_started).await.unwrap_or(false)
    }

    /// Whether `task_id` has a recorded `EndCompensatingTask`.
    pub async fn is_compensating_task_completed(&self, task_id: &TaskName) -> bool {
        self.with_task(task_id, |t| t.comp_completed).await.unwrap_or(false)
    }

    /// The input data recorded by `StartCompensatingTask`, if started.
    pub async fn get_start_compensating_task_data(&self, task_id: &TaskName) -> Option<Value> {
        self.with_task(task_id, |t| t.start_comp_data.clone()).await.flatten()
    }

    /// The output data recorded by `EndCompensatingTask`, if completed.
    pub async fn get_end_compensating_task_data(&self, task_id: &TaskName) -> Option<Value> {
        self.with_task(task_id, |t| t.end_comp_data.clone()).await.flatten()
    }

    /// Whether `EndSaga` has applied.
    pub async fn is_saga_completed(&self) -> bool {
        self.state.read().await.saga_completed
    }

    /// Whether `AbortSaga` has applied.
    pub async fn is_saga_aborted(&self) -> bool {
        self.state.read().await.saga_aborted
    }

    /// A snapshot of the saga's shared context bag.
    pub async fn get_saga_context(&self) -> Map<String, Value> {
        self.state.read().await.saga_context.clone()
    }

    /// The parent saga/task link, if this saga was spawned by a parent task.
    pub async fn get_parent(&self) -> Option<ParentLink> {
        self.state.read().await.parent.clone()
    }

    /// A snapshot of the full projected state, for inspection and for the
    /// orchestrator's internal decisions.
    pub async fn snapshot(&self) -> SagaState {
        self.state.read().await.clone()
    }

    /// A capability-narrowed, read-only view over this instance, safe to
    /// hand to a task callback.
    pub fn as_read_only(self: &Arc<Self>) -> ReadOnlySagaView<L> {
        ReadOnlySagaView { inner: self.clone() }
    }

    async fn with_task<T>(&self, task_id: &TaskName, f: impl FnOnce(&TaskState) -> T) -> Option<T> {
        self.state.read().await.task_state.get(task_id).map(f)
    }
}

/// Read-only capability over a [`SagaInstance`]. Exposes only the read
/// operations, so a task callback handed one cannot mutate saga state
/// outside the engine's own write path.
#[derive(Clone)]
pub struct ReadOnlySagaView<L: SagaLog> {
    inner: Arc<SagaInstance<L>>,
}

impl<L: SagaLog> ReadOnlySagaView<L> {
    /// The id of the saga this view reads from.
    pub fn saga_id(&self) -> &SagaId {
        self.inner.saga_id()
    }

    /// See [`SagaInstance::get_job`].
    pub async fn get_job(&self) -> Value {
        self.inner.get_job().await
    }

    /// See [`SagaInstance::get_task_ids`].
    pub async fn get_task_ids(&self) -> Vec<TaskName> {
        self.inner.get_task_ids().await
    }

    /// See [`SagaInstance::is_task_started`].
    pub async fn is_task_started(&self, task_id: &TaskName) -> bool {
        self.inner.is_task_started(task_id).await
    }

    /// See [`SagaInstance::is_task_completed`].
    pub async fn is_task_completed(&self, task_id: &TaskName) -> bool {
        self.inner.is_task_completed(task_id).await
    }

    /// See [`SagaInstance::is_saga_completed`].
    pub async fn is_saga_completed(&self) -> bool {
        self.inner.is_saga_completed().await
    }

    /// See [`SagaInstance::is_saga_aborted`].
    pub async fn is_saga_aborted(&self) -> bool {
        self.inner.is_saga_aborted().await
    }

    /// See [`SagaInstance::get_saga_context`].
    pub async fn get_saga_context(&self) -> Map<String, Value> {
        self.inner.get_saga_context().await
    }
}

#[async_trait]
impl<L: SagaLog + 'static> SagaApi for ReadOnlySagaView<L> {
    fn saga_id(&self) -> &SagaId {
        self.inner.saga_id()
    }

    async fn get_job(&self) -> Value {
        self.inner.get_job().await
    }

    async fn is_task_started(&self, task_id: &TaskName) -> bool {
        self.inner.is_task_started(task_id).await
    }

    async fn is_task_completed(&self, task_id: &TaskName) -> bool {
        self.inner.is_task_completed(task_id).await
    }

    async fn is_saga_completed(&self) -> bool {
        self.inner.is_saga_completed().await
    }

    async fn is_saga_aborted(&self) -> bool {
        self.inner.is_saga_aborted().await
    }

    async fn get_saga_context(&self) -> Map<String, Value> {
        self.inner.get_saga_context().await
    }
}

#[async_trait]
impl<L: SagaLog + 'static> ContextHandle for SagaInstance<L> {
    async fn get(&self) -> Map<String, Value> {
        self.get_saga_context().await
    }

    async fn update(&self, delta: Map<String, Value>) -> Result<(), SagaError> {
        self.update_saga_context(delta).await
    }
}
