// Copyright 2025 Cowboy AI, LLC.

//! In-memory projection of a saga's message sequence, and the pure fold step
//! that builds it one message at a time.
//!
//! [`apply`] is side-effect free and deterministic: given the same state and
//! message it always returns the same result, and never mutates its inputs.
//! This is what makes replay determinism (Testable Property 1) and resume
//! safety (Testable Property 7) checkable by direct unit and property tests,
//! independent of any log backend.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::message::{Message, MessageKind, ParentLink, SagaId, TaskName};

/// Per-task projection: what has been recorded for one task name so far.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskState {
    /// `StartTask` has been applied.
    pub started: bool,
    /// `EndTask` has been applied.
    pub completed: bool,
    /// Input data of `StartTask`.
    pub start_data: Option<serde_json::Value>,
    /// Output data of `EndTask`.
    pub end_data: Option<serde_json::Value>,
    /// Captured from `StartTask`'s metadata.
    pub is_optional: bool,
    /// `StartCompensatingTask` has been applied.
    pub comp_started: bool,
    /// `EndCompensatingTask` has been applied.
    pub comp_completed: bool,
    /// Input data of `StartCompensatingTask`.
    pub start_comp_data: Option<serde_json::Value>,
    /// Output data of `EndCompensatingTask`.
    pub end_comp_data: Option<serde_json::Value>,
}

/// The fold of a saga's message sequence: its current, authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaState {
    /// The saga this state belongs to.
    pub saga_id: SagaId,
    /// The initial job payload, set by `StartSaga`.
    pub job: serde_json::Value,
    /// Whether `EndSaga` has applied.
    pub saga_completed: bool,
    /// Whether `AbortSaga` has applied.
    pub saga_aborted: bool,
    /// Per-task projections, in the order tasks were first started — this
    /// preserves replay order for inspection and for reverse-order
    /// compensation bookkeeping that wants to iterate tasks deterministically.
    pub task_state: IndexMap<TaskName, TaskState>,
    /// Shared mutable context bag, updated only via `UpdateSagaContext`.
    pub saga_context: serde_json::Map<String, serde_json::Value>,
    /// Parent saga/task link, if this saga was spawned by a parent task.
    pub parent: Option<ParentLink>,
}

impl SagaState {
    /// An empty projection prior to any message having been applied. Not a
    /// valid terminal or usable state on its own — `apply` must see a
    /// `StartSaga` first.
    fn empty(saga_id: SagaId) -> Self {
        Self {
            saga_id,
            job: serde_json::Value::Null,
            saga_completed: false,
            saga_aborted: false,
            task_state: IndexMap::new(),
            saga_context: serde_json::Map::new(),
            parent: None,
        }
    }

    /// True once the saga has reached a state with no in-flight task and (if
    /// aborted) every completed task has been compensated — the precondition
    /// for `EndSaga` in §3.2 invariant 4, and also half of the terminal
    /// condition for an aborted saga.
    pub fn is_safe(&self) -> bool {
        self.task_state.values().all(|t| {
            let forward_safe = !t.started || t.completed;
            let compensation_safe = if self.saga_aborted && t.completed {
                !t.comp_started || t.comp_completed
            } else {
                true
            };
            forward_safe && compensation_safe
        })
    }

    /// Terminal per the Glossary: completed, or aborted with every completed
    /// task compensated.
    pub fn is_terminal(&self) -> bool {
        if self.saga_completed {
            return true;
        }
        self.saga_aborted
            && self
                .task_state
                .values()
                .all(|t| !t.completed || t.comp_completed)
    }
}

/// Fold one message into `state`, returning the new state or an
/// [`SagaError::InvalidTransition`] if the message violates §3.2. Never
/// mutates `state`; the caller (normally [`crate::instance::SagaInstance`])
/// is responsible for committing the result after a successful log append.
pub fn apply(state: Option<&SagaState>, msg: &Message) -> Result<SagaState, SagaError> {
    match &msg.kind {
        MessageKind::StartSaga { data, parent } => {
            if state.is_some() {
                return Err(SagaError::InvalidTransition(format!(
                    "StartSaga: saga {} already started",
                    msg.saga_id
                )));
            }
            let mut next = SagaState::empty(msg.saga_id.clone());
            next.job = data.clone();
            next.parent = parent.clone();
            Ok(next)
        }
        other => {
            let state = state.ok_or_else(|| {
                SagaError::InvalidTransition(format!(
                    "{}: saga {} has no StartSaga yet",
                    other.type_name(),
                    msg.saga_id
                ))
            })?;
            apply_to_started(state, msg)
        }
    }
}

fn apply_to_started(state: &SagaState, msg: &Message) -> Result<SagaState, SagaError> {
    if state.saga_completed || state.saga_aborted {
        let allowed_after_terminal = matches!(
            msg.kind,
            MessageKind::StartCompensatingTask { .. } | MessageKind::EndCompensatingTask { .. }
        );
        let allowed = state.saga_aborted && allowed_after_terminal;
        if !allowed {
            return Err(SagaError::InvalidTransition(format!(
                "{}: saga {} is already terminal",
                msg.kind.type_name(),
                msg.saga_id
            )));
        }
    }

    let mut next = state.clone();

    match &msg.kind {
        MessageKind::StartSaga { .. } => {
            return Err(SagaError::InvalidTransition(format!(
                "StartSaga: saga {} already started",
                msg.saga_id
            )));
        }
        MessageKind::EndSaga => {
            if next.saga_aborted {
                return Err(SagaError::InvalidTransition(
                    "EndSaga: saga is aborted".to_string(),
                ));
            }
            if !next.is_safe() {
                return Err(SagaError::InvalidTransition(
                    "EndSaga: saga is not in a safe state".to_string(),
                ));
            }
            next.saga_completed = true;
        }
        MessageKind::AbortSaga => {
            if next.saga_completed {
                return Err(SagaError::InvalidTransition(
                    "AbortSaga: saga is already completed".to_string(),
                ));
            }
            next.saga_aborted = true;
        }
        MessageKind::StartTask { task_id, data, is_optional } => {
            let entry = next.task_state.entry(task_id.clone()).or_default();
            if entry.started {
                return Err(SagaError::InvalidTransition(format!(
                    "StartTask({task_id}): already started"
                )));
            }
            entry.started = true;
            entry.start_data = Some(data.clone());
            entry.is_optional = *is_optional;
        }
        MessageKind::EndTask { task_id, data } => {
            let entry = next.task_state.get_mut(task_id).ok_or_else(|| {
                SagaError::InvalidTransition(format!("EndTask({task_id}): not started"))
            })?;
            if !entry.started {
                return Err(SagaError::InvalidTransition(format!(
                    "EndTask({task_id}): not started"
                )));
            }
            if entry.completed {
                return Err(SagaError::InvalidTransition(format!(
                    "EndTask({task_id}): already completed"
                )));
            }
            entry.completed = true;
            entry.end_data = Some(data.clone());
        }
        MessageKind::StartCompensatingTask { task_id, data } => {
            if !next.saga_aborted {
                return Err(SagaError::InvalidTransition(format!(
                    "StartCompensatingTask({task_id}): saga is not aborted"
                )));
            }
            let entry = next.task_state.get_mut(task_id).ok_or_else(|| {
                SagaError::InvalidTransition(format!(
                    "StartCompensatingTask({task_id}): task never completed"
                ))
            })?;
            if !entry.completed {
                return Err(SagaError::InvalidTransition(format!(
                    "StartCompensatingTask({task_id}): task never completed"
                )));
            }
            if entry.comp_started {
                return Err(SagaError::InvalidTransition(format!(
                    "StartCompensatingTask({task_id}): already compensating"
                )));
            }
            entry.comp_started = true;
            entry.start_comp_data = Some(data.clone());
        }
        MessageKind::EndCompensatingTask { task_id, data } => {
            let entry = next.task_state.get_mut(task_id).ok_or_else(|| {
                SagaError::InvalidTransition(format!(
                    "EndCompensatingTask({task_id}): compensation never started"
                ))
            })?;
            if !entry.comp_started {
                return Err(SagaError::InvalidTransition(format!(
                    "EndCompensatingTask({task_id}): compensation never started"
                )));
            }
            if entry.comp_completed {
                return Err(SagaError::InvalidTransition(format!(
                    "EndCompensatingTask({task_id}): compensation already completed"
                )));
            }
            entry.comp_completed = true;
            entry.end_comp_data = Some(data.clone());
        }
        MessageKind::UpdateSagaContext { delta } => {
            if next.saga_completed || next.saga_aborted {
                return Err(SagaError::InvalidTransition(
                    "UpdateSagaContext: saga is already completed or aborted".to_string(),
                ));
            }
            for (k, v) in delta {
                next.saga_context.insert(k.clone(), v.clone());
            }
        }
    }

    Ok(next)
}

/// Fold an entire message sequence from scratch. Used by the coordinator to
/// reconstruct a saga from its log, and by property tests that want to
/// compare a from-scratch fold against an incrementally-applied one.
pub fn fold(messages: &[Message]) -> Result<Option<SagaState>, SagaError> {
    let mut state: Option<SagaState> = None;
    for msg in messages {
        state = Some(apply(state.as_ref(), msg)?);
    }
    Ok(state)
}
