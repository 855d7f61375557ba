// Copyright 2025 Cowboy AI, LLC.

//! Read-only query adapter consumed by an external dashboard (out of scope
//! for this crate). Plain, serde-serializable data types only — no HTTP or
//! framework coupling.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::Coordinator;
use crate::error::SagaError;
use crate::log::SagaLog;
use crate::message::{SagaId, TaskName};
use crate::state::{self, SagaState};

/// How deep to recurse into child sagas when building a [`SagaInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildDepth {
    /// Omit child saga information entirely.
    #[default]
    None,
    /// Include child summaries without their own nested children.
    Shallow,
    /// Recurse fully.
    Full,
}

/// A saga's overall lifecycle state, derived from its folded projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Neither completed nor terminally aborted.
    Active,
    /// `EndSaga` applied.
    Completed,
    /// Terminally aborted.
    Aborted,
}

/// A task's lifecycle state within its saga, derived from the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// No `StartTask` recorded.
    NotStarted,
    /// `StartTask` recorded, no `EndTask`.
    Started,
    /// `EndTask` recorded, no compensation in progress.
    Completed,
    /// `StartCompensatingTask` recorded, no `EndCompensatingTask`.
    Compensating,
    /// `EndCompensatingTask` recorded.
    Compensated,
}

/// Per-task summary within a [`SagaInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// The task's name.
    pub task_name: TaskName,
    /// The task's derived status.
    pub status: TaskStatus,
    /// Input data, if started.
    pub data: Option<serde_json::Value>,
    /// Whether this task is optional.
    pub is_optional: bool,
    /// Timestamp of this task's `StartTask` message, if started.
    pub started_at: Option<DateTime<Utc>>,
    /// Timestamp of this task's `EndTask` message, if completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// The failure reason recorded on an optional task's `EndTask` message
    /// (see `OptionalTaskFailed`), if any.
    pub error: Option<String>,
}

/// Summary of one saga, as returned by [`InspectionSource::get_saga_info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInfo {
    /// The saga's id.
    pub saga_id: SagaId,
    /// The saga's derived status.
    pub status: SagaStatus,
    /// Timestamp of the saga's first message.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the saga's last message.
    pub updated_at: DateTime<Utc>,
    /// The initial job payload.
    pub job: serde_json::Value,
    /// The parent saga's id, if this saga was spawned by a parent task.
    pub parent_saga_id: Option<SagaId>,
    /// The parent task's name, if this saga was spawned by a parent task.
    pub parent_task_id: Option<TaskName>,
    /// Per-task summaries, in replay order.
    pub tasks: Vec<TaskInfo>,
    /// Child saga summaries, present only when requested via [`ChildDepth`].
    pub child_sagas: Option<Vec<SagaInfo>>,
}

fn task_status(state: &SagaState, task: &TaskName) -> TaskStatus {
    let Some(t) = state.task_state.get(task) else {
        return TaskStatus::NotStarted;
    };
    if t.comp_completed {
        TaskStatus::Compensated
    } else if t.comp_started {
        TaskStatus::Compensating
    } else if t.completed {
        TaskStatus::Completed
    } else if t.started {
        TaskStatus::Started
    } else {
        TaskStatus::NotStarted
    }
}

/// Scan `messages` for `task`'s `StartTask`/`EndTask` timestamps and, if its
/// `EndTask` carried an `error` metadata key (set when an optional task's
/// forward invocation failed), that error string.
fn task_timing(
    messages: &[crate::message::Message],
    task: &TaskName,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>, Option<String>) {
    let mut started_at = None;
    let mut completed_at = None;
    let mut error = None;

    for m in messages {
        match &m.kind {
            crate::message::MessageKind::StartTask { task_id, .. } if task_id == task => {
                started_at.get_or_insert(m.timestamp);
            }
            crate::message::MessageKind::EndTask { task_id, .. } if task_id == task => {
                completed_at = Some(m.timestamp);
                error = m.metadata.get("error").and_then(|v| v.as_str()).map(str::to_string);
            }
            _ => {}
        }
    }

    (started_at, completed_at, error)
}

fn saga_status(state: &SagaState) -> SagaStatus {
    if state.saga_completed {
        SagaStatus::Completed
    } else if state.saga_aborted {
        SagaStatus::Aborted
    } else {
        SagaStatus::Active
    }
}

/// Read-only query surface over one named log instance ("source"). A
/// dashboard binary (out of scope for this crate) would implement its
/// listing of sources and delegate per-source queries to this trait.
#[async_trait]
pub trait InspectionSource: Send + Sync {
    /// List every saga id known to this source. When `root_only`, filter to
    /// sagas with no parent link.
    async fn list_sagas(&self, root_only: bool) -> Result<Vec<SagaId>, SagaError>;

    /// Fold `saga_id`'s log and summarize it, recursing into children per
    /// `depth`.
    async fn get_saga_info(&self, saga_id: &SagaId, depth: ChildDepth) -> Result<SagaInfo, SagaError>;

    /// Equivalent to `Coordinator::abort_with_children`.
    async fn abort_saga(&self, saga_id: &SagaId) -> Result<(), SagaError>;

    /// Equivalent to `Coordinator::delete_with_children`.
    async fn delete_saga(&self, saga_id: &SagaId) -> Result<(), SagaError>;
}

/// Build a [`SagaInfo`] directly from a log and a folded state, without
/// recursing into children. Shared by concrete [`InspectionSource`]
/// implementations (one per [`crate::log::SagaLog`] backend) so each only
/// has to supply child traversal.
pub fn summarize(saga_id: &SagaId, messages: &[crate::message::Message], state: &SagaState) -> SagaInfo {
    let created_at = messages.first().map(|m| m.timestamp).unwrap_or_else(Utc::now);
    let updated_at = messages.last().map(|m| m.timestamp).unwrap_or(created_at);

    let tasks = state
        .task_state
        .iter()
        .map(|(name, t)| {
            let (started_at, completed_at, error) = task_timing(messages, name);
            TaskInfo {
                task_name: name.clone(),
                status: task_status(state, name),
                data: t.start_data.clone(),
                is_optional: t.is_optional,
                started_at,
                completed_at,
                error,
            }
        })
        .collect();

    SagaInfo {
        saga_id: saga_id.clone(),
        status: saga_status(state),
        created_at,
        updated_at,
        job: state.job.clone(),
        parent_saga_id: state.parent.as_ref().map(|p| p.parent_saga_id.clone()),
        parent_task_id: state.parent.as_ref().map(|p| p.parent_task_id.clone()),
        tasks,
        child_sagas: None,
    }
}

/// Default [`InspectionSource`] backed directly by a [`SagaLog`], via a
/// [`Coordinator`] for the mutating operations.
pub struct LogInspectionSource<L: SagaLog> {
    log: Arc<L>,
    coordinator: Coordinator<L>,
}

impl<L: SagaLog> LogInspectionSource<L> {
    /// Build an inspection source over `log`.
    pub fn new(log: Arc<L>) -> Self {
        Self {
            coordinator: Coordinator::new(log.clone()),
            log,
        }
    }

    async fn info_at_depth(&self, saga_id: &SagaId, depth: ChildDepth) -> Result<SagaInfo, SagaError> {
        let messages = self.log.get_messages(saga_id).await?;
        let folded = state::fold(&messages)?.ok_or_else(|| SagaError::NotFound(saga_id.to_string()))?;
        let mut info = summarize(saga_id, &messages, &folded);

        if matches!(depth, ChildDepth::Shallow | ChildDepth::Full) {
            let child_ids = self.log.get_child_saga_ids(saga_id).await?;
            let mut children = Vec::with_capacity(child_ids.len());
            for child_id in child_ids {
                let child_depth = if matches!(depth, ChildDepth::Full) {
                    ChildDepth::Full
                } else {
                    ChildDepth::None
                };
                children.push(Box::pin(self.info_at_depth(&child_id, child_depth)).await?);
            }
            info.child_sagas = Some(children);
        }

        Ok(info)
    }
}

#[async_trait]
impl<L: SagaLog> InspectionSource for LogInspectionSource<L> {
    async fn list_sagas(&self, root_only: bool) -> Result<Vec<SagaId>, SagaError> {
        let ids = self.log.get_active_saga_ids().await?;
        if !root_only {
            return Ok(ids.into_iter().collect());
        }
        let mut roots = Vec::new();
        for id in ids {
            let messages = self.log.get_messages(&id).await?;
            let has_parent = messages
                .first()
                .map(|m| matches!(&m.kind, crate::message::MessageKind::StartSaga { parent: Some(_), .. }))
                .unwrap_or(false);
            if !has_parent {
                roots.push(id);
            }
        }
        Ok(roots)
    }

    async fn get_saga_info(&self, saga_id: &SagaId, depth: ChildDepth) -> Result<SagaInfo, SagaError> {
        self.info_at_depth(saga_id, depth).await
    }

    async fn abort_saga(&self, saga_id: &SagaId) -> Result<(), SagaError> {
        self.coordinator.abort_with_children(saga_id).await
    }

    async fn delete_saga(&self, saga_id: &SagaId) -> Result<(), SagaError> {
        self.coordinator.delete_with_children(saga_id).await
    }
}
