// Copyright 2025 Cowboy AI, LLC.

//! Immutable event records — the unit of persistence and replay.
//!
//! A [`Message`] is never mutated once constructed. `SagaState` is the
//! deterministic fold of a saga's message sequence (see [`crate::state`]).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A saga identifier. Newtype over `String` so coordinator/orchestrator
/// signatures read as domain types rather than bare strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SagaId(pub String);

impl SagaId {
    /// Generate a new random saga id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SagaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SagaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The name of a task, unique within a single [`crate::definition::Definition`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskName(pub String);

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Free-form key/value bag attached to a message. The engine recognizes
/// `is_optional` on `StartTask`; all other keys are opaque to the engine.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Identifies the owning task of a nested (child) saga, recorded only on the
/// child's `StartSaga` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    /// The parent saga's id.
    pub parent_saga_id: SagaId,
    /// The name of the task in the parent saga that spawned this saga.
    pub parent_task_id: TaskName,
}

/// The tagged variant over the eight message types of §3.1. Each variant
/// carries only the fields meaningful for it — the idiomatic replacement for
/// the source's single struct with a union of optional payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msgType")]
pub enum MessageKind {
    /// Begins a saga. `data` is the initial job payload.
    StartSaga {
        /// The job payload the saga was started with.
        data: serde_json::Value,
        /// Parent link, present only for sagas spawned by a parent task.
        parent: Option<ParentLink>,
    },
    /// Marks a saga as successfully, terminally completed.
    EndSaga,
    /// Marks a saga as aborted; compensation of completed tasks may follow.
    AbortSaga,
    /// Begins a task's forward invocation. `data` is the task's input
    /// (the previous step's end-data, or `null` for the first step).
    StartTask {
        /// The task being started.
        task_id: TaskName,
        /// Input data for the task (previous step's end-data, or null).
        data: serde_json::Value,
        /// Whether this task is optional (recorded at start time).
        is_optional: bool,
    },
    /// Records a task's successful forward completion.
    EndTask {
        /// The task that completed.
        task_id: TaskName,
        /// Output data returned by the task's invoke.
        data: serde_json::Value,
    },
    /// Begins a task's compensating (reverse) action. Only valid after
    /// `AbortSaga`, and only for tasks that reached `EndTask`.
    StartCompensatingTask {
        /// The task whose compensation is starting.
        task_id: TaskName,
        /// Input supplied to the compensate callback (the task's end-data).
        data: serde_json::Value,
    },
    /// Records a task's successful compensation.
    EndCompensatingTask {
        /// The task whose compensation completed.
        task_id: TaskName,
        /// Output returned by the compensate callback.
        data: serde_json::Value,
    },
    /// Shallow-merges `delta` into the saga's shared context bag. Invalid
    /// once the saga is completed or aborted (§3.2 invariant 5).
    UpdateSagaContext {
        /// The context delta to merge in.
        delta: serde_json::Map<String, serde_json::Value>,
    },
}

impl MessageKind {
    /// The `msgType` discriminant as it appears in §3.1, for logging and
    /// inspection.
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageKind::StartSaga { .. } => "StartSaga",
            MessageKind::EndSaga => "EndSaga",
            MessageKind::AbortSaga => "AbortSaga",
            MessageKind::StartTask { .. } => "StartTask",
            MessageKind::EndTask { .. } => "EndTask",
            MessageKind::StartCompensatingTask { .. } => "StartCompensatingTask",
            MessageKind::EndCompensatingTask { .. } => "EndCompensatingTask",
            MessageKind::UpdateSagaContext { .. } => "UpdateSagaContext",
        }
    }

    /// The task this message is scoped to, if any.
    pub fn task_id(&self) -> Option<&TaskName> {
        match self {
            MessageKind::StartTask { task_id, .. }
            | MessageKind::EndTask { task_id, .. }
            | MessageKind::StartCompensatingTask { task_id, .. }
            | MessageKind::EndCompensatingTask { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

/// An immutable event record. The unit of persistence and replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The saga this message belongs to.
    pub saga_id: SagaId,
    /// The tagged payload.
    pub kind: MessageKind,
    /// Optional key/value metadata bag.
    pub metadata: Metadata,
    /// Assigned at construction if not supplied. Monotonic ordering within a
    /// saga is the ingest order, not wall clock — this field is informational
    /// only and never used to order messages.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Construct a message with the current time as its timestamp.
    pub fn new(saga_id: SagaId, kind: MessageKind) -> Self {
        Self {
            saga_id,
            kind,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    /// Construct a message with an explicit timestamp (e.g. during replay
    /// reconstruction from a backend that already recorded one).
    pub fn with_timestamp(
        saga_id: SagaId,
        kind: MessageKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            saga_id,
            kind,
            metadata: Metadata::new(),
            timestamp,
        }
    }

    /// Attach metadata, returning self for chaining at construction time.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}
