// Copyright 2025 Cowboy AI, LLC.

//! # cim-saga
//!
//! Persistent, recoverable saga orchestration: a log-structured workflow
//! execution engine with compensation (the "distributed saga" pattern).
//!
//! A saga is a linear sequence of steps, each with a forward action and an
//! optional compensating (undo) action. The engine never holds execution
//! state only in memory: every transition is first appended to a
//! [`SagaLog`](log::SagaLog) and only then applied to the in-memory
//! projection, so a crash at any point is recovered from by re-folding the
//! log and re-entering the orchestrator — never by special-case recovery
//! logic.
//!
//! ## Components
//!
//! - [`message`] — the immutable event records ([`message::Message`]) that
//!   are the unit of persistence and replay.
//! - [`context`] — the capability bundle ([`context::StepContext`],
//!   [`context::CompensationContext`]) handed to task callbacks instead of
//!   raw state access.
//! - [`log`] — the append-only persistence interface ([`log::SagaLog`]),
//!   with [`log::memory::InMemoryLog`] and [`log::document::DocumentLog`]
//!   reference backends.
//! - [`state`] — the pure fold ([`state::apply`]) from a message sequence to
//!   a [`state::SagaState`] projection.
//! - [`instance`] — [`instance::SagaInstance`], the single programmatic
//!   handle to one live saga.
//! - [`definition`] — [`definition::Definition`], a validated linear
//!   sequence of [`definition::Step`]s.
//! - [`coordinator`] — [`coordinator::Coordinator`], the lifecycle entry
//!   point (create, recover, abort/delete with children).
//! - [`orchestrator`] — [`orchestrator::Orchestrator`], the central
//!   algorithm driving a saga against its definition to a terminal state.
//! - [`cleanup`] — [`cleanup::CleanupService`], a background scanner that
//!   bounds log growth by retiring old terminal sagas.
//! - [`inspection`] — a read-only query adapter for an external dashboard.
//! - [`error`] — the crate's error taxonomy.
//!
//! This crate has no CLI, HTTP surface, or UI; it depends only on the
//! [`log::SagaLog`] persistence interface, not a concrete durable backend.

#![warn(missing_docs)]

pub mod cleanup;
pub mod context;
pub mod coordinator;
pub mod definition;
pub mod error;
pub mod inspection;
pub mod instance;
pub mod log;
pub mod message;
pub mod orchestrator;
pub mod state;

pub use context::{CompensationContext, ContextHandle, MiddlewareOutcome, SagaApi, StepContext};
pub use coordinator::{Coordinator, RecoveryMode};
pub use definition::{Definition, DefinitionError, Middleware, Step, Task};
pub use error::{SagaError, SagaResult, SagaTaskError};
pub use instance::{ReadOnlySagaView, SagaInstance};
pub use log::SagaLog;
pub use message::{Message, MessageKind, Metadata, ParentLink, SagaId, TaskName};
pub use orchestrator::{Orchestrator, ObserverErrorSink, SagaEvent, SagaObserver};
pub use state::{SagaState, TaskState};
