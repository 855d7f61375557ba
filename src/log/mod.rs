// Copyright 2025 Cowboy AI, LLC.

//! The persistence interface: durable, per-saga, append-only event storage.
//!
//! `SagaLog` is semantically blind — it never interprets a [`Message`], only
//! stores and returns it in append order. Two reference backends ship in
//! this crate ([`memory::InMemoryLog`] and [`document::DocumentLog`]);
//! embedders with a real database wire their own backend behind this trait.

pub mod document;
pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::SagaError;
use crate::message::{Message, SagaId};

/// Append-only, per-saga event storage.
///
/// Implementations must guarantee:
/// - append is atomic (partial writes are never observable),
/// - `get_messages` returns messages in append order,
/// - at most one `start_saga` succeeds for a given `sagaId` (unique-constraint
///   semantics — concurrent callers racing on the same id must see exactly
///   one success and the rest [`SagaError::AlreadyExists`]).
#[async_trait]
pub trait SagaLog: Send + Sync {
    /// Create a new sequence for `saga_id` whose first message is the given
    /// `StartSaga` message. `msg.kind` must be `MessageKind::StartSaga`.
    async fn start_saga(&self, msg: Message) -> Result<(), SagaError>;

    /// Append `msg` to an existing sequence.
    async fn log_message(&self, msg: Message) -> Result<(), SagaError>;

    /// Return the full, ordered message sequence for `saga_id`.
    async fn get_messages(&self, saga_id: &SagaId) -> Result<Vec<Message>, SagaError>;

    /// Return every saga id currently present in the log.
    async fn get_active_saga_ids(&self) -> Result<HashSet<SagaId>, SagaError>;

    /// Return the ids of sagas whose `StartSaga` names `parent_saga_id` as
    /// parent.
    async fn get_child_saga_ids(&self, parent_saga_id: &SagaId) -> Result<HashSet<SagaId>, SagaError>;

    /// Remove the sequence for `saga_id`. A no-op if absent (idempotent).
    async fn delete_saga(&self, saga_id: &SagaId) -> Result<(), SagaError>;
}
