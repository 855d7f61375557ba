// Copyright 2025 Cowboy AI, LLC.

//! Lifecycle entry point above the log: create, recover, and tear down
//! sagas (and their transitive children).

use std::sync::Arc;

use tracing::instrument;

use crate::error::SagaError;
use crate::instance::SagaInstance;
use crate::log::SagaLog;
use crate::message::{Message, MessageKind, ParentLink, SagaId};
use crate::state::{self, SagaState};

/// Which direction to recover an in-flight saga. The coordinator never picks
/// this for the caller — it is an explicit input to [`Coordinator::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Fold the log and hand back the saga positioned at its last recorded
    /// state; the caller continues forward drive.
    Forward,
    /// Fold the log; if the saga is not already terminal and not in a safe
    /// state, append `AbortSaga` to force compensation on the next drive.
    Rollback,
}

/// Lifecycle operations above a [`SagaLog`].
pub struct Coordinator<L: SagaLog> {
    log: Arc<L>,
}

impl<L: SagaLog> Coordinator<L> {
    /// Build a coordinator over the given log.
    pub fn new(log: Arc<L>) -> Self {
        Self { log }
    }

    /// Create a new saga, optionally recording a parent link.
    #[instrument(skip(self, job), fields(saga_id = %saga_id))]
    pub async fn create_saga(
        &self,
        saga_id: SagaId,
        job: serde_json::Value,
        parent: Option<ParentLink>,
    ) -> Result<SagaInstance<L>, SagaError> {
        let msg = Message::new(saga_id.clone(), MessageKind::StartSaga { data: job, parent });
        self.log.start_saga(msg.clone()).await?;
        let state = state::apply(None, &msg)?;
        Ok(SagaInstance::new(self.log.clone(), state))
    }

    /// Fold `saga_id`'s log into a fresh state and hand back a live instance,
    /// applying `mode`'s recovery policy.
    #[instrument(skip(self), fields(saga_id = %saga_id))]
    pub async fn recover(&self, saga_id: &SagaId, mode: RecoveryMode) -> Result<SagaInstance<L>, SagaError> {
        let messages = self.log.get_messages(saga_id).await?;
        let folded = state::fold(&messages)?
            .ok_or_else(|| SagaError::NotFound(saga_id.to_string()))?;

        let state = match mode {
            RecoveryMode::Forward => folded,
            RecoveryMode::Rollback => self.maybe_force_abort(saga_id, folded).await?,
        };

        Ok(SagaInstance::new(self.log.clone(), state))
    }

    async fn maybe_force_abort(&self, saga_id: &SagaId, state: SagaState) -> Result<SagaState, SagaError> {
        // Already aborted (whether or not compensation has finished) means
        // `AbortSaga` was already applied; re-applying it is an
        // InvalidTransition (`state::apply` does not whitelist a second
        // AbortSaga). A saga that crashed mid-compensation is exactly the
        // "most needed" recovery case, so it must fall through to `Ok`
        // unchanged rather than error here.
        if state.is_terminal() || state.is_safe() || state.saga_aborted {
            return Ok(state);
        }
        let msg = Message::new(saga_id.clone(), MessageKind::AbortSaga);
        let next = state::apply(Some(&state), &msg)?;
        self.log.log_message(msg).await?;
        Ok(next)
    }

    /// Attempt recovery; on `NotFound`, fall through to creation. The
    /// idempotent bootstrap used by workers resuming (or first starting)
    /// a saga.
    #[instrument(skip(self, job), fields(saga_id = %saga_id))]
    pub async fn recover_or_create(
        &self,
        saga_id: SagaId,
        job: serde_json::Value,
        parent: Option<ParentLink>,
        mode: RecoveryMode,
    ) -> Result<SagaInstance<L>, SagaError> {
        match self.recover(&saga_id, mode).await {
            Ok(instance) => Ok(instance),
            Err(e) if e.is_not_found() => self.create_saga(saga_id, job, parent).await,
            Err(e) => Err(e),
        }
    }

    /// Abort the target saga and every transitive child not already
    /// terminal. Children are discovered by scanning `StartSaga` parent
    /// links, recursively.
    #[instrument(skip(self), fields(saga_id = %saga_id))]
    pub async fn abort_with_children(&self, saga_id: &SagaId) -> Result<(), SagaError> {
        self.abort_one(saga_id).await?;
        for child in self.log.get_child_saga_ids(saga_id).await? {
            Box::pin(self.abort_with_children(&child)).await?;
        }
        Ok(())
    }

    async fn abort_one(&self, saga_id: &SagaId) -> Result<(), SagaError> {
        let messages = self.log.get_messages(saga_id).await?;
        let Some(state) = state::fold(&messages)? else {
            return Ok(());
        };
        // Already aborted (terminally or mid-compensation) means AbortSaga
        // was already applied; skip re-applying it so a subtree abort keeps
        // walking into children instead of erroring out of the recursion.
        if state.is_terminal() || state.saga_aborted {
            return Ok(());
        }
        let msg = Message::new(saga_id.clone(), MessageKind::AbortSaga);
        state::apply(Some(&state), &msg)?;
        self.log.log_message(msg).await
    }

    /// Delete the target saga and every transitive child, via the same
    /// traversal as [`Coordinator::abort_with_children`].
    #[instrument(skip(self), fields(saga_id = %saga_id))]
    pub async fn delete_with_children(&self, saga_id: &SagaId) -> Result<(), SagaError> {
        for child in self.log.get_child_saga_ids(saga_id).await? {
            Box::pin(self.delete_with_children(&child)).await?;
        }
        self.log.delete_saga(saga_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::memory::InMemoryLog;

    fn coordinator() -> Coordinator<InMemoryLog> {
        Coordinator::new(Arc::new(InMemoryLog::new()))
    }

    #[tokio::test]
    async fn create_saga_then_recover_forward_matches_state() {
        let c = coordinator();
        let saga_id = SagaId::from("s");
        c.create_saga(saga_id.clone(), serde_json::json!({"o": 1}), None)
            .await
            .unwrap();
        let recovered = c.recover(&saga_id, RecoveryMode::Forward).await.unwrap();
        assert_eq!(recovered.get_job().await, serde_json::json!({"o": 1}));
    }

    #[tokio::test]
    async fn recover_or_create_falls_through_on_not_found() {
        let c = coordinator();
        let saga_id = SagaId::from("s");
        let instance = c
            .recover_or_create(saga_id.clone(), serde_json::json!({}), None, RecoveryMode::Forward)
            .await
            .unwrap();
        assert_eq!(instance.saga_id(), &saga_id);
    }

    #[tokio::test]
    async fn rollback_recovery_forces_abort_when_unsafe() {
        let c = coordinator();
        let saga_id = SagaId::from("s");
        let instance = c.create_saga(saga_id.clone(), serde_json::json!({}), None).await.unwrap();
        instance
            .start_task(crate::message::TaskName::from("A"), serde_json::Value::Null, false)
            .await
            .unwrap();
        // crash: A started but not completed -- not safe

        let recovered = c.recover(&saga_id, RecoveryMode::Rollback).await.unwrap();
        assert!(recovered.is_saga_aborted().await);
    }

    #[tokio::test]
    async fn rollback_recovery_of_a_saga_aborted_mid_compensation_does_not_error() {
        let c = coordinator();
        let saga_id = SagaId::from("s");
        let instance = c.create_saga(saga_id.clone(), serde_json::json!({}), None).await.unwrap();
        let task = crate::message::TaskName::from("A");
        instance.start_task(task.clone(), serde_json::Value::Null, false).await.unwrap();
        instance.end_task(task.clone(), serde_json::json!("a")).await.unwrap();
        instance.abort_saga().await.unwrap();
        instance.start_compensating_task(task, serde_json::json!("a")).await.unwrap();
        // crash: aborted, compensation started but never ended -- neither
        // terminal nor safe, and already aborted.

        let recovered = c.recover(&saga_id, RecoveryMode::Rollback).await.unwrap();
        assert!(recovered.is_saga_aborted().await);
    }

    #[tokio::test]
    async fn abort_with_children_reaches_children_even_when_parent_already_aborted() {
        let c = coordinator();
        let parent_id = SagaId::from("parent");
        let parent = c.create_saga(parent_id.clone(), serde_json::json!({}), None).await.unwrap();
        let task = crate::message::TaskName::from("A");
        parent.start_task(task.clone(), serde_json::Value::Null, false).await.unwrap();
        parent.end_task(task, serde_json::json!("a")).await.unwrap();
        parent.abort_saga().await.unwrap();
        // aborted, A completed but never compensated -- aborted-but-not-terminal

        let child_id = SagaId::from("child");
        c.create_saga(
            child_id.clone(),
            serde_json::json!({}),
            Some(ParentLink {
                parent_saga_id: parent_id.clone(),
                parent_task_id: crate::message::TaskName::from("A"),
            }),
        )
        .await
        .unwrap();

        // Must not error just because the parent is already aborted.
        c.abort_with_children(&parent_id).await.unwrap();

        let child = c.recover(&child_id, RecoveryMode::Forward).await.unwrap();
        assert!(child.is_saga_aborted().await);
    }

    #[tokio::test]
    async fn abort_with_children_propagates_to_descendants() {
        let c = coordinator();
        let parent_id = SagaId::from("parent");
        c.create_saga(parent_id.clone(), serde_json::json!({}), None).await.unwrap();
        let child_id = SagaId::from("child");
        c.create_saga(
            child_id.clone(),
            serde_json::json!({}),
            Some(ParentLink {
                parent_saga_id: parent_id.clone(),
                parent_task_id: crate::message::TaskName::from("A"),
            }),
        )
        .await
        .unwrap();

        c.abort_with_children(&parent_id).await.unwrap();

        let parent = c.recover(&parent_id, RecoveryMode::Forward).await.unwrap();
        let child = c.recover(&child_id, RecoveryMode::Forward).await.unwrap();
        assert!(parent.is_saga_aborted().await);
        assert!(child.is_saga_aborted().await);
    }

    #[tokio::test]
    async fn delete_with_children_removes_descendants() {
        let c = coordinator();
        let parent_id = SagaId::from("parent");
        c.create_saga(parent_id.clone(), serde_json::json!({}), None).await.unwrap();
        let child_id = SagaId::from("child");
        c.create_saga(
            child_id.clone(),
            serde_json::json!({}),
            Some(ParentLink {
                parent_saga_id: parent_id.clone(),
                parent_task_id: crate::message::TaskName::from("A"),
            }),
        )
        .await
        .unwrap();

        c.delete_with_children(&parent_id).await.unwrap();

        assert!(c.recover(&parent_id, RecoveryMode::Forward).await.is_err());
        assert!(c.recover(&child_id, RecoveryMode::Forward).await.is_err());
    }
}
