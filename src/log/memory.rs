// Copyright 2025 Cowboy AI, LLC.

//! In-memory [`SagaLog`] backend: a `HashMap` per saga plus a secondary
//! parent-to-children index, guarded by a single `tokio::sync::RwLock`.
//!
//! Suitable for tests and for embedders without an external store. Entirely
//! process-local: nothing here survives a restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::SagaError;
use crate::message::{Message, MessageKind, SagaId};

use super::SagaLog;

struct SagaRecord {
    messages: Vec<Message>,
}

/// Process-local, in-memory log. Writes are serialized by a single
/// `RwLock<HashMap<..>>`, matching the storage idiom used elsewhere in this
/// codebase for process-local persistence.
#[derive(Default)]
pub struct InMemoryLog {
    sagas: RwLock<HashMap<SagaId, SagaRecord>>,
    children: RwLock<HashMap<SagaId, HashSet<SagaId>>>,
}

impl InMemoryLog {
    /// Construct an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaLog for InMemoryLog {
    async fn start_saga(&self, msg: Message) -> Result<(), SagaError> {
        let parent = match &msg.kind {
            MessageKind::StartSaga { parent, .. } => parent.clone(),
            _ => {
                return Err(SagaError::InvalidTransition(
                    "start_saga requires a StartSaga message".to_string(),
                ))
            }
        };

        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(&msg.saga_id) {
            return Err(SagaError::AlreadyExists(msg.saga_id.to_string()));
        }
        let saga_id = msg.saga_id.clone();
        sagas.insert(saga_id.clone(), SagaRecord { messages: vec![msg] });
        drop(sagas);

        if let Some(link) = parent {
            let mut children = self.children.write().await;
            children.entry(link.parent_saga_id).or_default().insert(saga_id);
        }

        debug!(saga_id = %saga_id, "saga started");
        Ok(())
    }

    async fn log_message(&self, msg: Message) -> Result<(), SagaError> {
        let mut sagas = self.sagas.write().await;
        let record = sagas
            .get_mut(&msg.saga_id)
            .ok_or_else(|| SagaError::NotFound(msg.saga_id.to_string()))?;
        record.messages.push(msg);
        Ok(())
    }

    async fn get_messages(&self, saga_id: &SagaId) -> Result<Vec<Message>, SagaError> {
        let sagas = self.sagas.read().await;
        let record = sagas
            .get(saga_id)
            .ok_or_else(|| SagaError::NotFound(saga_id.to_string()))?;
        Ok(record.messages.clone())
    }

    async fn get_active_saga_ids(&self) -> Result<HashSet<SagaId>, SagaError> {
        let sagas = self.sagas.read().await;
        Ok(sagas.keys().cloned().collect())
    }

    async fn get_child_saga_ids(&self, parent_saga_id: &SagaId) -> Result<HashSet<SagaId>, SagaError> {
        let children = self.children.read().await;
        Ok(children.get(parent_saga_id).cloned().unwrap_or_default())
    }

    async fn delete_saga(&self, saga_id: &SagaId) -> Result<(), SagaError> {
        let mut sagas = self.sagas.write().await;
        sagas.remove(saga_id);
        drop(sagas);
        let mut children = self.children.write().await;
        children.remove(saga_id);
        for set in children.values_mut() {
            set.remove(saga_id);
        }
        Ok(())
    }
}
