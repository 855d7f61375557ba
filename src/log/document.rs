// Copyright 2025 Cowboy AI, LLC.

//! Document-store-shaped [`SagaLog`] backend.
//!
//! Models the shape described for a document database: one document per
//! saga (`SagaDocument`), append realized as a push onto its `messages`
//! array, a unique index on `saga_id` giving `AlreadyExists` semantics. This
//! backend has no live database driver behind it — embedders with a real
//! document store (MongoDB or similar) implement [`SagaLog`] directly against
//! their driver, using this module as the reference shape.
//!
//! Because there is no server-side document-size cap to enforce here, growth
//! of `messages` past [`DocumentLog::SOFT_MESSAGE_CAP`] is only logged, never
//! rejected — an in-crate reference backend cannot reproduce a real
//! document database's hard document-size limit.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::SagaError;
use crate::message::{Message, MessageKind, SagaId};

use super::SagaLog;

/// One saga's document: `{ sagaId, messages, createdAt, updatedAt }`.
#[derive(Debug, Clone)]
pub struct SagaDocument {
    /// The saga this document belongs to.
    pub saga_id: SagaId,
    /// All messages appended so far, in append order.
    pub messages: Vec<Message>,
    /// Set once, at document creation.
    pub created_at: DateTime<Utc>,
    /// Bumped on every append.
    pub updated_at: DateTime<Utc>,
}

/// Document-store-shaped in-process backend.
pub struct DocumentLog {
    documents: RwLock<HashMap<SagaId, SagaDocument>>,
    soft_cap: usize,
}

impl DocumentLog {
    /// Default soft cap on `messages` length past which appends are still
    /// accepted but logged as a warning, approximating a document database's
    /// hard per-document size limit.
    pub const SOFT_MESSAGE_CAP: usize = 10_000;

    /// Construct an empty log using the default soft cap.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            soft_cap: Self::SOFT_MESSAGE_CAP,
        }
    }

    /// Construct an empty log with an explicit soft cap, for tests that want
    /// to exercise the warning path without appending thousands of messages.
    pub fn with_soft_cap(soft_cap: usize) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            soft_cap,
        }
    }

    fn parent_of(msg: &Message) -> Option<SagaId> {
        match &msg.kind {
            MessageKind::StartSaga { parent, .. } => parent.as_ref().map(|p| p.parent_saga_id.clone()),
            _ => None,
        }
    }
}

impl Default for DocumentLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SagaLog for DocumentLog {
    async fn start_saga(&self, msg: Message) -> Result<(), SagaError> {
        if !matches!(msg.kind, MessageKind::StartSaga { .. }) {
            return Err(SagaError::InvalidTransition(
                "start_saga requires a StartSaga message".to_string(),
            ));
        }
        let mut documents = self.documents.write().await;
        if documents.contains_key(&msg.saga_id) {
            return Err(SagaError::AlreadyExists(msg.saga_id.to_string()));
        }
        let now = msg.timestamp;
        documents.insert(
            msg.saga_id.clone(),
            SagaDocument {
                saga_id: msg.saga_id.clone(),
                messages: vec![msg],
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn log_message(&self, msg: Message) -> Result<(), SagaError> {
        let mut documents = self.documents.write().await;
        let doc = documents
            .get_mut(&msg.saga_id)
            .ok_or_else(|| SagaError::NotFound(msg.saga_id.to_string()))?;
        doc.updated_at = msg.timestamp;
        doc.messages.push(msg);
        if doc.messages.len() > self.soft_cap {
            warn!(
                saga_id = %doc.saga_id,
                message_count = doc.messages.len(),
                soft_cap = self.soft_cap,
                "saga document has grown past the soft message cap"
            );
        }
        Ok(())
    }

    async fn get_messages(&self, saga_id: &SagaId) -> Result<Vec<Message>, SagaError> {
        let documents = self.documents.read().await;
        let doc = documents
            .get(saga_id)
            .ok_or_else(|| SagaError::NotFound(saga_id.to_string()))?;
        Ok(doc.messages.clone())
    }

    async fn get_active_saga_ids(&self) -> Result<HashSet<SagaId>, SagaError> {
        let documents = self.documents.read().await;
        Ok(documents.keys().cloned().collect())
    }

    async fn get_child_saga_ids(&self, parent_saga_id: &SagaId) -> Result<HashSet<SagaId>, SagaError> {
        let documents = self.documents.read().await;
        Ok(documents
            .values()
            .filter(|doc| {
                doc.messages
                    .first()
                    .and_then(Self::parent_of)
                    .as_ref()
                    == Some(parent_saga_id)
            })
            .map(|doc| doc.saga_id.clone())
            .collect())
    }

    async fn delete_saga(&self, saga_id: &SagaId) -> Result<(), SagaError> {
        let mut documents = self.documents.write().await;
        documents.remove(saga_id);
        Ok(())
    }
}
