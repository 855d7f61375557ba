// Copyright 2025 Cowboy AI, LLC.

//! Error taxonomy for saga orchestration
//!
//! Mirrors the failure categories of §7: persistence-level failures
//! (`SagaError`) are kept distinct from task/compensation-body failures
//! (`SagaTaskError`), which are supplied by the embedder and therefore carry
//! an opaque boxed payload rather than a fixed set of variants.

use std::fmt;

use thiserror::Error;

/// Errors raised by the log, state projection, saga instance, definition
/// validation, and coordinator.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga with this id already has a sequence in the log.
    #[error("saga already exists: {0}")]
    AlreadyExists(String),

    /// No sequence exists for the given saga id.
    #[error("saga not found: {0}")]
    NotFound(String),

    /// A message would violate one of the invariants in §3.2; state and log
    /// are left unchanged.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Definition validation failed. Carries every violation found, not just
    /// the first (Testable Property 5).
    #[error("invalid definition: {}", .0.join("; "))]
    InvalidDefinition(Vec<String>),

    /// A compensate callback failed; the saga remains aborted-but-not-terminal
    /// and will retry this task's compensation on the next orchestrator run.
    #[error("compensation failed for task {task}: {source}")]
    CompensationFailed {
        /// Name of the task whose compensation failed.
        task: String,
        /// Underlying failure reported by the compensate callback.
        #[source]
        source: SagaTaskError,
    },

    /// The underlying log backend reported a failure; the projection was not
    /// applied.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl SagaError {
    /// True for the category raised when creating a saga whose id is in use.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SagaError::AlreadyExists(_))
    }

    /// True for the category raised when operating on an absent saga id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SagaError::NotFound(_))
    }
}

/// Failure surfaced by a task's `invoke`, `compensate`, or by a middleware
/// veto/throw. Task bodies are embedder-defined and may fail with any error
/// type, so the payload is boxed rather than a closed enum; this is kept
/// distinct from [`SagaError`] so persistence failures are never mistaken for
/// business-logic failures (and vice versa).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SagaTaskError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SagaTaskError {
    /// Build a task error from a display-able message with no further cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary embedder error as a task failure.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// A middleware vetoed the step (returned `false`); treated as a task
    /// failure per §4.6.3.
    pub fn vetoed_by_middleware(step: impl fmt::Display) -> Self {
        Self::new(format!("step {step} vetoed by middleware"))
    }
}

impl From<String> for SagaTaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for SagaTaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Result alias for fallible saga operations.
pub type SagaResult<T> = Result<T, SagaError>;
