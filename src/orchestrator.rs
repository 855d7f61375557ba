// Copyright 2025 Cowboy AI, LLC.

//! The central algorithm: drives one [`SagaInstance`] against one
//! [`Definition`] to a terminal state.
//!
//! The orchestrator's "program counter" is the saga's projected state, never
//! an in-memory cursor, so a crash at any point is recovered from by simply
//! re-entering `run` against the same (or a freshly-folded) instance.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::context::{CompensationContext, ContextHandle, MiddlewareOutcome, SagaApi, StepContext};
use crate::definition::Definition;
use crate::error::{SagaError, SagaTaskError};
use crate::instance::SagaInstance;
use crate::log::SagaLog;
use crate::message::TaskName;

/// Events emitted synchronously to [`SagaObserver`]s as the orchestrator
/// drives a saga. A failing observer never affects saga progress (see
/// [`ObserverErrorSink`]).
#[derive(Debug, Clone)]
pub enum SagaEvent {
    /// Forward drive is beginning.
    SagaStarted,
    /// The saga reached `EndSaga`.
    SagaSucceeded,
    /// A required step failed; the saga is entering compensation.
    SagaFailed { task: TaskName },
    /// The saga finished compensating and is terminal-aborted.
    SagaAborted,
    /// A step's forward invocation is starting.
    TaskStarted { task: TaskName },
    /// A step's forward invocation succeeded.
    TaskSucceeded { task: TaskName },
    /// A required step's forward invocation failed.
    TaskFailed { task: TaskName },
    /// An optional step's forward invocation failed; forward drive
    /// continues.
    OptionalTaskFailed { task: TaskName },
    /// A step's compensation is starting.
    CompensationStarted { task: TaskName },
    /// A step's compensation succeeded.
    CompensationSucceeded { task: TaskName },
    /// A step's compensation failed; the saga remains aborted-but-not-terminal.
    CompensationFailed { task: TaskName },
}

/// Subscriber to [`SagaEvent`]s. Implementations must be non-blocking or
/// offload work themselves — delivery happens synchronously after each
/// state change.
#[async_trait::async_trait]
pub trait SagaObserver: Send + Sync {
    /// Handle one event.
    async fn on_event(&self, saga_id: &crate::message::SagaId, event: &SagaEvent);
}

/// Sink for a [`SagaObserver`] that panicked while handling an event
/// (§7's *SubscriberFailure*: "trap; report via orchestrator's error event;
/// do not affect saga progress"). Invoked from inside [`Orchestrator::emit`]
/// after the panic has been caught — saga progress continues regardless of
/// whether a sink is registered.
#[async_trait::async_trait]
pub trait ObserverErrorSink: Send + Sync {
    /// Report that `observer` panicked while handling an event for
    /// `saga_id`. `error` is the panic payload rendered as text.
    async fn on_observer_error(&self, saga_id: &crate::message::SagaId, error: &str);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "saga observer panicked with a non-string payload".to_string()
    }
}

/// Drives a single saga against a single definition.
pub struct Orchestrator<L: SagaLog> {
    observers: Vec<Arc<dyn SagaObserver>>,
    observer_error_sink: Option<Arc<dyn ObserverErrorSink>>,
    _marker: std::marker::PhantomData<L>,
}

impl<L: SagaLog> Default for Orchestrator<L> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
            observer_error_sink: None,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<L: SagaLog + 'static> Orchestrator<L> {
    /// Construct an orchestrator with no observers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Observers are invoked in registration order.
    pub fn with_observer(mut self, observer: Arc<dyn SagaObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Register the sink that receives [`ObserverErrorSink::on_observer_error`]
    /// reports when a registered observer panics.
    pub fn with_observer_error_sink(mut self, sink: Arc<dyn ObserverErrorSink>) -> Self {
        self.observer_error_sink = Some(sink);
        self
    }

    /// Drive `instance` against `definition` to a terminal state (recovery-
    /// aware: already-completed sagas return immediately; aborted-but-not-
    /// terminal sagas jump straight to compensation; §4.6.4).
    #[instrument(skip(self, instance, definition), fields(saga_id = %instance.saga_id()))]
    pub async fn run(&self, instance: &Arc<SagaInstance<L>>, definition: &Definition) -> Result<(), SagaError> {
        if instance.is_saga_completed().await {
            return Ok(());
        }
        if instance.is_saga_aborted().await {
            return self.compensate(instance, definition).await;
        }

        self.emit(instance.saga_id(), SagaEvent::SagaStarted).await;

        let mut prev: Value = Value::Null;
        for step in definition.steps() {
            match self.drive_step(instance, definition, step, prev.clone()).await? {
                StepOutcome::Continue(next_prev) => prev = next_prev,
                StepOutcome::Aborted => {
                    return self.compensate(instance, definition).await;
                }
            }
        }

        instance.end_saga().await?;
        self.emit(instance.saga_id(), SagaEvent::SagaSucceeded).await;
        Ok(())
    }

    async fn drive_step(
        &self,
        instance: &Arc<SagaInstance<L>>,
        definition: &Definition,
        step: &crate::definition::Step,
        prev: Value,
    ) -> Result<StepOutcome, SagaError> {
        let task_name = step.name.clone();

        if instance.is_task_completed(&task_name).await {
            // replay-safe: already done.
            let data = instance.get_end_task_data(&task_name).await.unwrap_or(Value::Null);
            return Ok(StepOutcome::Continue(data));
        }

        let bag = match self.run_middleware(step, &prev).await {
            Ok(bag) => bag,
            Err(veto) => {
                return self
                    .handle_forward_failure(instance, definition, step, veto)
                    .await;
            }
        };

        if !instance.is_task_started(&task_name).await {
            instance
                .start_task(task_name.clone(), prev.clone(), step.is_optional)
                .await?;
            self.emit(instance.saga_id(), SagaEvent::TaskStarted { task: task_name.clone() })
                .await;
        }

        let ctx = self.step_context(instance, prev.clone(), bag).await;

        // Either freshly started above, or re-entered after a crash between
        // StartTask and EndTask -- either way, invoke runs (idempotency is
        // the callback's responsibility, per §4.6.1 item 2).
        match step.task.invoke(&ctx).await {
            Ok(output) => {
                instance.end_task(task_name.clone(), output.clone()).await?;
                self.emit(instance.saga_id(), SagaEvent::TaskSucceeded { task: task_name })
                    .await;
                Ok(StepOutcome::Continue(output))
            }
            Err(err) => self.handle_forward_failure(instance, definition, step, err).await,
        }
    }

    /// Run `step`'s middleware chain in order, shallow-merging each
    /// non-vetoing outcome's update into the accumulated bag (§4.6.3).
    async fn run_middleware(
        &self,
        step: &crate::definition::Step,
        prev: &Value,
    ) -> Result<Map<String, Value>, SagaTaskError> {
        let mut bag = Map::new();
        for mw in &step.middleware {
            match mw.check(&step.name, prev, &bag).await? {
                MiddlewareOutcome::Allow => {}
                MiddlewareOutcome::AllowWithUpdate(delta) => {
                    for (k, v) in delta {
                        bag.insert(k, v);
                    }
                }
                MiddlewareOutcome::Veto => {
                    return Err(SagaTaskError::vetoed_by_middleware(&step.name));
                }
            }
        }
        Ok(bag)
    }

    async fn step_context(&self, instance: &Arc<SagaInstance<L>>, prev: Value, bag: Map<String, Value>) -> StepContext {
        let parent = instance.get_parent().await;
        StepContext {
            prev,
            middleware: bag,
            api: self.saga_api(instance),
            saga_id: instance.saga_id().clone(),
            parent_saga_id: parent.as_ref().map(|p| p.parent_saga_id.clone()),
            parent_task_id: parent.map(|p| p.parent_task_id),
            ctx: instance.clone() as Arc<dyn ContextHandle>,
        }
    }

    fn saga_api(&self, instance: &Arc<SagaInstance<L>>) -> Arc<dyn SagaApi> {
        Arc::new(instance.as_read_only()) as Arc<dyn SagaApi>
    }

    async fn handle_forward_failure(
        &self,
        instance: &Arc<SagaInstance<L>>,
        _definition: &Definition,
        step: &crate::definition::Step,
        err: SagaTaskError,
    ) -> Result<StepOutcome, SagaError> {
        let task_name = step.name.clone();
        if step.is_optional {
            warn!(saga_id = %instance.saga_id(), task = %task_name, error = %err, "optional task failed");
            if !instance.is_task_started(&task_name).await {
                instance.start_task(task_name.clone(), Value::Null, true).await?;
                self.emit(instance.saga_id(), SagaEvent::TaskStarted { task: task_name.clone() })
                    .await;
            }
            let mut metadata = crate::message::Metadata::new();
            metadata.insert("error".to_string(), Value::String(err.to_string()));
            instance.end_task_with_metadata(task_name.clone(), Value::Null, metadata).await?;
            self.emit(instance.saga_id(), SagaEvent::OptionalTaskFailed { task: task_name })
                .await;
            return Ok(StepOutcome::Continue(Value::Null));
        }

        error!(saga_id = %instance.saga_id(), task = %task_name, error = %err, "required task failed");
        instance.abort_saga().await?;
        self.emit(instance.saga_id(), SagaEvent::TaskFailed { task: task_name.clone() }).await;
        self.emit(instance.saga_id(), SagaEvent::SagaFailed { task: task_name }).await;
        Ok(StepOutcome::Aborted)
    }

    /// Walk the definition's steps in reverse, compensating every completed,
    /// not-yet-compensated task (§4.6.5). A failing compensation is emitted
    /// and leaves that task aborted-but-not-terminal, but — per Open
    /// Question 1 — earlier (still-to-be-compensated) tasks are still
    /// attempted in the same pass; only that one task is left for a
    /// subsequent `run` to retry. Per §7's propagation policy, `run`
    /// completes normally even when a compensation failed: the saga's
    /// terminal state (not this call's `Result`) is what tells the caller
    /// whether rollback finished.
    async fn compensate(&self, instance: &Arc<SagaInstance<L>>, definition: &Definition) -> Result<(), SagaError> {
        let mut any_failed = false;

        for step in definition.steps().iter().rev() {
            let task_name = step.name.clone();

            if !instance.is_task_completed(&task_name).await {
                continue;
            }
            if instance.is_compensating_task_completed(&task_name).await {
                continue;
            }

            let end_data = instance.get_end_task_data(&task_name).await.unwrap_or(Value::Null);

            if !instance.is_compensating_task_started(&task_name).await {
                instance.start_compensating_task(task_name.clone(), end_data.clone()).await?;
                self.emit(instance.saga_id(), SagaEvent::CompensationStarted { task: task_name.clone() })
                    .await;
            }

            let parent = instance.get_parent().await;
            let comp_ctx = CompensationContext {
                task_data: end_data,
                middleware: Map::new(),
                api: self.saga_api(instance),
                saga_id: instance.saga_id().clone(),
                parent_saga_id: parent.as_ref().map(|p| p.parent_saga_id.clone()),
                parent_task_id: parent.map(|p| p.parent_task_id),
                ctx: instance.clone() as Arc<dyn ContextHandle>,
            };

            match step.task.compensate(&comp_ctx).await {
                Ok(output) => {
                    instance.end_compensating_task(task_name.clone(), output).await?;
                    self.emit(instance.saga_id(), SagaEvent::CompensationSucceeded { task: task_name })
                        .await;
                }
                Err(err) => {
                    error!(saga_id = %instance.saga_id(), task = %task_name, error = %err, "compensation failed");
                    self.emit(instance.saga_id(), SagaEvent::CompensationFailed { task: task_name })
                        .await;
                    any_failed = true;
                }
            }
        }

        if !any_failed {
            self.emit(instance.saga_id(), SagaEvent::SagaAborted).await;
        }
        Ok(())
    }

    async fn emit(&self, saga_id: &crate::message::SagaId, event: SagaEvent) {
        for observer in &self.observers {
            // Sandbox each observer: a panicking `on_event` is caught here
            // so it never unwinds into `run` and aborts saga progress
            // (§5/§7 SubscriberFailure — "trap; do not affect saga
            // progress"). The panic is reported to `on_observer_error`
            // rather than propagated.
            let outcome = AssertUnwindSafe(observer.on_event(saga_id, &event))
                .catch_unwind()
                .await;
            if let Err(payload) = outcome {
                let message = panic_message(&*payload);
                error!(saga_id = %saga_id, observer_error = %message, "saga observer panicked");
                if let Some(sink) = &self.observer_error_sink {
                    sink.on_observer_error(saga_id, &message).await;
                }
            }
        }
        info!(saga_id = %saga_id, event = ?event, "saga event");
    }
}

enum StepOutcome {
    Continue(Value),
    Aborted,
}
