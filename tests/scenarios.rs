// Copyright 2025 Cowboy AI, LLC.

//! End-to-end scenarios S1-S7, driven against `InMemoryLog`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use cim_saga::cleanup::{CleanupConfig, CleanupService};
use cim_saga::context::{CompensationContext, MiddlewareOutcome, StepContext};
use cim_saga::coordinator::{Coordinator, RecoveryMode};
use cim_saga::definition::{Definition, Middleware, Step, Task};
use cim_saga::error::SagaTaskError;
use cim_saga::instance::SagaInstance;
use cim_saga::log::memory::InMemoryLog;
use cim_saga::message::{Message, MessageKind, SagaId, TaskName};
use cim_saga::orchestrator::Orchestrator;

struct EchoTask(&'static str);

#[async_trait]
impl Task for EchoTask {
    async fn invoke(&self, _ctx: &StepContext) -> Result<Value, SagaTaskError> {
        Ok(Value::String(self.0.to_string()))
    }
    async fn compensate(&self, _ctx: &CompensationContext) -> Result<Value, SagaTaskError> {
        Ok(Value::Null)
    }
}

struct FailingTask;

#[async_trait]
impl Task for FailingTask {
    async fn invoke(&self, _ctx: &StepContext) -> Result<Value, SagaTaskError> {
        Err(SagaTaskError::new("E"))
    }
}

struct FailingCompensateTask;

#[async_trait]
impl Task for FailingCompensateTask {
    async fn invoke(&self, _ctx: &StepContext) -> Result<Value, SagaTaskError> {
        Ok(Value::Null)
    }
    async fn compensate(&self, _ctx: &CompensationContext) -> Result<Value, SagaTaskError> {
        Err(SagaTaskError::new("compensation boom"))
    }
}

struct VetoMiddleware;

#[async_trait]
impl Middleware for VetoMiddleware {
    async fn check(
        &self,
        _task_name: &TaskName,
        _prev: &Value,
        _bag: &serde_json::Map<String, Value>,
    ) -> Result<MiddlewareOutcome, SagaTaskError> {
        Ok(MiddlewareOutcome::Veto)
    }
}

async fn new_instance(log: Arc<InMemoryLog>, saga_id: &str, job: Value) -> Arc<SagaInstance<InMemoryLog>> {
    let coordinator = Coordinator::new(log);
    let instance = coordinator
        .create_saga(SagaId::from(saga_id), job, None)
        .await
        .unwrap();
    Arc::new(instance)
}

#[tokio::test]
async fn s1_happy_path() {
    let log = Arc::new(InMemoryLog::new());
    let instance = new_instance(log.clone(), "order-1", serde_json::json!({"o": 1})).await;
    let definition = Definition::build(
        "d",
        vec![
            Step::new("A", Arc::new(EchoTask("a"))),
            Step::new("B", Arc::new(EchoTask("b"))),
            Step::new("C", Arc::new(EchoTask("c"))),
        ],
    )
    .unwrap();

    Orchestrator::new().run(&instance, &definition).await.unwrap();

    assert!(instance.is_saga_completed().await);
    assert!(!instance.is_saga_aborted().await);
    assert_eq!(instance.get_end_task_data(&TaskName::from("A")).await, Some(serde_json::json!("a")));
    assert_eq!(instance.get_end_task_data(&TaskName::from("B")).await, Some(serde_json::json!("b")));
    assert_eq!(instance.get_end_task_data(&TaskName::from("C")).await, Some(serde_json::json!("c")));

    let messages = log.get_messages(&SagaId::from("order-1")).await.unwrap();
    let kinds: Vec<&str> = messages.iter().map(|m| m.kind.type_name()).collect();
    assert_eq!(
        kinds,
        vec![
            "StartSaga", "StartTask", "EndTask", "StartTask", "EndTask", "StartTask", "EndTask", "EndSaga"
        ]
    );
}

#[tokio::test]
async fn s2_required_failure_rolls_back_predecessors() {
    let log = Arc::new(InMemoryLog::new());
    let instance = new_instance(log.clone(), "order-2", serde_json::json!({})).await;
    let definition = Definition::build(
        "d",
        vec![
            Step::new("A", Arc::new(EchoTask("a"))),
            Step::new("B", Arc::new(EchoTask("b"))),
            Step::new("C", Arc::new(FailingTask)),
        ],
    )
    .unwrap();

    Orchestrator::new().run(&instance, &definition).await.unwrap();

    assert!(instance.is_saga_aborted().await);
    assert!(!instance.is_task_completed(&TaskName::from("C")).await);
    assert!(instance.is_compensating_task_completed(&TaskName::from("B")).await);
    assert!(instance.is_compensating_task_completed(&TaskName::from("A")).await);

    let messages = log.get_messages(&SagaId::from("order-2")).await.unwrap();
    let kinds: Vec<&str> = messages.iter().map(|m| m.kind.type_name()).collect();
    assert!(kinds.contains(&"AbortSaga"));
    let abort_pos = kinds.iter().position(|k| *k == "AbortSaga").unwrap();
    let comp_b_start = kinds.iter().position(|k| *k == "StartCompensatingTask").unwrap();
    assert!(comp_b_start > abort_pos);
    assert!(!kinds.contains(&"EndSaga"));
}

#[tokio::test]
async fn s3_crash_after_start_task_b_retries_without_duplicate_start() {
    let log = Arc::new(InMemoryLog::new());
    let saga_id = SagaId::from("order-3");

    let start = Message::new(saga_id.clone(), MessageKind::StartSaga { data: serde_json::json!({}), parent: None });
    log.start_saga(start.clone()).await.unwrap();
    log.log_message(Message::new(
        saga_id.clone(),
        MessageKind::StartTask { task_id: TaskName::from("A"), data: Value::Null, is_optional: false },
    ))
    .await
    .unwrap();
    log.log_message(Message::new(
        saga_id.clone(),
        MessageKind::EndTask { task_id: TaskName::from("A"), data: serde_json::json!("a") },
    ))
    .await
    .unwrap();
    log.log_message(Message::new(
        saga_id.clone(),
        MessageKind::StartTask { task_id: TaskName::from("B"), data: serde_json::json!("a"), is_optional: false },
    ))
    .await
    .unwrap();

    let coordinator = Coordinator::new(log.clone());
    let instance = Arc::new(coordinator.recover(&saga_id, RecoveryMode::Forward).await.unwrap());

    let a_invoked = Arc::new(AtomicBool::new(false));
    struct TrackedTask {
        flag: Arc<AtomicBool>,
        output: &'static str,
    }
    #[async_trait]
    impl Task for TrackedTask {
        async fn invoke(&self, _ctx: &StepContext) -> Result<Value, SagaTaskError> {
            self.flag.store(true, Ordering::SeqCst);
            Ok(Value::String(self.output.to_string()))
        }
    }

    let definition = Definition::build(
        "d",
        vec![
            Step::new("A", Arc::new(TrackedTask { flag: a_invoked.clone(), output: "a" })),
            Step::new("B", Arc::new(EchoTask("b"))),
            Step::new("C", Arc::new(EchoTask("c"))),
        ],
    )
    .unwrap();

    Orchestrator::new().run(&instance, &definition).await.unwrap();

    assert!(!a_invoked.load(Ordering::SeqCst), "A must not be re-invoked; it already completed");
    assert!(instance.is_saga_completed().await);

    let messages = log.get_messages(&saga_id).await.unwrap();
    let start_task_b_count = messages
        .iter()
        .filter(|m| matches!(&m.kind, MessageKind::StartTask { task_id, .. } if *task_id == TaskName::from("B")))
        .count();
    assert_eq!(start_task_b_count, 1, "no duplicate StartTask(B) should be appended");
}

#[tokio::test]
async fn compensation_failure_does_not_halt_earlier_compensations() {
    // A, B(fails to compensate), C all complete, then a required D fails.
    // Per §9 Open Question 1, B's compensation failure must not prevent A's
    // compensation from being attempted in the same pass.
    let log = Arc::new(InMemoryLog::new());
    let instance = new_instance(log.clone(), "order-comp-fail", serde_json::json!({})).await;
    let definition = Definition::build(
        "d",
        vec![
            Step::new("A", Arc::new(EchoTask("a"))),
            Step::new("B", Arc::new(FailingCompensateTask)),
            Step::new("C", Arc::new(EchoTask("c"))),
            Step::new("D", Arc::new(FailingTask)),
        ],
    )
    .unwrap();

    // run() completes normally even though a compensation failed (§7).
    Orchestrator::new().run(&instance, &definition).await.unwrap();

    assert!(instance.is_saga_aborted().await);
    // C (later than the failing B) still got compensated.
    assert!(instance.is_compensating_task_completed(&TaskName::from("C")).await);
    // A (earlier than the failing B) still got compensated.
    assert!(instance.is_compensating_task_completed(&TaskName::from("A")).await);
    // B itself is left comp_started but not comp_completed, for retry.
    assert!(instance.is_compensating_task_started(&TaskName::from("B")).await);
    assert!(!instance.is_compensating_task_completed(&TaskName::from("B")).await);
    // The saga as a whole is therefore not yet terminal.
    assert!(!instance.snapshot().await.is_terminal());
}

#[tokio::test]
async fn terminal_idempotence_performs_no_further_log_writes() {
    let log = Arc::new(InMemoryLog::new());
    let instance = new_instance(log.clone(), "order-term", serde_json::json!({})).await;
    let definition = Definition::build("d", vec![Step::new("A", Arc::new(EchoTask("a")))]).unwrap();

    Orchestrator::new().run(&instance, &definition).await.unwrap();
    assert!(instance.is_saga_completed().await);

    let before = log.get_messages(&SagaId::from("order-term")).await.unwrap().len();
    Orchestrator::new().run(&instance, &definition).await.unwrap();
    let after = log.get_messages(&SagaId::from("order-term")).await.unwrap().len();
    assert_eq!(before, after, "re-running a completed saga must perform no log writes");
}

#[tokio::test]
async fn s4_optional_task_failure_continues_forward() {
    let log = Arc::new(InMemoryLog::new());
    let instance = new_instance(log.clone(), "order-4", serde_json::json!({})).await;
    let definition = Definition::build(
        "d",
        vec![
            Step::new("A", Arc::new(EchoTask("a"))),
            Step::new("B", Arc::new(FailingTask)).optional(),
            Step::new("C", Arc::new(EchoTask("c"))),
        ],
    )
    .unwrap();

    Orchestrator::new().run(&instance, &definition).await.unwrap();

    assert!(instance.is_saga_completed().await);
    assert_eq!(instance.get_end_task_data(&TaskName::from("B")).await, Some(Value::Null));
    assert_eq!(instance.get_end_task_data(&TaskName::from("C")).await, Some(serde_json::json!("c")));
}

#[tokio::test]
async fn s5_middleware_veto_triggers_compensation_without_invoking_step() {
    let log = Arc::new(InMemoryLog::new());
    let instance = new_instance(log.clone(), "order-5", serde_json::json!({})).await;

    struct CountingTask(Arc<AtomicBool>);
    #[async_trait]
    impl Task for CountingTask {
        async fn invoke(&self, _ctx: &StepContext) -> Result<Value, SagaTaskError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    let b_invoked = Arc::new(AtomicBool::new(false));
    let definition = Definition::build(
        "d",
        vec![
            Step::new("A", Arc::new(EchoTask("a"))),
            Step::new("B", Arc::new(CountingTask(b_invoked.clone()))).with_middleware(Arc::new(VetoMiddleware)),
        ],
    )
    .unwrap();

    Orchestrator::new().run(&instance, &definition).await.unwrap();

    assert!(!b_invoked.load(Ordering::SeqCst));
    assert!(instance.is_saga_aborted().await);
    assert!(instance.is_compensating_task_completed(&TaskName::from("A")).await);

    let messages = log.get_messages(&SagaId::from("order-5")).await.unwrap();
    assert!(!messages
        .iter()
        .any(|m| matches!(&m.kind, MessageKind::StartTask { task_id, .. } if *task_id == TaskName::from("B"))));
}

#[tokio::test]
async fn s6_context_update_visible_to_later_steps() {
    let log = Arc::new(InMemoryLog::new());
    let instance = new_instance(log.clone(), "order-6", serde_json::json!({})).await;

    struct WritesTotalTask;
    #[async_trait]
    impl Task for WritesTotalTask {
        async fn invoke(&self, ctx: &StepContext) -> Result<Value, SagaTaskError> {
            let mut delta = serde_json::Map::new();
            delta.insert("total".to_string(), serde_json::json!(10));
            ctx.ctx.update(delta).await.map_err(|e| SagaTaskError::new(e.to_string()))?;
            Ok(Value::Null)
        }
    }

    struct ReadsTotalTask(Arc<std::sync::Mutex<Option<serde_json::Value>>>);
    #[async_trait]
    impl Task for ReadsTotalTask {
        async fn invoke(&self, ctx: &StepContext) -> Result<Value, SagaTaskError> {
            let seen = ctx.api.get_saga_context().await.get("total").cloned();
            *self.0.lock().unwrap() = seen.clone();
            Ok(seen.unwrap_or(Value::Null))
        }
    }

    let seen = Arc::new(std::sync::Mutex::new(None));
    let definition = Definition::build(
        "d",
        vec![
            Step::new("A", Arc::new(WritesTotalTask)),
            Step::new("B", Arc::new(ReadsTotalTask(seen.clone()))),
        ],
    )
    .unwrap();

    Orchestrator::new().run(&instance, &definition).await.unwrap();

    assert!(instance.is_saga_completed().await);
    assert_eq!(*seen.lock().unwrap(), Some(serde_json::json!(10)));

    let context = instance.get_saga_context().await;
    assert_eq!(context.get("total"), Some(&serde_json::json!(10)));
    assert_eq!(context.len(), 1);
}

#[tokio::test]
async fn s7_cleanup_eligibility() {
    let log = Arc::new(InMemoryLog::new());

    let old_completed = SagaId::from("old-completed");
    log.start_saga(Message::with_timestamp(
        old_completed.clone(),
        MessageKind::StartSaga { data: serde_json::json!({}), parent: None },
        chrono::Utc::now() - chrono::Duration::days(10),
    ))
    .await
    .unwrap();
    log.log_message(Message::with_timestamp(
        old_completed.clone(),
        MessageKind::EndSaga,
        chrono::Utc::now() - chrono::Duration::days(10),
    ))
    .await
    .unwrap();

    let active_old = SagaId::from("active-old");
    log.start_saga(Message::with_timestamp(
        active_old.clone(),
        MessageKind::StartSaga { data: serde_json::json!({}), parent: None },
        chrono::Utc::now() - chrono::Duration::days(10),
    ))
    .await
    .unwrap();

    let config = CleanupConfig {
        completed_retention: Duration::from_secs(7 * 24 * 3600),
        ..Default::default()
    };
    let service = CleanupService::new(log.clone(), config);
    service.run_cleanup().await;

    assert!(log.get_messages(&old_completed).await.is_err());
    assert!(log.get_messages(&active_old).await.is_ok());
}
