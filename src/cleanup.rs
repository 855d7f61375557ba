// Copyright 2025 Cowboy AI, LLC.

//! Long-running background scanner that bounds storage growth by deleting
//! (optionally archiving first) sagas past their retention window.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::log::SagaLog;
use crate::message::{Message, SagaId};
use crate::state::{self, SagaState};

/// Status derived from a saga's folded state, used by the default retention
/// predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    /// Neither completed nor aborted.
    Active,
    /// `EndSaga` applied.
    Completed,
    /// Terminal-aborted (every completed task compensated).
    Aborted,
}

fn status_of(state: &SagaState) -> SagaStatus {
    if state.saga_completed {
        SagaStatus::Completed
    } else if state.is_terminal() {
        SagaStatus::Aborted
    } else {
        SagaStatus::Active
    }
}

/// Callback invoked before deletion, given the saga id and its full message
/// sequence. A failure is reported via [`CleanupConfig::on_error`] but, by
/// default, does not block deletion.
#[async_trait]
pub trait ArchiveHook: Send + Sync {
    /// Archive `messages` for `saga_id`. An `Err` is logged and reported but
    /// does not, by default, prevent the subsequent delete.
    async fn archive(&self, saga_id: &SagaId, messages: &[Message]) -> Result<(), String>;
}

/// Overrides the default age/status eligibility policy entirely.
#[async_trait]
pub trait CleanupPredicate: Send + Sync {
    /// Return true if `saga_id` (with the given message sequence) should be
    /// cleaned up this scan.
    async fn eligible(&self, saga_id: &SagaId, messages: &[Message]) -> bool;
}

/// Observer of scan outcomes.
#[async_trait]
pub trait CleanupObserver: Send + Sync {
    /// Called once after each scan with the number of sagas deleted and
    /// archived.
    async fn on_cleanup(&self, deleted: usize, archived: usize);
    /// Called once per per-saga failure encountered during a scan. Per-saga
    /// errors never abort the scan.
    async fn on_error(&self, saga_id: &SagaId, error: &str);
}

/// Tunable policy for the cleanup service.
pub struct CleanupConfig {
    /// How long after completion a saga remains eligible for deletion.
    /// Default: 7 days.
    pub completed_retention: Duration,
    /// How long after terminal-abort a saga remains eligible for deletion.
    /// Default: 30 days.
    pub aborted_retention: Duration,
    /// Interval between scans when running as a background service.
    /// Default: 1 hour.
    pub scan_interval: Duration,
    /// Invoked before deletion, if present.
    pub archive_hook: Option<Arc<dyn ArchiveHook>>,
    /// Overrides the default eligibility policy entirely, if present.
    pub custom_predicate: Option<Arc<dyn CleanupPredicate>>,
    /// Scan-outcome observer.
    pub observer: Option<Arc<dyn CleanupObserver>>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            completed_retention: Duration::from_secs(7 * 24 * 3600),
            aborted_retention: Duration::from_secs(30 * 24 * 3600),
            scan_interval: Duration::from_secs(3600),
            archive_hook: None,
            custom_predicate: None,
            observer: None,
        }
    }
}

/// Background scanner over a [`SagaLog`]. Runs on a single logical worker;
/// `start`/`stop` are idempotent, and `run_cleanup` performs exactly one
/// scan inline (used both standalone and by the background loop).
pub struct CleanupService<L: SagaLog> {
    log: Arc<L>,
    config: CleanupConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<L: SagaLog + 'static> CleanupService<L> {
    /// Build a service over `log` with the given policy.
    pub fn new(log: Arc<L>, config: CleanupConfig) -> Arc<Self> {
        Arc::new(Self {
            log,
            config,
            handle: Mutex::new(None),
        })
    }

    /// Start periodic scanning in the background. A no-op if already
    /// running.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return;
        }
        let this = self.clone();
        let interval = this.config.scan_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.run_cleanup().await;
            }
        }));
    }

    /// Halt periodic scanning. The in-flight scan (if any) is allowed to
    /// finish; no new scan is started after this returns.
    pub async fn stop(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    /// Run exactly one scan: enumerate active sagas, determine eligibility,
    /// archive then delete each eligible saga, and report counts via
    /// [`CleanupConfig::observer`]. Per-saga failures are caught and routed
    /// to the observer's `on_error`; they never abort the scan.
    #[instrument(skip(self))]
    pub async fn run_cleanup(&self) {
        let deleted = AtomicUsize::new(0);
        let archived = AtomicUsize::new(0);

        let saga_ids = match self.log.get_active_saga_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "cleanup scan failed to enumerate active sagas");
                return;
            }
        };

        for saga_id in saga_ids {
            if let Err(e) = self.scan_one(&saga_id, &deleted, &archived).await {
                warn!(saga_id = %saga_id, error = %e, "cleanup failed for saga");
                if let Some(observer) = &self.config.observer {
                    observer.on_error(&saga_id, &e).await;
                }
            }
        }

        let deleted = deleted.load(Ordering::SeqCst);
        let archived = archived.load(Ordering::SeqCst);
        info!(deleted, archived, "cleanup scan complete");
        if let Some(observer) = &self.config.observer {
            observer.on_cleanup(deleted, archived).await;
        }
    }

    async fn scan_one(
        &self,
        saga_id: &SagaId,
        deleted: &AtomicUsize,
        archived: &AtomicUsize,
    ) -> Result<(), String> {
        let messages = self.log.get_messages(saga_id).await.map_err(|e| e.to_string())?;
        let Some(state) = state::fold(&messages).map_err(|e| e.to_string())? else {
            return Ok(());
        };

        let eligible = self.is_eligible(saga_id, &messages, &state).await;
        if !eligible {
            return Ok(());
        }

        if let Some(hook) = &self.config.archive_hook {
            match hook.archive(saga_id, &messages).await {
                Ok(()) => {
                    archived.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    warn!(saga_id = %saga_id, error = %e, "archive hook failed, proceeding with deletion");
                    if let Some(observer) = &self.config.observer {
                        observer.on_error(saga_id, &e).await;
                    }
                }
            }
        }

        self.log.delete_saga(saga_id).await.map_err(|e| e.to_string())?;
        deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_eligible(&self, saga_id: &SagaId, messages: &[Message], state: &SagaState) -> bool {
        if let Some(predicate) = &self.config.custom_predicate {
            return predicate.eligible(saga_id, messages).await;
        }

        let Some(last) = messages.last() else {
            return false;
        };
        let age = Utc::now().signed_duration_since(last.timestamp);
        match status_of(state) {
            SagaStatus::Active => false,
            SagaStatus::Completed => {
                age > chrono::Duration::from_std(self.config.completed_retention).unwrap_or_default()
            }
            SagaStatus::Aborted => {
                age > chrono::Duration::from_std(self.config.aborted_retention).unwrap_or_default()
            }
        }
    }
}
