/// Orchestrator module - owns every running service
///
/// The orchestrator is the process-scoped registry that:
/// - Starts and stops one scheduler task per service id
/// - Routes on-demand checks through the running task
/// - Answers status snapshots and aggregate failure counts
///
/// ## Retention
/// The `retention` submodule prunes old evidence on an hourly cadence.
pub mod retention;

#[cfg(test)]
mod tests;

pub use retention::{RetentionCleanup, RetentionPolicy};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::models::Failure;
use crate::database::{FailureQuery, Store, StoreError};
use crate::monitoring::checker::Checker;
use crate::monitoring::{
    CheckGate, CheckRequest, MonitoringExecutor, Recorder, Service, ServiceStatus, SharedState, TaskHandle,
    spawn_service_task,
};
use crate::notifier::Notifiers;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown service {0}")]
    UnknownService(i64),

    #[error("Checker task of service {0} went away")]
    TaskGone(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

struct Entry {
    service: Service,
    state: SharedState,
    gate: CheckGate,
    task: Option<TaskHandle>,
}

impl Entry {
    fn new(service: Service) -> Self {
        Self { service, state: SharedState::default(), gate: CheckGate::default(), task: None }
    }
}

/// Status snapshot of a service with its stored aggregates
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    #[serde(flatten)]
    pub status: ServiceStatus,
    /// Share of checks in the last 24 hours that succeeded, in percent
    pub online_24h: f64,
    pub avg_response_ms: Option<f64>,
    pub failures_24h: u64,
}

fn uptime_percent(hits: u64, failures: u64) -> f64 {
    let total = hits + failures;
    if total == 0 {
        return 100.0;
    }
    let percent = hits as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

/// Registry of monitored services and their scheduler tasks
pub struct Orchestrator {
    store: Arc<dyn Store>,
    executor: Arc<MonitoringExecutor>,
    services: Mutex<HashMap<i64, Entry>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, notifiers: Notifiers) -> Result<Self> {
        let executor = MonitoringExecutor::new(Recorder::new(store.clone(), notifiers))?;
        Ok(Self::with_executor(store, executor))
    }

    /// Create an orchestrator probing through the given checkers
    pub fn with_checkers(
        store: Arc<dyn Store>,
        notifiers: Notifiers,
        http_checker: Arc<dyn Checker>,
        tcp_checker: Arc<dyn Checker>,
    ) -> Self {
        let recorder = Recorder::new(store.clone(), notifiers);
        let executor = MonitoringExecutor::with_checkers(http_checker, tcp_checker, recorder);
        Self::with_executor(store, executor)
    }

    fn with_executor(store: Arc<dyn Store>, executor: MonitoringExecutor) -> Self {
        Self {
            store,
            executor: Arc::new(executor),
            services: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown; every scheduler task hangs off it
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Register a service without scheduling it
    pub fn register(&self, service: Service) {
        let mut services = self.services.lock();
        match services.get_mut(&service.id) {
            Some(entry) => entry.service = service,
            None => {
                services.insert(service.id, Entry::new(service));
            }
        }
    }

    /// Start the scheduler task of a service.
    ///
    /// Returns `false` when a task for the same id is already running. A
    /// task started right after a close waits for the closed task to exit
    /// before its first check.
    pub fn start(&self, service: Service) -> bool {
        let mut services = self.services.lock();
        let id = service.id;
        let entry = services.entry(id).or_insert_with(|| Entry::new(service.clone()));

        if entry.task.as_ref().is_some_and(TaskHandle::is_running) {
            debug!(service_id = id, "Checker already running");
            return false;
        }

        entry.service = service;
        let task = spawn_service_task(
            entry.service.clone(),
            entry.state.clone(),
            entry.gate.clone(),
            self.executor.clone(),
            &self.shutdown,
        );
        entry.task = Some(task);
        true
    }

    /// Signal the task of a service to stop and hand back its join handle.
    ///
    /// The handle is removed before the signal is sent, so a second close
    /// of the same id is a no-op.
    pub fn close(&self, id: i64) -> Option<JoinHandle<()>> {
        let task = self.services.lock().get_mut(&id)?.task.take()?;
        info!(service_id = id, "Stopping service checker");
        Some(task.cancel())
    }

    /// Close the task of a service and wait until it has finished,
    /// including any probe that was in flight.
    pub async fn stop(&self, id: i64) -> bool {
        let Some(handle) = self.close(id) else { return false };
        if let Err(e) = handle.await {
            warn!(service_id = id, "Checker task ended abnormally: {}", e);
        }
        true
    }

    /// Whether a scheduler task is running for the service
    pub fn is_running(&self, id: i64) -> bool {
        self.services.lock().get(&id).and_then(|e| e.task.as_ref()).is_some_and(TaskHandle::is_running)
    }

    /// Probe a service on demand.
    ///
    /// A running service is probed by its own task; otherwise the probe runs
    /// here. Either way it waits for any other check of the service to end.
    pub async fn check(&self, id: i64, record: bool) -> Result<ServiceStatus> {
        let (service, state, gate, requests) = {
            let services = self.services.lock();
            let entry = services.get(&id).ok_or(OrchestratorError::UnknownService(id))?;
            let requests = entry.task.as_ref().filter(|t| t.is_running()).map(TaskHandle::requests);
            (entry.service.clone(), entry.state.clone(), entry.gate.clone(), requests)
        };

        match requests {
            Some(requests) => {
                let (reply, response) = oneshot::channel();
                requests.send(CheckRequest { record, reply }).await.map_err(|_| OrchestratorError::TaskGone(id))?;
                response.await.map_err(|_| OrchestratorError::TaskGone(id))
            }
            None => Ok(gate.check(&self.executor, &service, &state, record).await),
        }
    }

    pub fn status(&self, id: i64) -> Option<ServiceStatus> {
        let services = self.services.lock();
        let entry = services.get(&id)?;
        let state = entry.state.read();
        Some(ServiceStatus::new(&entry.service, &state))
    }

    /// Snapshots of every registered service, ordered by id
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        let services = self.services.lock();
        let mut statuses: Vec<_> =
            services.values().map(|e| ServiceStatus::new(&e.service, &e.state.read())).collect();
        statuses.sort_by_key(|s| s.id);
        statuses
    }

    pub fn services_count(&self) -> usize {
        self.services.lock().len()
    }

    pub fn count_online(&self) -> usize {
        self.services.lock().values().filter(|e| e.state.read().online).count()
    }

    /// All failures ever recorded for a service
    pub async fn total_failures(&self, id: i64) -> Result<u64> {
        Ok(self.store.count_failures(FailureQuery::service(id)).await?)
    }

    /// Failures of a service recorded after `since`
    pub async fn total_failures_since(&self, id: i64, since: DateTime<Utc>) -> Result<u64> {
        Ok(self.store.count_failures(FailureQuery::service(id).since(since)).await?)
    }

    pub async fn total_failures_24h(&self, id: i64) -> Result<u64> {
        self.total_failures_since(id, Utc::now() - ChronoDuration::hours(24)).await
    }

    /// Failures across every service
    pub async fn count_failures(&self) -> Result<u64> {
        Ok(self.store.count_failures(FailureQuery::all()).await?)
    }

    /// Failures of the last 24 hours, summed over registered services
    pub async fn count_24h_failures(&self) -> Result<u64> {
        let ids: Vec<i64> = self.services.lock().keys().copied().collect();
        let mut total = 0;
        for id in ids {
            total += self.total_failures_24h(id).await?;
        }
        Ok(total)
    }

    /// Percentage of the last 24 hours' checks that succeeded.
    ///
    /// A service with no checks in the window counts as fully online.
    pub async fn online_24h(&self, id: i64) -> Result<f64> {
        let since = Utc::now() - ChronoDuration::hours(24);
        let hits = self.store.hit_stats(id, Some(since)).await?.count;
        let failures = self.total_failures_since(id, since).await?;
        Ok(uptime_percent(hits, failures))
    }

    /// Mean latency over every stored hit of a service
    pub async fn avg_response(&self, id: i64) -> Result<Option<std::time::Duration>> {
        Ok(self.store.hit_stats(id, None).await?.average_latency)
    }

    /// Live status with the 24 hour uptime, mean latency and failure count
    pub async fn summary(&self, id: i64) -> Result<ServiceSummary> {
        let status = self.status(id).ok_or(OrchestratorError::UnknownService(id))?;
        Ok(ServiceSummary {
            status,
            online_24h: self.online_24h(id).await?,
            avg_response_ms: self.avg_response(id).await?.map(|d| d.as_secs_f64() * 1000.0),
            failures_24h: self.total_failures_24h(id).await?,
        })
    }

    pub async fn recent_failures(&self, id: i64, limit: usize) -> Result<Vec<Failure>> {
        Ok(self.store.recent_failures(id, limit).await?)
    }

    pub async fn delete_failures(&self, id: i64) -> Result<u64> {
        Ok(self.store.delete_failures(id).await?)
    }

    /// Stop every scheduler task and wait for all of them
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<(i64, JoinHandle<()>)> = {
            let mut services = self.services.lock();
            services.iter_mut().filter_map(|(id, e)| e.task.take().map(|t| (*id, t.cancel()))).collect()
        };

        info!(tasks = handles.len(), "Waiting for service checkers to stop");
        let results = join_all(handles.into_iter().map(|(id, handle)| async move { (id, handle.await) })).await;
        for (id, result) in results {
            if let Err(e) = result {
                warn!(service_id = id, "Checker task ended abnormally: {}", e);
            }
        }
    }
}
