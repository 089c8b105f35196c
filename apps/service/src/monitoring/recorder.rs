use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{Service, ServiceState, ServiceStatus};
use crate::database::models::{Failure, Hit};
use crate::database::Store;
use crate::notifier::Notifiers;

/// Runtime state of one service, written by its scheduler task
pub type SharedState = Arc<RwLock<ServiceState>>;

/// Turns probe outcomes into evidence, state transitions and notifications
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn Store>,
    notifiers: Notifiers,
}

impl Recorder {
    pub fn new(store: Arc<dyn Store>, notifiers: Notifiers) -> Self {
        Self { store, notifiers }
    }

    /// Mark the service online, append a hit and notify channels
    pub async fn record_success(&self, service: &Service, state: &SharedState, latency: Duration) -> ServiceStatus {
        let status = {
            let mut state = state.write();
            state.online = true;
            state.last_online = Some(Utc::now());
            state.last_issue = None;
            ServiceStatus::new(service, &state)
        };

        if let Err(e) = self.store.create_hit(&Hit::new(service.id, latency)).await {
            warn!(service_id = service.id, service = %service.name, "Failed to store hit: {}", e);
        }

        debug!(service_id = service.id, latency_ms = status.latency_ms, "Service is online");
        self.notifiers.on_success(&status);
        status
    }

    /// Mark the service offline, append a failure and notify channels
    pub async fn record_failure(&self, service: &Service, state: &SharedState, issue: String) -> ServiceStatus {
        let status = {
            let mut state = state.write();
            state.online = false;
            state.last_issue = Some(issue.clone());
            ServiceStatus::new(service, &state)
        };

        let failure = Failure::new(service.id, issue);
        if let Err(e) = self.store.create_failure(&failure).await {
            warn!(service_id = service.id, service = %service.name, "Failed to store failure: {}", e);
        }

        warn!(service_id = service.id, service = %service.name, issue = %failure.issue, "Service is failing");
        self.notifiers.on_failure(&status, &failure);
        status
    }
}
