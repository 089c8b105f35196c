use std::sync::Arc;
use tracing::debug;

use super::checker::{Checker, HttpChecker, TcpChecker};
use super::recorder::{Recorder, SharedState};
use super::types::{Protocol, Service, ServiceStatus};

/// Monitoring executor - runs one probe and hands the outcome to the recorder
pub struct MonitoringExecutor {
    http_checker: Arc<dyn Checker>,
    tcp_checker: Arc<dyn Checker>,
    recorder: Recorder,
}

impl MonitoringExecutor {
    /// Create an executor with the network checkers
    pub fn new(recorder: Recorder) -> Result<Self, reqwest::Error> {
        Ok(Self::with_checkers(Arc::new(HttpChecker::new()?), Arc::new(TcpChecker::new()), recorder))
    }

    pub fn with_checkers(http_checker: Arc<dyn Checker>, tcp_checker: Arc<dyn Checker>, recorder: Recorder) -> Self {
        Self { http_checker, tcp_checker, recorder }
    }

    /// Probe the service once.
    ///
    /// With `record` set the outcome is persisted and fanned out to the
    /// notifiers; otherwise only the live state is refreshed.
    pub async fn check(&self, service: &Service, state: &SharedState, record: bool) -> ServiceStatus {
        let checker = match service.protocol {
            Protocol::Http => self.http_checker.as_ref(),
            Protocol::Tcp => self.tcp_checker.as_ref(),
        };

        let outcome = checker.probe(service).await;
        debug!(service_id = service.id, success = outcome.is_success(), latency = ?outcome.latency, "Probe finished");
        state.write().apply(&outcome);

        match (&outcome.result, record) {
            (Ok(()), true) => {
                let latency = outcome.latency.unwrap_or_default();
                self.recorder.record_success(service, state, latency).await
            }
            (Err(e), true) => self.recorder.record_failure(service, state, e.to_string()).await,
            (result, false) => {
                let mut state = state.write();
                state.online = result.is_ok();
                match result {
                    Ok(()) => {
                        state.last_online = Some(outcome.checked_at);
                        state.last_issue = None;
                    }
                    Err(e) => state.last_issue = Some(e.to_string()),
                }
                ServiceStatus::new(service, &state)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::monitoring::types::{ProbeError, ProbeOutcome};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Checker that replays a script of outcomes, each taking `cost` of
    /// (virtual) time. The last entry repeats once the script runs out.
    pub struct ScriptedChecker {
        script: Mutex<VecDeque<bool>>,
        cost: Duration,
        pub starts: Mutex<Vec<Instant>>,
    }

    impl ScriptedChecker {
        pub fn new(script: &[bool], cost: Duration) -> Self {
            Self { script: Mutex::new(script.iter().copied().collect()), cost, starts: Mutex::new(Vec::new()) }
        }

        pub fn starts(&self) -> Vec<Instant> {
            self.starts.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl Checker for ScriptedChecker {
        async fn probe(&self, _service: &Service) -> ProbeOutcome {
            self.starts.lock().push(Instant::now());
            let ok = {
                let mut script = self.script.lock();
                if script.len() > 1 { script.pop_front().unwrap_or(true) } else { script.front().copied().unwrap_or(true) }
            };
            tokio::time::sleep(self.cost).await;

            let outcome = ProbeOutcome::new().with_response(Some(if ok { 200 } else { 500 }), String::new());
            if ok {
                outcome.success(self.cost)
            } else {
                outcome.failure(ProbeError::StatusMismatch { actual: 500, expected: 200 })
            }
        }
    }
}
