use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::executor::MonitoringExecutor;
use super::recorder::SharedState;
use super::types::{Service, ServiceStatus};

const REQUEST_QUEUE: usize = 8;

/// On-demand probe routed through a running task
#[derive(Debug)]
pub struct CheckRequest {
    pub record: bool,
    pub reply: oneshot::Sender<ServiceStatus>,
}

/// Handle to a running scheduler task
#[derive(Debug)]
pub struct TaskHandle {
    stop: CancellationToken,
    requests: mpsc::Sender<CheckRequest>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    pub fn requests(&self) -> mpsc::Sender<CheckRequest> {
        self.requests.clone()
    }

    /// Signal the task to stop; it finishes any probe in flight first
    pub fn cancel(self) -> JoinHandle<()> {
        self.stop.cancel();
        self.join
    }
}

/// Per-service locks shared by every task and caller checking one service.
///
/// `running` is held by a scheduler task for its whole life, so a task
/// started after a close waits until the closed one has exited. `checking`
/// is held around each single check.
#[derive(Debug, Clone, Default)]
pub struct CheckGate {
    running: Arc<Mutex<()>>,
    checking: Arc<Mutex<()>>,
}

impl CheckGate {
    /// Check the service once no other check of it is in flight
    pub async fn check(
        &self,
        executor: &MonitoringExecutor,
        service: &Service,
        state: &SharedState,
        record: bool,
    ) -> ServiceStatus {
        let _checking = self.checking.lock().await;
        executor.check(service, state, record).await
    }
}

/// Spawn the scheduler task of one service. Cancelling `parent` stops it too.
pub fn spawn_service_task(
    service: Service,
    state: SharedState,
    gate: CheckGate,
    executor: Arc<MonitoringExecutor>,
    parent: &CancellationToken,
) -> TaskHandle {
    let stop = parent.child_token();
    let (requests, receiver) = mpsc::channel(REQUEST_QUEUE);
    let join = tokio::spawn(run_service(service, state, gate, executor, stop.clone(), receiver));
    TaskHandle { stop, requests, join }
}

/// Where the next probe should start, given when the last one finished.
///
/// Online services wake at the checkpoint (immediately when the probe
/// overran); offline services wait a full interval from now.
pub fn next_wake(checkpoint: Instant, now: Instant, online: bool, interval: std::time::Duration) -> Instant {
    if online { checkpoint.max(now) } else { now + interval }
}

async fn run_service(
    service: Service,
    state: SharedState,
    gate: CheckGate,
    executor: Arc<MonitoringExecutor>,
    stop: CancellationToken,
    mut requests: mpsc::Receiver<CheckRequest>,
) {
    let _running = tokio::select! {
        biased;
        () = stop.cancelled() => return,
        guard = gate.running.clone().lock_owned() => guard,
    };

    let interval = service.duration();
    let mut checkpoint = Instant::now() + service.stagger();
    let mut deadline = checkpoint;
    state.write().checkpoint = Some(checkpoint);

    info!(service_id = service.id, service = %service.name, ?interval, "Starting service checker");

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            Some(request) = requests.recv() => {
                let status = gate.check(&executor, &service, &state, request.record).await;
                let _ = request.reply.send(status);
                continue;
            }
            () = sleep_until(deadline) => {}
        }

        let status = gate.check(&executor, &service, &state, true).await;

        checkpoint += interval;
        let now = Instant::now();
        deadline = next_wake(checkpoint, now, status.online, interval);

        let sleep = deadline - now;
        {
            let mut state = state.write();
            state.checkpoint = Some(checkpoint);
            state.sleep_duration = sleep;
        }
        debug!(service_id = service.id, online = status.online, ?sleep, "Next probe scheduled");
    }

    info!(service_id = service.id, service = %service.name, "Stopped service checker");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_next_wake_online_uses_checkpoint() {
        let now = Instant::now();
        let interval = Duration::from_secs(10);
        assert_eq!(next_wake(now + Duration::from_secs(7), now, true, interval), now + Duration::from_secs(7));
    }

    #[test]
    fn test_next_wake_online_overrun_is_immediate() {
        let now = Instant::now();
        let checkpoint = now.checked_sub(Duration::from_secs(2)).unwrap_or(now);
        assert_eq!(next_wake(checkpoint, now, true, Duration::from_secs(10)), now);
    }

    #[test]
    fn test_next_wake_offline_waits_full_interval() {
        let now = Instant::now();
        let interval = Duration::from_secs(10);
        assert_eq!(next_wake(now + Duration::from_secs(7), now, false, interval), now + interval);
    }
}
