/// Integration tests for the orchestrator
///
/// These run real scheduler tasks against scripted checkers on a paused
/// clock, so probe timing is exact.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

use crate::database::models::{Failure, Hit, HitStats};
use crate::database::{FailureQuery, MemoryStore, Store, StoreError};
use crate::monitoring::executor::testing::ScriptedChecker;
use crate::monitoring::Service;
use crate::notifier::testing::RecordingNotifier;
use crate::notifier::{ChannelConfig, Notifier, Notifiers};
use crate::orchestrator::{Orchestrator, OrchestratorError, uptime_percent};

struct Harness {
    store: Arc<MemoryStore>,
    checker: Arc<ScriptedChecker>,
    channel: Arc<RecordingNotifier>,
    orchestrator: Orchestrator,
}

fn harness(script: &[bool], cost: Duration) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let checker = Arc::new(ScriptedChecker::new(script, cost));
    let channel = Arc::new(RecordingNotifier::new(ChannelConfig::new(1, "test")));
    let notifiers = Notifiers::new(vec![channel.clone()]);
    let orchestrator = Orchestrator::with_checkers(store.clone(), notifiers, checker.clone(), checker.clone());
    Harness { store, checker, channel, orchestrator }
}

fn service(id: i64, interval: u64) -> Service {
    Service { interval, ..Service::http(id, format!("svc-{id}"), "https://example.com") }
}

fn offsets(starts: &[Instant], origin: Instant) -> Vec<Duration> {
    starts.iter().map(|s| s.duration_since(origin)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_repeated_start_keeps_single_task() {
    let h = harness(&[true], Duration::from_millis(1));

    assert!(h.orchestrator.start(service(1, 10)));
    for _ in 0..5 {
        assert!(!h.orchestrator.start(service(1, 10)));
    }
    assert!(h.orchestrator.is_running(1));

    sleep(Duration::from_secs(25)).await;
    h.orchestrator.stop(1).await;

    // One task probing at 0.1s, 10.1s and 20.1s; duplicates would multiply this.
    assert_eq!(h.checker.starts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_every_probe_appends_exactly_one_row() {
    let h = harness(&[true, false, true, false, true], Duration::from_millis(1));
    h.orchestrator.start(service(1, 10));

    sleep(Duration::from_secs(45)).await;
    assert!(h.orchestrator.stop(1).await);

    let probes = h.checker.starts().len();
    assert!(probes >= 4);
    assert_eq!(h.store.hits().len() + h.store.failures().len(), probes);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_notices_match_transitions() {
    let h = harness(&[false, true, true, false, true], Duration::from_millis(1));
    h.orchestrator.start(service(1, 10));

    sleep(Duration::from_secs(45)).await;
    h.orchestrator.stop(1).await;

    let texts = h.channel.queued_texts();
    let recoveries = texts.iter().filter(|t| t.ends_with("back online")).count();
    let failures = texts.iter().filter(|t| t.contains("failing")).count();
    assert_eq!(recoveries, 2);
    assert_eq!(failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_online_service_holds_cadence_despite_probe_cost() {
    let h = harness(&[true], Duration::from_secs(3));
    let origin = Instant::now();
    h.orchestrator.start(service(1, 10));

    sleep(Duration::from_secs(25)).await;
    h.orchestrator.stop(1).await;

    let starts = offsets(&h.checker.starts(), origin);
    assert_eq!(
        starts,
        vec![Duration::from_millis(100), Duration::from_millis(10_100), Duration::from_millis(20_100)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_offline_service_waits_full_interval_after_probe() {
    let h = harness(&[false], Duration::from_secs(3));
    let origin = Instant::now();
    h.orchestrator.start(service(1, 10));

    sleep(Duration::from_secs(30)).await;
    h.orchestrator.stop(1).await;

    let starts = offsets(&h.checker.starts(), origin);
    assert_eq!(
        starts,
        vec![Duration::from_millis(100), Duration::from_millis(13_100), Duration::from_millis(26_100)]
    );
    let status = h.orchestrator.status(1).unwrap();
    assert!(!status.online);
    assert_eq!(status.last_issue.as_deref(), Some("HTTP Status Code 500 did not match 200"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_probe_in_flight() {
    let h = harness(&[true], Duration::from_secs(5));
    let origin = Instant::now();
    h.orchestrator.start(service(0, 30));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.checker.starts().len(), 1);

    assert!(h.orchestrator.stop(0).await);

    assert!(origin.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.store.hits().len(), 1);
    assert!(!h.orchestrator.is_running(0));
    assert!(!h.orchestrator.stop(0).await, "already stopped");
}

#[tokio::test(start_paused = true)]
async fn test_manual_check_waits_for_running_probe() {
    let h = harness(&[true], Duration::from_secs(5));
    h.orchestrator.start(service(0, 60));

    sleep(Duration::from_secs(1)).await;
    let status = h.orchestrator.check(0, true).await.unwrap();
    assert!(status.online);

    let starts = h.checker.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].duration_since(starts[0]), Duration::from_secs(5));
    assert_eq!(h.store.hits().len(), 2);

    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_close_waits_for_old_check() {
    let h = harness(&[true], Duration::from_secs(5));
    let origin = Instant::now();
    h.orchestrator.start(service(0, 60));

    sleep(Duration::from_secs(1)).await;
    let closing = h.orchestrator.close(0).unwrap();
    assert!(h.orchestrator.start(service(0, 60)), "restart accepted");
    assert!(!h.orchestrator.start(service(0, 60)), "only one replacement task");

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.checker.starts().len(), 1, "nothing starts while the old check is in flight");

    closing.await.unwrap();
    sleep(Duration::from_secs(6)).await;

    let starts = offsets(&h.checker.starts(), origin);
    assert_eq!(starts, vec![Duration::ZERO, Duration::from_secs(5)]);
    assert_eq!(h.store.hits().len(), 2);

    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_manual_checks_of_idle_service_run_in_turn() {
    let h = harness(&[true], Duration::from_secs(5));
    h.orchestrator.register(service(3, 30));

    let (first, second) = tokio::join!(h.orchestrator.check(3, true), h.orchestrator.check(3, true));
    assert!(first.unwrap().online);
    assert!(second.unwrap().online);

    let starts = h.checker.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].duration_since(starts[0]), Duration::from_secs(5));
    assert_eq!(h.store.hits().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_check_racing_start_does_not_overlap() {
    let h = harness(&[true], Duration::from_secs(5));
    h.orchestrator.register(service(0, 60));

    let (status, ()) = tokio::join!(h.orchestrator.check(0, true), async {
        sleep(Duration::from_secs(1)).await;
        assert!(h.orchestrator.start(service(0, 60)));
    });
    assert!(status.unwrap().online);

    sleep(Duration::from_secs(10)).await;
    let starts = h.checker.starts();
    assert_eq!(starts.len(), 2);
    assert!(starts[1].duration_since(starts[0]) >= Duration::from_secs(5));

    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_check_of_idle_service_probes_directly() {
    let h = harness(&[false], Duration::from_millis(1));
    h.orchestrator.register(service(3, 30));

    let status = h.orchestrator.check(3, false).await.unwrap();
    assert!(!status.online);
    assert!(h.store.failures().is_empty(), "unrecorded check stores nothing");

    h.orchestrator.check(3, true).await.unwrap();
    assert_eq!(h.store.failures().len(), 1);

    let err = h.orchestrator.check(99, true).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownService(99)));
}

#[tokio::test(start_paused = true)]
async fn test_aggregates() {
    let h = harness(&[false], Duration::from_millis(1));
    h.orchestrator.start(service(1, 10));
    h.orchestrator.register(service(2, 10));

    sleep(Duration::from_secs(15)).await;
    h.orchestrator.shutdown().await;

    assert_eq!(h.orchestrator.services_count(), 2);
    assert_eq!(h.orchestrator.count_online(), 0);
    assert_eq!(h.orchestrator.total_failures(1).await.unwrap(), 2);
    assert_eq!(h.orchestrator.count_failures().await.unwrap(), 2);
    assert_eq!(h.orchestrator.count_24h_failures().await.unwrap(), 2);
    assert_eq!(h.orchestrator.recent_failures(1, 1).await.unwrap().len(), 1);

    assert_eq!(h.orchestrator.delete_failures(1).await.unwrap(), 2);
    assert_eq!(h.store.count_failures(FailureQuery::all()).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_summary_reports_uptime_and_average_latency() {
    let h = harness(&[true, true, true, false], Duration::from_millis(20));
    h.orchestrator.register(service(4, 30));

    for _ in 0..4 {
        h.orchestrator.check(4, true).await.unwrap();
    }

    let summary = h.orchestrator.summary(4).await.unwrap();
    assert!(!summary.status.online);
    assert_eq!(summary.online_24h, 75.0);
    assert_eq!(summary.avg_response_ms, Some(20.0));
    assert_eq!(summary.failures_24h, 1);

    h.orchestrator.register(service(5, 30));
    let idle = h.orchestrator.summary(5).await.unwrap();
    assert_eq!(idle.online_24h, 100.0);
    assert_eq!(idle.avg_response_ms, None);

    assert!(matches!(h.orchestrator.summary(99).await, Err(OrchestratorError::UnknownService(99))));
}

#[test]
fn test_uptime_percent_rounds_to_hundredths() {
    assert_eq!(uptime_percent(0, 0), 100.0);
    assert_eq!(uptime_percent(2, 1), 66.67);
    assert_eq!(uptime_percent(0, 5), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_task() {
    let h = harness(&[true], Duration::from_millis(1));
    for id in 1..=3 {
        h.orchestrator.start(service(id, 10));
    }

    sleep(Duration::from_secs(1)).await;
    h.orchestrator.shutdown().await;

    assert!((1..=3).all(|id| !h.orchestrator.is_running(id)));
    let probes = h.checker.starts().len();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.checker.starts().len(), probes);
}

/// Store whose every write fails
struct BrokenStore;

#[async_trait]
impl Store for BrokenStore {
    async fn create_hit(&self, _hit: &Hit) -> Result<i64, StoreError> {
        Err(StoreError::Setup("disk full".into()))
    }

    async fn create_failure(&self, _failure: &Failure) -> Result<i64, StoreError> {
        Err(StoreError::Setup("disk full".into()))
    }

    async fn count_failures(&self, _query: FailureQuery) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn count_hits(&self, _service_id: i64) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn hit_stats(&self, _service_id: i64, _since: Option<DateTime<Utc>>) -> Result<HitStats, StoreError> {
        Ok(HitStats::default())
    }

    async fn recent_failures(&self, _service_id: i64, _limit: usize) -> Result<Vec<Failure>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete_failures(&self, _service_id: i64) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn save_service(&self, _service: &Service) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_still_updates_live_state() {
    let checker = Arc::new(ScriptedChecker::new(&[false, true], Duration::from_millis(1)));
    let channel = Arc::new(RecordingNotifier::new(ChannelConfig::new(1, "test")));
    let orchestrator = Orchestrator::with_checkers(
        Arc::new(BrokenStore),
        Notifiers::new(vec![channel.clone()]),
        checker.clone(),
        checker,
    );
    orchestrator.start(service(1, 10));

    sleep(Duration::from_secs(1)).await;
    assert!(!orchestrator.status(1).unwrap().online);

    sleep(Duration::from_secs(11)).await;
    let status = orchestrator.status(1).unwrap();
    assert!(status.online);
    assert!(status.last_online.is_some());
    assert_eq!(channel.base().queued(), 2, "failure and recovery notices still queued");

    orchestrator.shutdown().await;
}
