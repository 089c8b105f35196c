use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::Result;
use super::models::{Failure, FailureQuery, Hit, HitStats};
use super::repository::Store;
use crate::monitoring::types::Service;

/// Non-durable store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    hits: Mutex<Vec<Hit>>,
    failures: Mutex<Vec<Failure>>,
    services: Mutex<BTreeMap<i64, Service>>,
    last_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored hit
    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().clone()
    }

    /// Snapshot of every stored failure
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }

    fn next_id(&self) -> i64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_hit(&self, hit: &Hit) -> Result<i64> {
        let id = self.next_id();
        self.hits.lock().push(Hit { id: Some(id), ..hit.clone() });
        Ok(id)
    }

    async fn create_failure(&self, failure: &Failure) -> Result<i64> {
        let id = self.next_id();
        self.failures.lock().push(Failure { id: Some(id), ..failure.clone() });
        Ok(id)
    }

    async fn count_failures(&self, query: FailureQuery) -> Result<u64> {
        let failures = self.failures.lock();
        Ok(failures.iter().filter(|f| query.matches(f)).count() as u64)
    }

    async fn count_hits(&self, service_id: i64) -> Result<u64> {
        let hits = self.hits.lock();
        Ok(hits.iter().filter(|h| h.service_id == service_id).count() as u64)
    }

    async fn hit_stats(&self, service_id: i64, since: Option<DateTime<Utc>>) -> Result<HitStats> {
        let hits = self.hits.lock();
        Ok(HitStats::from_latencies(
            hits.iter()
                .filter(|h| h.service_id == service_id && since.is_none_or(|since| h.created_at > since))
                .map(|h| h.latency),
        ))
    }

    async fn recent_failures(&self, service_id: i64, limit: usize) -> Result<Vec<Failure>> {
        let failures = self.failures.lock();
        Ok(failures.iter().rev().filter(|f| f.service_id == service_id).take(limit).cloned().collect())
    }

    async fn delete_failures(&self, service_id: i64) -> Result<u64> {
        let mut failures = self.failures.lock();
        let before = failures.len();
        failures.retain(|f| f.service_id != service_id);
        Ok((before - failures.len()) as u64)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0;
        {
            let mut hits = self.hits.lock();
            let before = hits.len();
            hits.retain(|h| h.created_at >= cutoff);
            removed += before - hits.len();
        }
        let mut failures = self.failures.lock();
        let before = failures.len();
        failures.retain(|f| f.created_at >= cutoff);
        removed += before - failures.len();
        Ok(removed as u64)
    }

    async fn save_service(&self, service: &Service) -> Result<()> {
        self.services.lock().insert(service.id, service.clone());
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.services.lock().values().cloned().collect())
    }
}
