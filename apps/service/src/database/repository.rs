use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use std::time::Duration;

use super::Result;
use super::StoreError;
use super::models::{Failure, FailureQuery, Hit, HitStats, i64_to_timestamp, timestamp_to_i64};
use super::pool::{LibsqlManager, LibsqlPool};
use crate::monitoring::types::{HttpMethod, Service};

/// Storage collaborator. Implementations must accept concurrent appends
/// from any number of scheduler tasks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append a hit, returning its id
    async fn create_hit(&self, hit: &Hit) -> Result<i64>;

    /// Append a failure, returning its id
    async fn create_failure(&self, failure: &Failure) -> Result<i64>;

    /// Count failures matching the query
    async fn count_failures(&self, query: FailureQuery) -> Result<u64>;

    /// Count hits recorded for a service
    async fn count_hits(&self, service_id: i64) -> Result<u64>;

    /// Count and mean latency of a service's hits, optionally only those
    /// created strictly after `since`
    async fn hit_stats(&self, service_id: i64, since: Option<DateTime<Utc>>) -> Result<HitStats>;

    /// Most recent failures of a service, newest first
    async fn recent_failures(&self, service_id: i64, limit: usize) -> Result<Vec<Failure>>;

    /// Remove every failure of a service
    async fn delete_failures(&self, service_id: i64) -> Result<u64>;

    /// Remove hits and failures created before the cutoff
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Insert or replace a service definition
    async fn save_service(&self, service: &Service) -> Result<()>;

    /// All stored service definitions
    async fn list_services(&self) -> Result<Vec<Service>>;
}

/// LibSQL store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Create a new store from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn count(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0).unsigned_abs()),
            None => Ok(0),
        }
    }
}

fn service_from_row(row: &Row) -> Result<Service> {
    let protocol: String = row.get(4)?;
    let method: String = row.get(7)?;
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        target: row.get(2)?,
        port: u16::try_from(row.get::<i64>(3)?).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        protocol: protocol.parse().map_err(StoreError::Corrupt)?,
        interval: row.get::<i64>(5)?.max(0).unsigned_abs(),
        timeout: row.get::<i64>(6)?.max(0).unsigned_abs(),
        method: if method.eq_ignore_ascii_case("POST") { HttpMethod::Post } else { HttpMethod::Get },
        post_data: row.get(8)?,
        expected: row.get(9)?,
        expected_status: u16::try_from(row.get::<i64>(10)?)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
    })
}

#[async_trait]
impl Store for LibsqlStore {
    async fn create_hit(&self, hit: &Hit) -> Result<i64> {
        let conn = self.get_conn().await?;
        let latency_us = i64::try_from(hit.latency.as_micros()).unwrap_or(i64::MAX);

        conn.execute(
            "INSERT INTO hits (service, latency_us, created_at) VALUES (?, ?, ?)",
            params![hit.service_id, latency_us, timestamp_to_i64(hit.created_at)],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn create_failure(&self, failure: &Failure) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO failures (service, issue, created_at) VALUES (?, ?, ?)",
            params![failure.service_id, failure.issue.clone(), timestamp_to_i64(failure.created_at)],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn count_failures(&self, query: FailureQuery) -> Result<u64> {
        let since = query.since.map(timestamp_to_i64);
        match (query.service_id, since) {
            (Some(id), Some(since)) => {
                self.count(
                    "SELECT COUNT(*) FROM failures WHERE service = ? AND created_at > ?",
                    params![id, since],
                )
                .await
            }
            (Some(id), None) => {
                self.count("SELECT COUNT(*) FROM failures WHERE service = ?", params![id]).await
            }
            (None, Some(since)) => {
                self.count("SELECT COUNT(*) FROM failures WHERE created_at > ?", params![since]).await
            }
            (None, None) => self.count("SELECT COUNT(*) FROM failures", ()).await,
        }
    }

    async fn count_hits(&self, service_id: i64) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM hits WHERE service = ?", params![service_id]).await
    }

    async fn hit_stats(&self, service_id: i64, since: Option<DateTime<Utc>>) -> Result<HitStats> {
        let conn = self.get_conn().await?;
        let since = since.map_or(i64::MIN, timestamp_to_i64);
        let mut rows = conn
            .query(
                "SELECT COUNT(*), AVG(latency_us) FROM hits WHERE service = ? AND created_at > ?",
                params![service_id, since],
            )
            .await?;

        let Some(row) = rows.next().await? else { return Ok(HitStats::default()) };
        let count = row.get::<i64>(0)?.max(0).unsigned_abs();
        let average_latency = match row.get_value(1)? {
            libsql::Value::Real(avg) if avg >= 0.0 => Some(Duration::from_micros(avg.round() as u64)),
            libsql::Value::Integer(avg) => Some(Duration::from_micros(avg.max(0).unsigned_abs())),
            _ => None,
        };

        Ok(HitStats { count, average_latency })
    }

    async fn recent_failures(&self, service_id: i64, limit: usize) -> Result<Vec<Failure>> {
        let conn = self.get_conn().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = conn
            .query(
                "SELECT id, service, issue, created_at FROM failures WHERE service = ? ORDER BY id DESC LIMIT ?",
                params![service_id, limit],
            )
            .await?;

        let mut failures = Vec::new();
        while let Some(row) = rows.next().await? {
            failures.push(Failure {
                id: Some(row.get(0)?),
                service_id: row.get(1)?,
                issue: row.get(2)?,
                created_at: i64_to_timestamp(row.get(3)?),
            });
        }

        Ok(failures)
    }

    async fn delete_failures(&self, service_id: i64) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn.execute("DELETE FROM failures WHERE service = ?", params![service_id]).await?)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let cutoff = timestamp_to_i64(cutoff);
        let failures = conn.execute("DELETE FROM failures WHERE created_at < ?", params![cutoff]).await?;
        let hits = conn.execute("DELETE FROM hits WHERE created_at < ?", params![cutoff]).await?;
        Ok(failures + hits)
    }

    async fn save_service(&self, service: &Service) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT OR REPLACE INTO services (id, name, target, port, protocol, check_interval, timeout, method, post_data, expected, expected_status) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                service.id,
                service.name.clone(),
                service.target.clone(),
                i64::from(service.port),
                service.protocol.to_string(),
                i64::try_from(service.interval).unwrap_or(i64::MAX),
                i64::try_from(service.timeout).unwrap_or(i64::MAX),
                service.method.to_string(),
                service.post_data.clone(),
                service.expected.clone(),
                i64::from(service.expected_status)
            ],
        )
        .await?;

        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, target, port, protocol, check_interval, timeout, method, post_data, expected, expected_status FROM services ORDER BY id",
                (),
            )
            .await?;

        let mut services = Vec::new();
        while let Some(row) = rows.next().await? {
            services.push(service_from_row(&row)?);
        }

        Ok(services)
    }
}
