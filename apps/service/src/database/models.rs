use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Substrings of low-level error text and the label shown for them.
/// Checked in order, case-insensitively; the first hit wins.
const ISSUE_LABELS: &[(&str, &str)] = &[
    ("connection reset", "Connection Reset"),
    ("operation timed out", "HTTP Request Timed Out"),
    ("x509: certificate is valid", "SSL Certificate invalid"),
    ("invalid peer certificate", "SSL Certificate invalid"),
    ("certificate verify failed", "SSL Certificate invalid"),
    ("awaiting headers", "Connection Timed Out"),
    ("i/o timeout", "Connection Timed Out"),
    ("no such host", "Domain is offline or not found"),
    ("failed to lookup address", "Domain is offline or not found"),
    ("name or service not known", "Domain is offline or not found"),
    ("http status code", "Incorrect HTTP Status Code"),
    ("connection refused", "Connection Failed"),
    ("can't assign requested address", "Unable to Request Address"),
    ("cannot assign requested address", "Unable to Request Address"),
    ("no route to host", "Domain is offline or not found"),
];

/// Short display label for a raw failure issue. Unknown text is returned as-is.
pub fn classify_issue(issue: &str) -> &str {
    let lowered = issue.to_lowercase();
    ISSUE_LABELS
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map_or(issue, |(_, label)| label)
}

/// Successful probe evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: Option<i64>,
    pub service_id: i64,
    pub latency: Duration,
    pub created_at: DateTime<Utc>,
}

impl Hit {
    pub fn new(service_id: i64, latency: Duration) -> Self {
        Self { id: None, service_id, latency, created_at: Utc::now() }
    }
}

/// Number of hits and their mean latency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HitStats {
    pub count: u64,
    pub average_latency: Option<Duration>,
}

impl HitStats {
    pub fn from_latencies(latencies: impl IntoIterator<Item = Duration>) -> Self {
        let (count, total) = latencies.into_iter().fold((0u64, Duration::ZERO), |(n, t), l| (n + 1, t + l));
        let average_latency = u32::try_from(count).ok().filter(|n| *n > 0).map(|n| total / n);
        Self { count, average_latency }
    }
}

/// Failed probe evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub id: Option<i64>,
    pub service_id: i64,
    pub issue: String,
    pub created_at: DateTime<Utc>,
}

impl Failure {
    pub fn new(service_id: i64, issue: impl Into<String>) -> Self {
        Self { id: None, service_id, issue: issue.into(), created_at: Utc::now() }
    }

    /// Human readable form of the issue
    pub fn label(&self) -> &str {
        classify_issue(&self.issue)
    }
}

/// Filter for failure counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureQuery {
    pub service_id: Option<i64>,
    /// Only failures created strictly after this instant
    pub since: Option<DateTime<Utc>>,
}

impl FailureQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn service(service_id: i64) -> Self {
        Self { service_id: Some(service_id), since: None }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, failure: &Failure) -> bool {
        self.service_id.is_none_or(|id| failure.service_id == id)
            && self.since.is_none_or(|since| failure.created_at > since)
    }
}

/// Convert a timestamp to the millisecond column format
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert a millisecond column back to a timestamp
pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
