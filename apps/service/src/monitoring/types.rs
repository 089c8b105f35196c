use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Intervals at or above this value are microseconds, below it seconds.
pub const MICROSECOND_INTERVAL_THRESHOLD: u64 = 10_000;

/// Protocol used to probe a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Tcp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(Protocol::Http),
            "tcp" => Ok(Protocol::Tcp),
            other => Err(format!("unsupported protocol '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// A monitored service definition. Owned by the management surface;
/// the scheduler only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    /// Full URL for HTTP services, bare host for TCP services
    pub target: String,
    /// TCP port, 0 when the target carries none
    #[serde(default)]
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Probe timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub post_data: String,
    /// Pattern searched for in the response body, empty to skip the check
    #[serde(default)]
    pub expected: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

fn default_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    30
}

fn default_expected_status() -> u16 {
    200
}

impl Service {
    /// Create an HTTP service with default timings
    pub fn http(id: i64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            target: url.into(),
            port: 0,
            protocol: Protocol::Http,
            interval: default_interval(),
            timeout: default_timeout(),
            method: HttpMethod::Get,
            post_data: String::new(),
            expected: String::new(),
            expected_status: default_expected_status(),
        }
    }

    /// Create a TCP service with default timings
    pub fn tcp(id: i64, name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { port, protocol: Protocol::Tcp, ..Self::http(id, name, host) }
    }

    /// Nominal time between two probes
    pub fn duration(&self) -> Duration {
        if self.interval >= MICROSECOND_INTERVAL_THRESHOLD {
            Duration::from_micros(self.interval)
        } else {
            Duration::from_secs(self.interval)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Delay before the first probe, spreading simultaneous starts apart
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.id.max(0).unsigned_abs().saturating_mul(100))
    }

    /// `host:port`, or the bare target when no port is configured
    pub fn address(&self) -> String {
        if self.port == 0 { self.target.clone() } else { format!("{}:{}", self.target, self.port) }
    }
}

/// Mutable runtime state of a service, written only by its scheduler task
#[derive(Debug, Clone, Default)]
pub struct ServiceState {
    pub online: bool,
    pub latency: Option<Duration>,
    pub last_response: String,
    pub last_status_code: Option<u16>,
    pub last_online: Option<DateTime<Utc>>,
    pub dns_lookup: Option<Duration>,
    pub last_issue: Option<String>,
    pub checkpoint: Option<Instant>,
    pub sleep_duration: Duration,
}

impl ServiceState {
    /// Copy the measurement side of a probe outcome into the state.
    ///
    /// The online flag is left alone; that belongs to the recorder.
    pub fn apply(&mut self, outcome: &ProbeOutcome) {
        if let Some(dns) = outcome.dns_lookup {
            self.dns_lookup = Some(dns);
        }
        if let Some(latency) = outcome.latency {
            self.latency = Some(latency);
        }
        if let Some(code) = outcome.status_code {
            self.last_status_code = Some(code);
        }
        if let Some(body) = &outcome.response_body {
            self.last_response.clone_from(body);
        }
    }
}

/// Failure taxonomy of a single probe. The display text is the stored issue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("Could not get IP address for domain {target}, {reason}")]
    Resolution { target: String, reason: String },

    #[error("TCP Dial Error {0}")]
    Connect(String),

    #[error("TCP Socket Close Error {0}")]
    Close(String),

    #[error("HTTP Error {0}")]
    Transport(String),

    #[error("HTTP Response Body did not match '{expected}'")]
    ContentMismatch { expected: String },

    #[error("HTTP Status Code {actual} did not match {expected}")]
    StatusMismatch { actual: u16, expected: u16 },
}

/// Result of one probe attempt
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub checked_at: DateTime<Utc>,
    pub dns_lookup: Option<Duration>,
    pub latency: Option<Duration>,
    pub status_code: Option<u16>,
    /// `Some("")` clears the stored snapshot, `None` leaves it untouched
    pub response_body: Option<String>,
    pub result: Result<(), ProbeError>,
}

impl Default for ProbeOutcome {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeOutcome {
    pub fn new() -> Self {
        Self {
            checked_at: Utc::now(),
            dns_lookup: None,
            latency: None,
            status_code: None,
            response_body: None,
            result: Ok(()),
        }
    }

    /// Mark the probe as successful with latency
    pub fn success(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self.result = Ok(());
        self
    }

    /// Mark the probe as failed
    pub fn failure(mut self, error: ProbeError) -> Self {
        self.result = Err(error);
        self
    }

    pub fn with_dns_lookup(mut self, elapsed: Duration) -> Self {
        self.dns_lookup = Some(elapsed);
        self
    }

    pub fn with_response(mut self, status_code: Option<u16>, body: String) -> Self {
        self.status_code = status_code;
        self.response_body = Some(body);
        self
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Point-in-time view of a service for the management surface and notifiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub id: i64,
    pub name: String,
    pub target: String,
    pub protocol: Protocol,
    pub online: bool,
    pub latency_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub last_online: Option<DateTime<Utc>>,
    pub dns_lookup_ms: Option<f64>,
    pub last_issue: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_response: String,
}

impl ServiceStatus {
    pub fn new(service: &Service, state: &ServiceState) -> Self {
        Self {
            id: service.id,
            name: service.name.clone(),
            target: service.target.clone(),
            protocol: service.protocol,
            online: state.online,
            latency_ms: state.latency.map(|d| d.as_secs_f64() * 1000.0),
            status_code: state.last_status_code,
            last_online: state.last_online,
            dns_lookup_ms: state.dns_lookup.map(|d| d.as_secs_f64() * 1000.0),
            last_issue: state.last_issue.clone(),
            last_response: state.last_response.clone(),
        }
    }
}
