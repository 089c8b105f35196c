use regex::Regex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{Instant, timeout};
use url::Url;

use super::types::{HttpMethod, ProbeError, ProbeOutcome, Service};

const USER_AGENT: &str = concat!("upkeep/", env!("CARGO_PKG_VERSION"));

/// Checker trait for the different probe protocols
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Perform one probe of the service
    async fn probe(&self, service: &Service) -> ProbeOutcome;
}

/// Host part of a probe target: the URL host when the target is a URL,
/// otherwise the target with any trailing `:port` removed.
pub fn resolvable_host(target: &str) -> String {
    if let Ok(url) = Url::parse(target) {
        if let Some(host) = url.host_str() {
            return host.trim_start_matches('[').trim_end_matches(']').to_string();
        }
    }

    match target.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            host.to_string()
        }
        _ => target.to_string(),
    }
}

/// Resolve the target's host.
///
/// The lookup time is returned whether or not the host resolved.
pub async fn dns_probe(target: &str, limit: Duration) -> (Duration, Result<(), ProbeError>) {
    let host = resolvable_host(target);
    let start = Instant::now();

    let resolution = |reason: &str| ProbeError::Resolution { target: target.to_string(), reason: reason.to_string() };

    let result = match timeout(limit, tokio::net::lookup_host((host.as_str(), 0))).await {
        Err(_) => Err(resolution("lookup timed out")),
        Ok(Err(e)) => Err(resolution(&e.to_string())),
        Ok(Ok(mut addrs)) => match addrs.next() {
            Some(_) => Ok(()),
            None => Err(resolution("no such host")),
        },
    };

    (start.elapsed(), result)
}

/// HTTP checker: DNS lookup, request, then body and status gates
#[derive(Debug)]
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self { client })
    }
}

/// Whether `pattern` is found anywhere in `body`.
///
/// Patterns that do not compile as a regex are searched for literally.
pub fn body_matches(pattern: &str, body: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(body),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Expected body pattern is not a valid regex, using substring search");
            body.contains(pattern)
        }
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn probe(&self, service: &Service) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::new();

        let (elapsed, resolved) = dns_probe(&service.target, service.timeout()).await;
        outcome = outcome.with_dns_lookup(elapsed);
        if let Err(e) = resolved {
            return outcome.failure(e);
        }

        let request = match service.method {
            HttpMethod::Post => self
                .client
                .post(&service.target)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(service.post_data.clone()),
            HttpMethod::Get => self.client.get(&service.target),
        };

        let start = Instant::now();
        let response = match request.timeout(service.timeout()).send().await {
            Ok(response) => response,
            Err(e) => return outcome.failure(ProbeError::Transport(e.to_string())),
        };
        outcome.latency = Some(start.elapsed());

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                outcome.status_code = Some(status);
                return outcome.failure(ProbeError::Transport(e.to_string()));
            }
        };
        outcome = outcome.with_response(Some(status), body);

        let body = outcome.response_body.as_deref().unwrap_or_default();
        if !service.expected.is_empty() && !body_matches(&service.expected, body) {
            let expected = service.expected.clone();
            return outcome.failure(ProbeError::ContentMismatch { expected });
        }

        if status != service.expected_status {
            let expected = service.expected_status;
            return outcome.failure(ProbeError::StatusMismatch { actual: status, expected });
        }

        outcome
    }
}

/// TCP port checker
#[derive(Debug, Default)]
pub struct TcpChecker;

impl TcpChecker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn probe(&self, service: &Service) -> ProbeOutcome {
        let outcome = ProbeOutcome::new();
        let address = service.address();
        let start = Instant::now();

        let mut stream = match timeout(service.timeout(), tokio::net::TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return outcome.failure(ProbeError::Connect(format!("dial tcp {address}: {e}"))),
            Err(_) => {
                return outcome.failure(ProbeError::Connect(format!("dial tcp {address}: i/o timeout")));
            }
        };

        if let Err(e) = stream.shutdown().await {
            return outcome.failure(ProbeError::Close(e.to_string()));
        }

        outcome.with_response(None, String::new()).success(start.elapsed())
    }
}
