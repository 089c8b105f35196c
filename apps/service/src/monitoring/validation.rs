//! Service definition validation, applied to seed services loaded from the
//! config file before anything is scheduled.

use thiserror::Error;
use url::Url;

use super::checker::resolvable_host;
use super::types::{Protocol, Service};

const MIN_TIMEOUT: u64 = 1;
const MAX_TIMEOUT: u64 = 300; // 5 minutes

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service {id}: invalid URL '{target}': {reason}")]
    InvalidUrl { id: i64, target: String, reason: String },

    #[error("service {id}: invalid scheme for HTTP service: {scheme}")]
    InvalidScheme { id: i64, scheme: String },

    #[error("service {id}: TCP target needs a host")]
    MissingHost { id: i64 },

    #[error("service {id}: TCP target needs a port")]
    MissingPort { id: i64 },

    #[error("service {id}: timeout {timeout}s outside 1..=300")]
    Timeout { id: i64, timeout: u64 },

    #[error("service {id}: expected status {status} is not an HTTP status code")]
    Status { id: i64, status: u16 },

    #[error("service {id}: check interval must be positive")]
    Interval { id: i64 },
}

/// Validate a service definition
pub fn validate_service(service: &Service) -> Result<(), ValidationError> {
    let id = service.id;

    match service.protocol {
        Protocol::Http => validate_http_target(id, &service.target)?,
        Protocol::Tcp => validate_tcp_target(id, &service.target, service.port)?,
    }

    validate_timeout(id, service.timeout)?;

    if service.interval == 0 {
        return Err(ValidationError::Interval { id });
    }

    if !(100..=599).contains(&service.expected_status) {
        return Err(ValidationError::Status { id, status: service.expected_status });
    }

    Ok(())
}

fn validate_http_target(id: i64, target: &str) -> Result<(), ValidationError> {
    let url = Url::parse(target).map_err(|e| ValidationError::InvalidUrl {
        id,
        target: target.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::InvalidScheme { id, scheme: other.to_string() }),
    }
}

/// The host goes in `target`; the port either in `port` or as a `:port`
/// suffix of the target.
fn validate_tcp_target(id: i64, target: &str, port: u16) -> Result<(), ValidationError> {
    let host = resolvable_host(target);
    if host.trim().is_empty() {
        return Err(ValidationError::MissingHost { id });
    }

    if port == 0 && host == target {
        return Err(ValidationError::MissingPort { id });
    }

    Ok(())
}

fn validate_timeout(id: i64, timeout: u64) -> Result<(), ValidationError> {
    if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&timeout) {
        return Err(ValidationError::Timeout { id, timeout });
    }
    Ok(())
}
