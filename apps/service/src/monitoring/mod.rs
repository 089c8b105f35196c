/// Monitoring engine module - probes services and schedules checks
///
/// This module is responsible for:
/// - Executing DNS, HTTP and TCP probes
/// - Running one drift-corrected scheduler task per service
/// - Recording outcomes as evidence and fanning them out to notifiers
pub mod checker;
pub mod executor;
pub mod recorder;
pub mod scheduler;
pub mod types;
pub mod validation;

pub use executor::MonitoringExecutor;
pub use recorder::{Recorder, SharedState};
pub use scheduler::{CheckGate, CheckRequest, TaskHandle, spawn_service_task};
pub use types::{ProbeError, ProbeOutcome, Protocol, Service, ServiceState, ServiceStatus};
pub use validation::{ValidationError, validate_service};
