//! Upkeep: a self-hosted uptime monitor.
//!
//! Services are probed on a fixed cadence over DNS, TCP or HTTP. Every probe
//! leaves a hit or a failure in the store, and state changes are fanned out
//! to the configured notification channels.

pub mod config;
pub mod database;
pub mod monitoring;
pub mod notifier;
pub mod orchestrator;
