/// Notification dispatch
///
/// Every channel owns a mailbox and a drain task:
/// - failure notices are queued on every failing probe
/// - recovery notices are queued once per outage
/// - the drain task paces delivery and drops messages that fail to send
pub mod base;
pub mod discord;
pub mod email;
pub mod slack;

pub use base::{ChannelBase, ChannelConfig};
pub use discord::Discord;
pub use email::{Email, EmailMessage};
pub use slack::Slack;

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::models::Failure;
use crate::monitoring::types::ServiceStatus;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Webhook delivery failed: {0}")]
    Delivery(#[from] reqwest::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Invalid email: {0}")]
    Email(String),

    #[error("Channel {channel} sent {sent} messages in the last minute (limit {limit})")]
    RateLimited { channel: String, sent: usize, limit: u32 },

    #[error("Channel {channel} is missing parameter '{param}'")]
    MissingParam { channel: String, param: String },

    #[error("Unknown notifier method '{0}'")]
    UnknownMethod(String),

    #[error("No notifier with id {0}")]
    UnknownChannel(i64),

    #[error("Channel {0} cannot deliver this kind of message")]
    UnsupportedPayload(String),
}

/// A queued message, shaped for the channel that queued it
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Webhook(serde_json::Value),
    Email(EmailMessage),
}

/// A notification channel
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Shared channel state
    fn base(&self) -> &ChannelBase;

    /// Deliver one message through the channel transport
    async fn send(&self, payload: &Payload) -> Result<(), NotifyError>;

    /// A probe of `service` failed
    fn on_failure(&self, service: &ServiceStatus, failure: &Failure);

    /// A probe of `service` succeeded
    fn on_success(&self, service: &ServiceStatus);

    /// Check the channel settings by reaching its transport right away,
    /// bypassing the mailbox
    async fn on_test(&self) -> Result<(), NotifyError>;

    /// Whether the channel may send right now
    fn within_limits(&self) -> Result<bool, NotifyError> {
        self.base().within_limits()
    }
}

/// Build a channel from its configuration
pub fn build_notifier(config: ChannelConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    let notifier: Arc<dyn Notifier> = match config.method.to_ascii_lowercase().as_str() {
        "email" => Arc::new(Email::new(config)),
        "discord" => Arc::new(Discord::new(config)?),
        "slack" => Arc::new(Slack::new(config)?),
        other => return Err(NotifyError::UnknownMethod(other.to_string())),
    };
    Ok(notifier)
}

/// Registered channels, built once at startup
#[derive(Default, Clone)]
pub struct Notifiers {
    channels: Vec<Arc<dyn Notifier>>,
}

impl Notifiers {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn from_configs(configs: &[ChannelConfig]) -> Result<Self, NotifyError> {
        let channels = configs.iter().cloned().map(build_notifier).collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(channels))
    }

    pub fn channels(&self) -> &[Arc<dyn Notifier>] {
        &self.channels
    }

    fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Notifier>> {
        self.channels.iter().filter(|c| c.base().is_enabled())
    }

    /// Fan a failure out to every enabled channel
    pub fn on_failure(&self, service: &ServiceStatus, failure: &Failure) {
        for channel in self.enabled() {
            channel.on_failure(service, failure);
        }
    }

    /// Fan a success out to every enabled channel
    pub fn on_success(&self, service: &ServiceStatus) {
        for channel in self.enabled() {
            channel.on_success(service);
        }
    }

    /// Test the channel with the given id
    pub async fn test(&self, id: i64) -> Result<(), NotifyError> {
        let channel = self.channels.iter().find(|c| c.base().id() == id).ok_or(NotifyError::UnknownChannel(id))?;
        info!(channel = channel.base().title(), method = channel.base().method(), "Testing notifier");
        channel.on_test().await
    }

    /// Spawn one drain task per enabled channel
    pub fn start(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.enabled()
            .map(|channel| {
                info!(channel = channel.base().title(), method = channel.base().method(), "Starting notifier");
                tokio::spawn(drain(channel.clone(), shutdown.clone()))
            })
            .collect()
    }
}

/// Deliver queued messages while the channel stays within its limits.
/// Returns the number of delivery attempts made.
pub async fn drain_once(notifier: &dyn Notifier) -> usize {
    let base = notifier.base();
    let mut attempts = 0;

    while base.queued() > 0 {
        match notifier.within_limits() {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                debug!(channel = base.title(), "Skipping drain: {}", e);
                break;
            }
        }

        let Some(payload) = base.pop() else { break };
        base.mark_sent();
        attempts += 1;

        if let Err(e) = notifier.send(&payload).await {
            warn!(channel = base.title(), "Dropping notification after failed delivery: {}", e);
        }
    }

    attempts
}

/// Drain loop of one channel; runs until shutdown
pub async fn drain(notifier: Arc<dyn Notifier>, shutdown: CancellationToken) {
    let delay = notifier.base().delay();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!(channel = notifier.base().title(), queued = notifier.base().queued(), "Stopping notifier");
                break;
            }
            () = tokio::time::sleep(delay) => {}
        }

        drain_once(notifier.as_ref()).await;
    }
}
