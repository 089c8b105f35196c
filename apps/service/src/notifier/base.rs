use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{NotifyError, Payload};

/// Smallest pause between drain rounds
pub const MIN_DELAY: Duration = Duration::from_millis(500);

const LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Channel configuration as stored in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: i64,
    /// Channel kind: `email`, `discord` or `slack`
    pub method: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum time between two sends, in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
    /// Maximum sends per minute, 0 for no cap
    #[serde(default = "default_limits")]
    pub limits: u32,
    /// Mailbox capacity, 0 for unbounded
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_limits() -> u32 {
    7
}

fn default_capacity() -> usize {
    1000
}

impl ChannelConfig {
    pub fn new(id: i64, method: impl Into<String>) -> Self {
        let method = method.into();
        Self {
            id,
            title: method.clone(),
            method,
            enabled: default_enabled(),
            delay_ms: 0,
            limits: default_limits(),
            capacity: default_capacity(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// State shared by every channel kind: mailbox, duplicate-alert flag and
/// send accounting. Each concrete channel holds one.
#[derive(Debug)]
pub struct ChannelBase {
    config: ChannelConfig,
    /// Channel-local view of whether the last event it saw was a success
    online: AtomicBool,
    mailbox: Mutex<VecDeque<Payload>>,
    sent: Mutex<VecDeque<Instant>>,
}

impl ChannelBase {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            online: AtomicBool::new(true),
            mailbox: Mutex::new(VecDeque::new()),
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> i64 {
        self.config.id
    }

    pub fn method(&self) -> &str {
        &self.config.method
    }

    pub fn title(&self) -> &str {
        if self.config.title.is_empty() { &self.config.method } else { &self.config.title }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Minimum delay between sends
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.config.delay_ms).max(MIN_DELAY)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.config.params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, NotifyError> {
        self.param(key).ok_or_else(|| NotifyError::MissingParam {
            channel: self.title().to_string(),
            param: key.to_string(),
        })
    }

    /// Append a message, evicting the oldest one when the mailbox is full
    pub fn enqueue(&self, payload: Payload) {
        let mut mailbox = self.mailbox.lock();
        let capacity = self.config.capacity;
        if capacity > 0 && mailbox.len() >= capacity {
            mailbox.pop_front();
            tracing::warn!(channel = self.title(), capacity = self.config.capacity, "Mailbox full, evicting oldest message");
        }
        mailbox.push_back(payload);
    }

    pub fn pop(&self) -> Option<Payload> {
        self.mailbox.lock().pop_front()
    }

    pub fn queued(&self) -> usize {
        self.mailbox.lock().len()
    }

    /// Queue a failure notice and mark the channel offline
    pub fn queue_failure(&self, payload: Payload) {
        self.enqueue(payload);
        self.online.store(false, Ordering::SeqCst);
    }

    /// Queue a recovery notice if the channel was offline; marks it online.
    /// Returns whether a message was queued.
    pub fn queue_recovery(&self, payload: impl FnOnce() -> Payload) -> bool {
        let was_online = self.online.swap(true, Ordering::SeqCst);
        if !was_online {
            self.enqueue(payload());
        }
        !was_online
    }

    /// Record a delivery attempt for rate accounting
    pub fn mark_sent(&self) {
        self.sent.lock().push_back(Instant::now());
    }

    /// Sends attempted within the last minute
    pub fn sent_last_minute(&self) -> usize {
        let mut sent = self.sent.lock();
        prune_window(&mut sent, Instant::now());
        sent.len()
    }

    /// Whether the channel may send right now.
    ///
    /// `Ok(false)` while the minimum delay since the last send is running,
    /// `Err(RateLimited)` when the per-minute cap is reached.
    pub fn within_limits(&self) -> Result<bool, NotifyError> {
        let now = Instant::now();
        let mut sent = self.sent.lock();
        prune_window(&mut sent, now);

        if let Some(last) = sent.back() {
            if now.duration_since(*last) < self.delay() {
                return Ok(false);
            }
        }

        let limit = self.config.limits;
        if limit > 0 && sent.len() >= limit as usize {
            return Err(NotifyError::RateLimited {
                channel: self.title().to_string(),
                sent: sent.len(),
                limit,
            });
        }

        Ok(true)
    }
}

fn prune_window(sent: &mut VecDeque<Instant>, now: Instant) {
    while sent.front().is_some_and(|t| now.duration_since(*t) >= LIMIT_WINDOW) {
        sent.pop_front();
    }
}
