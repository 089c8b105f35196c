use serde_json::json;
use std::time::Duration;

use super::{ChannelBase, ChannelConfig, Notifier, NotifyError, Payload};
use crate::database::models::Failure;
use crate::monitoring::types::ServiceStatus;

/// Slack incoming-webhook channel. The `host` parameter is the webhook URL.
pub struct Slack {
    base: ChannelBase,
    client: reqwest::Client,
}

impl Slack {
    pub fn new(config: ChannelConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { base: ChannelBase::new(config), client })
    }
}

#[async_trait::async_trait]
impl Notifier for Slack {
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    async fn send(&self, payload: &Payload) -> Result<(), NotifyError> {
        let Payload::Webhook(body) = payload else {
            return Err(NotifyError::UnsupportedPayload(self.base.title().to_string()));
        };
        let url = self.base.require("host")?;
        self.client.post(url).json(body).send().await?.error_for_status()?;
        Ok(())
    }

    fn on_failure(&self, service: &ServiceStatus, failure: &Failure) {
        self.base.queue_failure(Payload::Webhook(json!({
            "text": format!(
                ":red_circle: Service <{}|{}> is failing: {}",
                service.target,
                service.name,
                failure.label()
            )
        })));
    }

    fn on_success(&self, service: &ServiceStatus) {
        self.base.queue_recovery(|| {
            Payload::Webhook(json!({
                "text": format!(":large_green_circle: Service <{}|{}> is back online", service.target, service.name)
            }))
        });
    }

    async fn on_test(&self) -> Result<(), NotifyError> {
        self.send(&Payload::Webhook(json!({ "text": "Testing the Slack notifier" }))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::{Service, ServiceState};

    #[test]
    fn test_failure_uses_issue_label() {
        let slack = Slack::new(ChannelConfig::new(2, "slack")).unwrap();
        let service = Service::http(9, "docs", "https://docs.example");
        let status = ServiceStatus::new(&service, &ServiceState::default());

        slack.on_failure(&status, &Failure::new(9, "HTTP Status Code 502 did not match 200"));

        let Some(Payload::Webhook(body)) = slack.base().pop() else { panic!("expected webhook payload") };
        assert_eq!(
            body["text"],
            ":red_circle: Service <https://docs.example|docs> is failing: Incorrect HTTP Status Code"
        );
        assert!(!slack.base().is_online());
    }

    #[tokio::test]
    async fn test_on_test_without_host_fails() {
        let slack = Slack::new(ChannelConfig::new(2, "slack")).unwrap();
        let err = slack.on_test().await.unwrap_err();
        assert!(matches!(err, NotifyError::MissingParam { ref param, .. } if param == "host"));
    }

    #[tokio::test]
    async fn test_send_without_host_fails() {
        let slack = Slack::new(ChannelConfig::new(2, "slack")).unwrap();
        let err = slack.send(&Payload::Webhook(json!({ "text": "hi" }))).await.unwrap_err();
        assert!(matches!(err, NotifyError::MissingParam { .. }));
    }
}
