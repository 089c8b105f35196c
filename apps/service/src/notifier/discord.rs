use serde_json::json;
use std::time::Duration;

use super::{ChannelBase, ChannelConfig, Notifier, NotifyError, Payload};
use crate::database::models::Failure;
use crate::monitoring::types::ServiceStatus;

const DEFAULT_DELAY_MS: u64 = 5000;

/// Discord webhook channel. The `host` parameter is the webhook URL.
pub struct Discord {
    base: ChannelBase,
    client: reqwest::Client,
}

impl Discord {
    pub fn new(mut config: ChannelConfig) -> Result<Self, NotifyError> {
        if config.delay_ms == 0 {
            config.delay_ms = DEFAULT_DELAY_MS;
        }
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { base: ChannelBase::new(config), client })
    }

    fn failure_message(service: &ServiceStatus, failure: &Failure) -> Payload {
        Payload::Webhook(json!({
            "content": format!("Your service '{}' is currently failing! Reason: {}", service.name, failure.issue)
        }))
    }

    fn recovery_message(service: &ServiceStatus) -> Payload {
        Payload::Webhook(json!({ "content": format!("Your service '{}' is back online!", service.name) }))
    }
}

#[async_trait::async_trait]
impl Notifier for Discord {
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
        self.base.queue_failure(Self::failure_message(service, failure));
    }

    fn on_success(&self, service: &ServiceStatus) {
        self.base.queue_recovery(|| Self::recovery_message(service));
    }

    async fn on_test(&self) -> Result<(), NotifyError> {
        self.send(&Payload::Webhook(json!({ "content": "Testing the Discord notifier" }))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::{Service, ServiceState};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn status() -> ServiceStatus {
        ServiceStatus::new(&Service::http(4, "shop", "https://shop.example"), &ServiceState::default())
    }

    #[test]
    fn test_default_delay_applies() {
        let discord = Discord::new(ChannelConfig::new(1, "discord")).unwrap();
        assert_eq!(discord.base().delay(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_send_posts_queued_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webhooks/1/abc"))
            .and(body_json(json!({
                "content": "Your service 'shop' is currently failing! Reason: HTTP Error timeout"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = ChannelConfig::new(1, "discord").with_param("host", format!("{}/api/webhooks/1/abc", server.uri()));
        let discord = Discord::new(config).unwrap();
        discord.on_failure(&status(), &Failure::new(4, "HTTP Error timeout"));

        let payload = discord.base().pop().unwrap();
        discord.send(&payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_on_test_posts_test_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "content": "Testing the Discord notifier" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let discord = Discord::new(ChannelConfig::new(1, "discord").with_param("host", server.uri())).unwrap();
        discord.on_test().await.unwrap();
        assert_eq!(discord.base().queued(), 0);
    }

    #[tokio::test]
    async fn test_rejected_webhook_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let config = ChannelConfig::new(1, "discord").with_param("host", server.uri());
        let discord = Discord::new(config).unwrap();
        discord.base().queue_failure(Discord::recovery_message(&status()));

        let payload = discord.base().pop().unwrap();
        assert!(matches!(discord.send(&payload).await, Err(NotifyError::Delivery(_))));
    }
}
