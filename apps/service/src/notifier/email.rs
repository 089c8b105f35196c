use html_escape::{encode_double_quoted_attribute, encode_text};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use super::{ChannelBase, ChannelConfig, Notifier, NotifyError, Payload};
use crate::database::models::Failure;
use crate::monitoring::types::ServiceStatus;

const DEFAULT_SMTP_PORT: u16 = 587;
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A rendered email, waiting in the mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub html: String,
}

/// SMTP channel.
///
/// Parameters: `host`, `port`, `username`, `password`, `from`, `to`, and
/// `tls` (`false` to send in plain text, otherwise STARTTLS).
pub struct Email {
    base: ChannelBase,
}

impl Email {
    pub fn new(config: ChannelConfig) -> Self {
        Self { base: ChannelBase::new(config) }
    }

    fn mailbox(&self, key: &str) -> Result<Mailbox, NotifyError> {
        self.base
            .require(key)?
            .parse()
            .map_err(|e| NotifyError::Email(format!("invalid '{key}' address: {e}")))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let host = self.base.require("host")?;
        let port = match self.base.param("port") {
            Some(port) => port.parse().map_err(|_| NotifyError::Email(format!("invalid SMTP port '{port}'")))?,
            None => DEFAULT_SMTP_PORT,
        };

        let plain = self.base.param("tls").is_some_and(|v| v.eq_ignore_ascii_case("false"));
        let mut builder = if plain {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
        };
        builder = builder.port(port).timeout(Some(SMTP_TIMEOUT));

        if let (Some(user), Some(password)) = (self.base.param("username"), self.base.param("password")) {
            builder = builder.credentials(Credentials::new(user.to_string(), password.to_string()));
        }

        Ok(builder.build())
    }
}

/// Render the message for a failure, or for a recovery when `failure` is `None`
pub fn render_email(service: &ServiceStatus, failure: Option<&Failure>) -> EmailMessage {
    let name = encode_text(&service.name);
    let target = encode_double_quoted_attribute(&service.target);
    let code = service.status_code.map_or_else(|| "none".to_string(), |c| c.to_string());

    let (subject, heading, summary) = match failure {
        Some(failure) => (
            format!("Service {} is Failing", service.name),
            format!("{name} is Offline!"),
            format!(
                "Your service <a href=\"{target}\">{name}</a> responded with HTTP status code '{code}' and is \
                 currently offline: {}. This failure was created on {}.",
                encode_text(failure.label()),
                failure.created_at.to_rfc2822()
            ),
        ),
        None => (
            format!("Service {} is Back Online", service.name),
            format!("{name} is Online!"),
            format!(
                "Your service <a href=\"{target}\">{name}</a> is back online with HTTP status code '{code}'.{}",
                service
                    .last_online
                    .map(|t| format!(" It was reported online at {}.", t.to_rfc2822()))
                    .unwrap_or_default()
            ),
        ),
    };

    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<body style=\"font-family: Arial, sans-serif; color: #74787E;\">\n\
         <h1 style=\"color: #2F3133; font-size: 19px;\">{heading}</h1>\n<p>{summary}</p>\n"
    );
    if !service.last_response.is_empty() {
        html.push_str(&format!(
            "<h1 style=\"color: #2F3133; font-size: 19px;\">Last Response</h1>\n<p>{}</p>\n",
            encode_text(&service.last_response)
        ));
    }
    html.push_str("</body>\n</html>\n");

    EmailMessage { subject, html }
}

#[async_trait::async_trait]
impl Notifier for Email {
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    async fn send(&self, payload: &Payload) -> Result<(), NotifyError> {
        let Payload::Email(message) = payload else {
            return Err(NotifyError::UnsupportedPayload(self.base.title().to_string()));
        };

        let email = Message::builder()
            .from(self.mailbox("from")?)
            .to(self.mailbox("to")?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.html.clone())
            .map_err(|e| NotifyError::Email(e.to_string()))?;

        self.transport()?.send(email).await?;
        Ok(())
    }

    fn on_failure(&self, service: &ServiceStatus, failure: &Failure) {
        self.base.queue_failure(Payload::Email(render_email(service, Some(failure))));
    }

    fn on_success(&self, service: &ServiceStatus) {
        self.base.queue_recovery(|| Payload::Email(render_email(service, None)));
    }

    async fn on_test(&self) -> Result<(), NotifyError> {
        if self.transport()?.test_connection().await? {
            Ok(())
        } else {
            Err(NotifyError::Email("SMTP server did not accept the connection".to_string()))
        }
    }
}
