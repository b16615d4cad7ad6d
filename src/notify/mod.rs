// src/notify/mod.rs
//! Delivery channels.
//!
//! A [`Channel`] carries a typed config per backend; required fields are checked by
//! [`ChannelKind::validate`] when the channel is saved, so a send never starts with a
//! half-configured channel. [`Dispatcher`] is the seam the composer talks to.

pub mod email;
pub mod ntfy;
pub mod webhook;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DeliveryError};
use crate::template::{defaults, Escaping};

pub use email::{EmailConfig, SmtpTls};
pub use ntfy::NtfyConfig;
pub use webhook::WebhookConfig;

/// Backend-specific configuration, tagged by channel type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum ChannelKind {
    Email(EmailConfig),
    Ntfy(NtfyConfig),
    Webhook(WebhookConfig),
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Email(_) => "email",
            ChannelKind::Ntfy(_) => "ntfy",
            ChannelKind::Webhook(_) => "webhook",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ChannelKind::Email(c) => c.validate(),
            ChannelKind::Ntfy(c) => c.validate(),
            ChannelKind::Webhook(c) => c.validate(),
        }
    }

    /// Email bodies are HTML; push bodies are markdown/plain text.
    pub fn escaping(&self) -> Escaping {
        match self {
            ChannelKind::Email(_) => Escaping::Html,
            ChannelKind::Ntfy(_) | ChannelKind::Webhook(_) => Escaping::Plain,
        }
    }

    /// `(subject, body)` of the built-in template for this channel type.
    pub fn default_template(&self) -> (&'static str, &'static str) {
        match self {
            ChannelKind::Email(_) => (defaults::EMAIL_SUBJECT, defaults::EMAIL_BODY),
            ChannelKind::Ntfy(_) | ChannelKind::Webhook(_) => {
                (defaults::DIGEST_SUBJECT, defaults::DIGEST_BODY)
            }
        }
    }

    fn test_payload(&self) -> (&'static str, &'static str) {
        match self {
            ChannelKind::Email(_) => (
                "Test message - newsdesk",
                "<h1>Test succeeded</h1><p>Your email channel is configured correctly.</p>",
            ),
            ChannelKind::Ntfy(_) | ChannelKind::Webhook(_) => (
                "Test notification",
                "Your channel is configured correctly.",
            ),
        }
    }
}

/// A named delivery target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

fn enabled_default() -> bool {
    true
}

impl Channel {
    /// Build a channel, rejecting configs that miss required fields.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ChannelKind,
    ) -> Result<Self, ConfigError> {
        kind.validate()?;
        Ok(Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            kind,
        })
    }
}

/// Uniform send contract. Implementations never retry; the caller owns retry policy.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, channel: &Channel, subject: &str, body: &str) -> Result<(), DeliveryError>;

    /// Operator-initiated check with a synthetic payload. Does not touch the queue.
    async fn test(&self, channel: &Channel) -> Result<(), DeliveryError> {
        let (subject, body) = channel.kind.test_payload();
        self.send(channel, subject, body).await
    }
}

/// Production dispatcher: SMTP for email, HTTP POST for ntfy and webhooks.
#[derive(Clone)]
pub struct ChannelDispatcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl ChannelDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn send(&self, channel: &Channel, subject: &str, body: &str) -> Result<(), DeliveryError> {
        tracing::debug!(
            target: "notify",
            channel = %channel.id,
            kind = channel.kind.name(),
            bytes = body.len(),
            "dispatching"
        );
        match &channel.kind {
            ChannelKind::Email(cfg) => email::send(cfg, subject, body, self.timeout).await,
            ChannelKind::Ntfy(cfg) => ntfy::send(&self.http, cfg, subject, body, self.timeout).await,
            ChannelKind::Webhook(cfg) => {
                webhook::send(&self.http, cfg, subject, body, self.timeout).await
            }
        }
    }
}

/// Map a non-2xx response into a [`DeliveryError::Status`], keeping a short body excerpt.
pub(crate) async fn check_status(rsp: reqwest::Response) -> Result<(), DeliveryError> {
    let status = rsp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = rsp.text().await.unwrap_or_default();
    Err(DeliveryError::Status {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_json_is_tagged_by_type() {
        let raw = json!({
            "id": "c1",
            "name": "phone",
            "type": "ntfy",
            "config": { "server_url": "https://ntfy.sh", "topic": "news" }
        });
        let ch: Channel = serde_json::from_value(raw).unwrap();
        assert!(ch.enabled);
        assert_eq!(ch.kind.name(), "ntfy");
        assert_eq!(ch.kind.escaping(), Escaping::Plain);
        ch.kind.validate().unwrap();
    }

    #[test]
    fn unknown_type_is_rejected_by_serde() {
        let raw = json!({ "id": "c1", "name": "x", "type": "fax", "config": {} });
        assert!(serde_json::from_value::<Channel>(raw).is_err());
    }

    #[test]
    fn constructor_validates() {
        let kind = ChannelKind::Ntfy(NtfyConfig {
            server_url: "https://ntfy.sh".into(),
            topic: String::new(),
            token: None,
            priority: None,
            markdown: true,
        });
        let err = Channel::new("c", "n", kind).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "topic", .. }));
    }
}
