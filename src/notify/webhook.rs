// src/notify/webhook.rs
use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DeliveryError};

/// Generic JSON webhook: `{subject, body, text}`. `text` makes Slack-style incoming
/// webhooks accept the payload as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                channel_type: "webhook",
                field: "url",
            });
        }
        let url = Url::parse(self.url.trim()).map_err(|e| ConfigError::InvalidField {
            channel_type: "webhook",
            field: "url",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidField {
                channel_type: "webhook",
                field: "url",
                reason: "scheme must be http or https".into(),
            });
        }
        Ok(())
    }
}

pub async fn send(
    client: &Client,
    cfg: &WebhookConfig,
    subject: &str,
    body: &str,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let payload = serde_json::json!({
        "subject": subject,
        "body": body,
        "text": format!("*{subject}*\n{body}"),
    });
    let rsp = client
        .post(cfg.url.trim())
        .timeout(timeout)
        .json(&payload)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout(timeout)
            } else {
                DeliveryError::Request(e.to_string())
            }
        })?;
    super::check_status(rsp).await
}
