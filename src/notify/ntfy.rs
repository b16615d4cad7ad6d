// src/notify/ntfy.rs
use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DeliveryError};

const KIND: &str = "ntfy";

fn default_server() -> String {
    "https://ntfy.sh".to_string()
}

fn default_markdown() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtfyConfig {
    #[serde(default = "default_server")]
    pub server_url: String,
    pub topic: String,
    /// Bearer token for protected topics.
    #[serde(default)]
    pub token: Option<String>,
    /// 1 (min) ..= 5 (max); server default when unset.
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default = "default_markdown")]
    pub markdown: bool,
}

impl NtfyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingField {
                channel_type: KIND,
                field: "topic",
            });
        }
        if !self
            .topic
            .trim()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("topic", "only letters, digits, '-' and '_'".into()));
        }
        self.server()?;
        if let Some(p) = self.priority {
            if !(1..=5).contains(&p) {
                return Err(invalid("priority", format!("{p} not in 1..=5")));
            }
        }
        Ok(())
    }

    fn server(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(self.server_url.trim())
            .map_err(|e| invalid("server_url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("server_url", "scheme must be http or https".into()));
        }
        Ok(url)
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidField {
        channel_type: KIND,
        field,
        reason,
    }
}

/// JSON publish body; avoids putting non-ASCII titles into HTTP headers.
#[derive(Serialize)]
struct Publish<'a> {
    topic: &'a str,
    title: &'a str,
    message: &'a str,
    markdown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<u8>,
}

/// One POST to the server root with the topic in the payload.
pub async fn send(
    client: &Client,
    cfg: &NtfyConfig,
    title: &str,
    message: &str,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let url = cfg
        .server()
        .map_err(|e| DeliveryError::Build(e.to_string()))?;
    let payload = Publish {
        topic: cfg.topic.trim(),
        title,
        message,
        markdown: cfg.markdown,
        priority: cfg.priority,
    };

    let mut req = client.post(url).timeout(timeout).json(&payload);
    if let Some(token) = cfg.token.as_deref().filter(|t| !t.trim().is_empty()) {
        req = req.bearer_auth(token.trim());
    }

    let rsp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            DeliveryError::Timeout(timeout)
        } else {
            DeliveryError::Request(e.to_string())
        }
    })?;
    super::check_status(rsp).await
}
