// src/notify/email.rs
use std::time::Duration;

use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{Address, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DeliveryError};

const KIND: &str = "email";

fn default_port() -> u16 {
    465
}

/// How the SMTP session is secured. Defaults from the port: 465 implicit TLS,
/// anything else STARTTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    Implicit,
    Starttls,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub tls: Option<SmtpTls>,
    pub username: String,
    pub password: String,
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    /// Accepts a JSON array or the comma separated string the admin form sends.
    #[serde(deserialize_with = "recipients::deserialize")]
    pub to_addresses: Vec<String>,
}

impl EmailConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.smtp_host, "smtp_host")?;
        require(&self.username, "username")?;
        require(&self.password, "password")?;
        require(&self.from_address, "from_address")?;
        if self.smtp_port == 0 {
            return Err(invalid("smtp_port", "must be non-zero".into()));
        }
        self.from_mailbox()?;
        if self.to_addresses.is_empty() {
            return Err(ConfigError::MissingField {
                channel_type: KIND,
                field: "to_addresses",
            });
        }
        self.recipients()?;
        Ok(())
    }

    pub fn tls_mode(&self) -> SmtpTls {
        self.tls.unwrap_or(if self.smtp_port == 465 {
            SmtpTls::Implicit
        } else {
            SmtpTls::Starttls
        })
    }

    fn from_mailbox(&self) -> Result<Mailbox, ConfigError> {
        let addr: Address = self
            .from_address
            .trim()
            .parse()
            .map_err(|e| invalid("from_address", format!("{e}")))?;
        let name = self
            .from_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Mailbox::new(name, addr))
    }

    fn recipients(&self) -> Result<Vec<Mailbox>, ConfigError> {
        self.to_addresses
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse::<Mailbox>()
                    .map_err(|e| invalid("to_addresses", format!("`{raw}`: {e}")))
            })
            .collect()
    }

    fn transport(&self, timeout: Duration) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let host = self.smtp_host.trim();
        let builder = match self.tls_mode() {
            SmtpTls::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| DeliveryError::Smtp(e.to_string()))?,
            SmtpTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| DeliveryError::Smtp(e.to_string()))?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };
        Ok(builder
            .port(self.smtp_port)
            .credentials(Credentials::new(
                self.username.clone(),
                self.password.clone(),
            ))
            .timeout(Some(timeout))
            .build())
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField {
            channel_type: KIND,
            field,
        });
    }
    Ok(())
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidField {
        channel_type: KIND,
        field,
        reason,
    }
}

/// One SMTP session: connect, authenticate, send a single message to every recipient.
pub async fn send(
    cfg: &EmailConfig,
    subject: &str,
    html: &str,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    // Config was validated on save; a failure here means it was edited out of band.
    let from = cfg
        .from_mailbox()
        .map_err(|e| DeliveryError::Build(e.to_string()))?;
    let to = cfg
        .recipients()
        .map_err(|e| DeliveryError::Build(e.to_string()))?;

    let mut builder = Message::builder().from(from).subject(subject);
    for mb in to {
        builder = builder.to(mb);
    }
    let msg = builder
        .header(header::ContentType::TEXT_HTML)
        .body(html.to_string())
        .map_err(|e| DeliveryError::Build(e.to_string()))?;

    let mailer = cfg.transport(timeout)?;
    mailer
        .send(msg)
        .await
        .map_err(|e| DeliveryError::Smtp(e.to_string()))?;
    Ok(())
}

mod recipients {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Csv(String),
        List(Vec<String>),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let raw = match OneOrMany::deserialize(d)? {
            OneOrMany::Csv(s) => s.split(',').map(str::to_string).collect(),
            OneOrMany::List(v) => v,
        };
        Ok(raw
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}
