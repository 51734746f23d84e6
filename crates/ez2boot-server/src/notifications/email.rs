//! SMTP email sender.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use super::{NotificationError, Sender, parse_config, require};

/// SMTP channel config. `port` may be given as a number or a string.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub host: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    pub to: String,
    pub from: String,
    /// Use PLAIN/LOGIN authentication with `user` and `password`.
    #[serde(default)]
    pub auth: bool,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(n) => Ok(n),
        Port::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl EmailConfig {
    fn check(&self) -> Result<(), NotificationError> {
        require("host", &self.host)?;
        if self.port == 0 {
            return Err(NotificationError::InvalidConfig("port is missing".into()));
        }
        require("to", &self.to)?;
        require("from", &self.from)?;
        if self.auth {
            require("user", &self.user)?;
            require("password", &self.password)?;
        }
        parse_mailbox("to", &self.to)?;
        parse_mailbox("from", &self.from)?;
        Ok(())
    }
}

fn parse_mailbox(field: &str, value: &str) -> Result<Mailbox, NotificationError> {
    value
        .parse()
        .map_err(|e| NotificationError::InvalidConfig(format!("{field}: {e}")))
}

/// Build the message that [`EmailSender`] delivers.
pub fn build_message(
    cfg: &EmailConfig,
    title: &str,
    body: &str,
) -> Result<Message, NotificationError> {
    Message::builder()
        .from(parse_mailbox("from", &cfg.from)?)
        .to(parse_mailbox("to", &cfg.to)?)
        .subject(title)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| NotificationError::InvalidConfig(e.to_string()))
}

#[derive(Debug, Default)]
pub struct EmailSender;

impl EmailSender {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sender for EmailSender {
    fn channel_type(&self) -> &'static str {
        "email"
    }

    fn label(&self) -> &'static str {
        "Email"
    }

    fn validate(&self, config: &str) -> Result<(), NotificationError> {
        parse_config::<EmailConfig>(config)?.check()
    }

    async fn send(
        &self,
        message: &str,
        title: &str,
        config: &str,
    ) -> Result<(), NotificationError> {
        let cfg: EmailConfig = parse_config(config)?;
        let email = build_message(&cfg, title, message)?;

        // The relay is reached directly on the configured port.
        let mut transport =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(cfg.host.as_str())
                .port(cfg.port);
        if cfg.auth {
            transport = transport.credentials(Credentials::new(cfg.user, cfg.password));
        }

        transport
            .build()
            .send(email)
            .await
            .map_err(|e| NotificationError::Smtp(e.to_string()))?;

        debug!(host = %cfg.host, "Email sent");
        Ok(())
    }
}
