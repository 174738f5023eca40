//! Outbound mail boundary.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub subject: String,
    pub content: String,
}

impl Email {
    /// Non-empty lines of the body, trimmed.
    pub fn paragraphs(&self) -> Vec<&str> {
        self.content
            .split('\n')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    pub fn to_html(&self) -> String {
        self.paragraphs()
            .iter()
            .map(|p| format!("<p>{}</p>", escape_html(p)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Writes messages to the log instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        info!(
            subject = %email.subject,
            paragraphs = email.paragraphs().len(),
            "email (log only)"
        );
        Ok(())
    }
}

#[cfg(feature = "smtp")]
pub use smtp::SmtpMailer;

#[cfg(feature = "smtp")]
mod smtp {
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use lettre::message::header::ContentType;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
    use tracing::info;

    use continuum_config::EmailConfig;

    use super::{Email, Mailer};

    pub struct SmtpMailer {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: String,
        to: String,
    }

    impl SmtpMailer {
        pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
            let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
                .with_context(|| format!("configuring SMTP relay {}", cfg.smtp_host))?
                .port(cfg.smtp_port)
                .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
                .build();
            let from = if cfg.from.is_empty() { cfg.username.clone() } else { cfg.from.clone() };
            Ok(Self {
                transport,
                from,
                to: cfg.to.clone(),
            })
        }
    }

    #[async_trait]
    impl Mailer for SmtpMailer {
        async fn send(&self, email: &Email) -> Result<()> {
            let message = Message::builder()
                .from(self.from.parse().context("invalid from address")?)
                .to(self.to.parse().context("invalid to address")?)
                .subject(email.subject.clone())
                .header(ContentType::TEXT_HTML)
                .body(email.to_html())?;
            self.transport.send(message).await.context("SMTP send failed")?;
            info!(subject = %email.subject, to = %self.to, "email sent");
            Ok(())
        }
    }
}
