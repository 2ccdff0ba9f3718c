//! Outbound mail shared by the gateway (account recovery) and the notifier
//! (stock digests). Multipart text + HTML over SMTP using lettre.

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::{
    transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport, Message,
    Tokio1Executor,
};

use crate::config::EmailConfig;

/// Template rendering result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns the relay's response text.
    async fn send(&self, to_name: &str, to_email: &str, email: &RenderedEmail) -> Result<String>;
}

/// SMTP client for sending emails
pub struct SmtpClient {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpClient {
    /// Local relays are used without TLS, anything else via STARTTLS.
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let from = mailbox(&config.from_name, &config.from_address).context("Invalid from address")?;

        let builder = if is_local(&config.smtp_host) {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .context("Failed to create SMTP transport")?
        };
        let builder = builder.port(config.smtp_port);
        let transport = if config.smtp_username.is_empty() {
            builder.build()
        } else {
            builder
                .credentials(Credentials::new(
                    config.smtp_username.clone(),
                    config.smtp_password.clone(),
                ))
                .build()
        };

        Ok(Self { from, transport })
    }
}

#[async_trait]
impl Mailer for SmtpClient {
    async fn send(&self, to_name: &str, to_email: &str, email: &RenderedEmail) -> Result<String> {
        let message = build_message(self.from.clone(), to_name, to_email, email)?;

        let response = self
            .transport
            .send(message)
            .await
            .context("Failed to send email")?;

        Ok(response.message().collect::<Vec<_>>().join("\n"))
    }
}

/// A mail as handed to [`OutboxMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to_name: String,
    pub to_email: String,
    pub email: RenderedEmail,
}

/// Keeps mails in memory instead of delivering them.
#[derive(Default)]
pub struct OutboxMailer {
    sent: Mutex<Vec<SentEmail>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, to_name: &str, to_email: &str, email: &RenderedEmail) -> Result<String> {
        // Same address checks as the SMTP path.
        mailbox(to_name, to_email).with_context(|| format!("Invalid recipient address {}", to_email))?;

        self.sent
            .lock()
            .map_err(|_| anyhow!("Outbox lock poisoned"))?
            .push(SentEmail {
                to_name: to_name.to_string(),
                to_email: to_email.to_string(),
                email: email.clone(),
            });
        Ok("queued in outbox".to_string())
    }
}

/// Mail carrying a password-reset link. `reset_url` already contains the token.
pub fn password_reset_email(name: &str, reset_url: &str, ttl_minutes: i64) -> RenderedEmail {
    RenderedEmail {
        subject: "Reset your Pharmy password".to_string(),
        body_html: format!(
            "<p>Hello {name},</p>\
             <p>We received a request to reset your Pharmy password. \
             <a href=\"{url}\">Choose a new password</a>. The link expires in {ttl} minutes.</p>\
             <p>If you did not request this, you can ignore this mail.</p>",
            name = escape_html(name),
            url = escape_html(reset_url),
            ttl = ttl_minutes,
        ),
        body_text: format!(
            "Hello {},\n\nWe received a request to reset your Pharmy password.\n\
             Choose a new password here: {}\nThe link expires in {} minutes.\n\n\
             If you did not request this, you can ignore this mail.\n",
            name, reset_url, ttl_minutes
        ),
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn mailbox(name: &str, address: &str) -> Result<Mailbox> {
    Ok(Mailbox::new(Some(name.to_string()), address.parse()?))
}

fn is_local(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

fn build_message(from: Mailbox, to_name: &str, to_email: &str, email: &RenderedEmail) -> Result<Message> {
    let to = mailbox(to_name, to_email).with_context(|| format!("Invalid recipient address {}", to_email))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.as_str())
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(email.body_text.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(email.body_html.clone()),
                ),
        )
        .context("Failed to build email")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered() -> RenderedEmail {
        RenderedEmail {
            subject: "[Green Cross Pharmacy] 1 low-stock alerts, 0 expiring batches".to_string(),
            body_html: "<p>paracetamol</p>".to_string(),
            body_text: "paracetamol".to_string(),
        }
    }

    #[test]
    fn test_message_has_both_parts() {
        let from = mailbox("Pharmy Alerts", "alerts@pharmy.one").unwrap();
        let message = build_message(from, "Asha Rao", "asha@example.com", &rendered()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("asha@example.com"));
        assert!(raw.contains("alerts@pharmy.one"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_invalid_recipient_is_rejected() {
        let from = mailbox("Pharmy Alerts", "alerts@pharmy.one").unwrap();
        assert!(build_message(from, "Asha Rao", "not-an-address", &rendered()).is_err());
    }

    #[test]
    fn test_local_relay_detection() {
        assert!(is_local("localhost"));
        assert!(!is_local("smtp.sendgrid.net"));
    }

    #[tokio::test]
    async fn test_client_from_default_config() {
        let config = crate::AppConfig::default();
        assert!(SmtpClient::from_config(&config.email).is_ok());
    }

    #[tokio::test]
    async fn test_outbox_records_and_validates() {
        let outbox = OutboxMailer::new();
        outbox.send("Asha Rao", "asha@example.com", &rendered()).await.unwrap();
        assert!(outbox.send("Asha Rao", "nope", &rendered()).await.is_err());

        let sent = outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "asha@example.com");
    }

    #[test]
    fn test_reset_email_escapes_name() {
        let email = password_reset_email("<b>Asha</b>", "https://app.pharmy.one/reset?token=abc&x=1", 30);
        assert!(email.body_html.contains("&lt;b&gt;Asha"));
        assert!(email.body_html.contains("token=abc&amp;x=1"));
        assert!(email.body_text.contains("token=abc&x=1"));
        assert!(email.body_text.contains("30 minutes"));
    }
}
