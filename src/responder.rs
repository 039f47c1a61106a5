//! Keyword classification and SMTP auto-replies via lettre.

use lettre::transport::smtp::SmtpTransportBuilder;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::Config;
use crate::error::DeliveryError;
use crate::mailbox::MailMessage;

/// True when any trigger word occurs in the subject or body.
///
/// Case-insensitive substring match; keywords are expected lowercase (the
/// config layer normalizes them). Pure, no network access.
pub fn is_urgent(message: &MailMessage, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return false;
    }
    let haystack = format!("{}\n{}", message.subject, message.body).to_lowercase();
    keywords.iter().any(|k| haystack.contains(k.as_str()))
}

/// Outbound reply transmission.
pub trait ReplyTransport {
    /// Compose and send an acknowledgment to the message's sender.
    fn send_reply(&self, message: &MailMessage) -> Result<(), DeliveryError>;
}

/// SMTP-backed replier. The transport is built per send; STARTTLS with the
/// account credentials, matching the submission port.
pub struct SmtpReplier {
    config: Config,
}

impl SmtpReplier {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ReplyTransport for SmtpReplier {
    fn send_reply(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        let reply = build_reply(&self.config.address, message)?;
        let transport = smtp_transport(&self.config)?.build();

        transport
            .send(&reply)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        tracing::info!(to = %message.sender, "Auto-reply sent");
        Ok(())
    }
}

/// Startup credential check: open an SMTP connection and authenticate.
pub fn verify_smtp(config: &Config) -> Result<(), DeliveryError> {
    let transport = smtp_transport(config)?.build();
    match transport.test_connection() {
        Ok(true) => Ok(()),
        Ok(false) => Err(DeliveryError::Transport(
            "SMTP connection test failed".to_string(),
        )),
        Err(e) => Err(DeliveryError::Transport(e.to_string())),
    }
}

fn smtp_transport(config: &Config) -> Result<SmtpTransportBuilder, DeliveryError> {
    let creds = Credentials::new(
        config.address.clone(),
        config.password.expose_secret().to_string(),
    );
    Ok(SmtpTransport::starttls_relay(&config.smtp_host)
        .map_err(|e| DeliveryError::Transport(format!("SMTP relay setup failed: {e}")))?
        .port(config.smtp_port)
        .credentials(creds))
}

/// Build the reply message: Re:-prefixed subject, fixed acknowledgment body,
/// In-Reply-To when the original carried a Message-ID.
fn build_reply(from: &str, message: &MailMessage) -> Result<Message, DeliveryError> {
    let mut builder = Message::builder()
        .from(from.parse().map_err(|e| DeliveryError::InvalidAddress {
            address: from.to_string(),
            reason: format!("{e}"),
        })?)
        .to(message
            .sender
            .parse()
            .map_err(|e| DeliveryError::InvalidAddress {
                address: message.sender.clone(),
                reason: format!("{e}"),
            })?)
        .subject(reply_subject(&message.subject));

    if let Some(ref id) = message.message_id {
        builder = builder.in_reply_to(id.clone());
    }

    builder
        .body(reply_body(&message.subject))
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

pub fn reply_subject(original: &str) -> String {
    format!("Re: {original}")
}

fn reply_body(subject: &str) -> String {
    let sent_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    format!(
        "Hello,\n\n\
         This is an automatic response to your email regarding \"{subject}\".\n\n\
         Your message was flagged as urgent and will be addressed as soon as possible.\n\
         Please note that this is an automated reply sent at {sent_at}.\n\n\
         If your matter requires immediate attention, please reach out directly by phone.\n\n\
         Best regards,\n\
         Inbox Sentry"
    )
}

// ── Tests ───────────────────────────────────────────────────────────
