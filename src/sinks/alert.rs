//! Team alert sink: broadcast message or outgoing email.

use crate::config::EmailConfig;
use crate::error::SinkError;
use crate::handoff::{HandoffEvent, HandoffReason};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport as _, Message, Tokio1Executor};

const BROADCAST_URL: &str = "https://api.line.me/v2/bot/message/broadcast";

/// Quote limits per transport; chat broadcasts are tighter than email.
const BROADCAST_QUOTE_CHARS: usize = 100;
const EMAIL_QUOTE_CHARS: usize = 200;

/// Delivers a transient handoff event to the human team.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, event: &HandoffEvent) -> Result<(), SinkError>;
}

fn subject_for(reason: HandoffReason) -> &'static str {
    match reason {
        HandoffReason::FormCompleted => "📝 Form Completed",
        HandoffReason::CustomerNeedsHelp => "❓ Customer Needs Help",
    }
}

/// Truncate on char boundaries; the quoted text is usually Thai.
fn truncate_quote(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(limit).collect();
    truncated.push_str("...");
    truncated
}

/// Broadcast alert through a secondary bot channel.
pub struct BroadcastAlert {
    client: reqwest::Client,
    access_token: String,
    url: String,
}

impl BroadcastAlert {
    pub fn new(access_token: String) -> anyhow::Result<Self> {
        Ok(Self {
            client: super::http_client()?,
            access_token,
            url: BROADCAST_URL.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for BroadcastAlert {
    async fn alert(&self, event: &HandoffEvent) -> Result<(), SinkError> {
        let quote = truncate_quote(&event.triggering_text, BROADCAST_QUOTE_CHARS);
        let text = format!(
            "🔔 ลูกค้าต้องการทีมช่วย\n{}\n💬 \"{}\"",
            subject_for(event.reason),
            quote
        );
        let body = serde_json::json!({
            "messages": [{"type": "text", "text": text}],
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|error| SinkError::Request {
                sink: "alert-broadcast",
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                sink: "alert-broadcast",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::info!(reason = event.reason.as_str(), "team alert broadcast");
        Ok(())
    }
}

/// SMTP email alert to the team distribution list.
pub struct EmailAlert {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
}

impl EmailAlert {
    pub fn new(config: &EmailConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender.clone(),
                config.password.clone(),
            ))
            .build();

        let sender: Mailbox = config
            .sender
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid sender address: {}", config.sender))?;
        let recipients = config
            .recipients
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|_| anyhow::anyhow!("invalid team address: {addr}"))
            })
            .collect::<anyhow::Result<Vec<Mailbox>>>()?;
        if recipients.is_empty() {
            anyhow::bail!("email alert transport needs at least one recipient");
        }

        Ok(Self {
            transport,
            sender,
            recipients,
        })
    }
}

#[async_trait]
impl AlertSink for EmailAlert {
    async fn alert(&self, event: &HandoffEvent) -> Result<(), SinkError> {
        let quote = truncate_quote(&event.triggering_text, EMAIL_QUOTE_CHARS);
        let body = format!(
            "A customer needs team assistance.\n\n\
             Reason: {}\n\
             Customer message: \"{}\"\n\
             Time: {}\n\n\
             Please check the CRM for full customer details and follow up.",
            event.reason.as_str(),
            quote,
            event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        );

        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(subject_for(event.reason));
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        let message = builder
            .body(body)
            .map_err(|error| SinkError::Smtp(error.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|error| SinkError::Smtp(error.to_string()))?;

        tracing::info!(
            reason = event.reason.as_str(),
            recipients = self.recipients.len(),
            "team alert email sent"
        );
        Ok(())
    }
}

/// No transport configured: alerts are logged and dropped.
pub struct DisabledAlert;

#[async_trait]
impl AlertSink for DisabledAlert {
    async fn alert(&self, event: &HandoffEvent) -> Result<(), SinkError> {
        tracing::warn!(
            reason = event.reason.as_str(),
            "no alert transport configured, dropping team alert"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_char_boundary_safe() {
        let thai = "เรียบร้อยแล้ว".repeat(20);
        let truncated = truncate_quote(&thai, BROADCAST_QUOTE_CHARS);
        assert!(truncated.ends_with("..."));
        assert_eq!(
            truncated.chars().count(),
            BROADCAST_QUOTE_CHARS + 3
        );
    }

    #[test]
    fn short_quotes_pass_through_unchanged() {
        assert_eq!(truncate_quote("short", EMAIL_QUOTE_CHARS), "short");
    }

    #[test]
    fn every_reason_maps_to_a_subject() {
        assert!(!subject_for(HandoffReason::FormCompleted).is_empty());
        assert!(!subject_for(HandoffReason::CustomerNeedsHelp).is_empty());
    }
}
