//! Platform reply sink.

use crate::error::SinkError;
use async_trait::async_trait;

const REPLY_URL: &str = "https://api.line.me/v2/bot/message/reply";

/// Sends one outbound text reply against a reply token.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, reply_token: &str, text: &str) -> Result<(), SinkError>;
}

/// LINE reply API sink with a bearer credential.
pub struct LineReply {
    client: reqwest::Client,
    access_token: String,
    url: String,
}

impl LineReply {
    pub fn new(access_token: String) -> anyhow::Result<Self> {
        Ok(Self {
            client: super::http_client()?,
            access_token,
            url: REPLY_URL.to_string(),
        })
    }
}

#[async_trait]
impl ReplySink for LineReply {
    async fn send(&self, reply_token: &str, text: &str) -> Result<(), SinkError> {
        let body = serde_json::json!({
            "replyToken": reply_token,
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
                sink: "reply",
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                sink: "reply",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::debug!(status = status.as_u16(), "reply sent");
        Ok(())
    }
}
