//! CRM mirror sink: keeps the legacy integration alive.

use crate::error::SinkError;
use async_trait::async_trait;

/// Forwards the exact raw delivery body to the legacy CRM endpoint.
#[async_trait]
pub trait MirrorSink: Send + Sync {
    /// Forward the raw body, preserving the original content type and
    /// signature header so the CRM can re-verify if it wants to.
    async fn forward(
        &self,
        body: Vec<u8>,
        content_type: &str,
        signature: &str,
    ) -> Result<(), SinkError>;
}

/// HTTP mirror to a configured URL.
pub struct HttpMirror {
    client: reqwest::Client,
    url: String,
}

impl HttpMirror {
    pub fn new(url: String) -> anyhow::Result<Self> {
        Ok(Self {
            client: super::http_client()?,
            url,
        })
    }
}

#[async_trait]
impl MirrorSink for HttpMirror {
    async fn forward(
        &self,
        body: Vec<u8>,
        content_type: &str,
        signature: &str,
    ) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("X-Line-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(|error| SinkError::Request {
                sink: "crm-mirror",
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                sink: "crm-mirror",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::debug!(status = status.as_u16(), "forwarded delivery to crm");
        Ok(())
    }
}
