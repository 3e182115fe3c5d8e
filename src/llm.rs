//! Assistant reply generation.
//!
//! The generation call is an opaque collaborator behind [`ReplyGenerator`]:
//! it returns text or fails, and the planner owns what happens on failure.

use crate::config::AssistantConfig;
use crate::error::GenerationError;
use crate::memory::ContextTurn;
use async_trait::async_trait;
use std::time::Duration;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Keep replies concise for chat.
const MAX_REPLY_TOKENS: u32 = 500;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Behavior profile, selected per event from the user's form-completion flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    /// Form not yet completed: nudge toward the intake form.
    FormNudger { form_link: String },

    /// Form completed: answer normally.
    Standard,
}

const SYSTEM_PROMPT_FORM_NUDGER: &str = "\
You are a friendly Thai-speaking housing assistant for a rental agency. \
Answer briefly and warmly in the customer's language. The customer has not \
yet completed our intake form; steer every conversation toward completing \
it at {form_link} before going deep into specifics. If the customer asks \
about booking, payment, contracts, or visas, or clearly needs a human, end \
your reply with the literal tag [HANDOFF].";

const SYSTEM_PROMPT_STANDARD: &str = "\
You are a friendly Thai-speaking housing assistant for a rental agency. \
The customer has already completed our intake form, so answer their \
questions directly and warmly in their language. If the customer asks \
about booking, payment, contracts, or visas, or clearly needs a human, end \
your reply with the literal tag [HANDOFF].";

impl Profile {
    fn system_prompt(&self) -> String {
        match self {
            Profile::FormNudger { form_link } => {
                SYSTEM_PROMPT_FORM_NUDGER.replace("{form_link}", form_link)
            }
            Profile::Standard => SYSTEM_PROMPT_STANDARD.to_string(),
        }
    }
}

/// Opaque reply-generation collaborator.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        profile: &Profile,
        context: &[ContextTurn],
    ) -> Result<String, GenerationError>;
}

/// Anthropic Messages API generator.
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    url: String,
}

impl AnthropicGenerator {
    pub fn new(config: &AssistantConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            url: ANTHROPIC_MESSAGES_URL.to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl ReplyGenerator for AnthropicGenerator {
    async fn generate(
        &self,
        profile: &Profile,
        context: &[ContextTurn],
    ) -> Result<String, GenerationError> {
        let Some(api_key) = &self.api_key else {
            return Err(GenerationError::NotConfigured);
        };

        #[cfg(feature = "metrics")]
        let _timer = crate::telemetry::Metrics::global()
            .generation_duration_seconds
            .start_timer();

        let messages: Vec<serde_json::Value> = context
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role.as_str(),
                    "content": turn.text,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_REPLY_TOKENS,
            "system": profile.system_prompt(),
            "messages": messages,
        });

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| GenerationError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Request(format!("status {status}: {body}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|error| GenerationError::Request(error.to_string()))?;

        value["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or(GenerationError::EmptyCompletion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_nudger_prompt_carries_the_link() {
        let profile = Profile::FormNudger {
            form_link: "https://forms.example/intake?ref=U1".into(),
        };
        let prompt = profile.system_prompt();
        assert!(prompt.contains("https://forms.example/intake?ref=U1"));
        assert!(!prompt.contains("{form_link}"));
    }

    #[test]
    fn standard_prompt_has_no_placeholder() {
        assert!(!Profile::Standard.system_prompt().contains("{form_link}"));
    }

    #[test]
    fn unconfigured_generator_fails_with_not_configured() {
        let generator = AnthropicGenerator::new(&AssistantConfig {
            api_key: None,
            model: "claude-sonnet-4-20250514".into(),
        })
        .expect("client should build");
        assert!(!generator.is_configured());

        let result =
            tokio_test::block_on(generator.generate(&Profile::Standard, &[]));
        assert!(matches!(result, Err(GenerationError::NotConfigured)));
    }
}
