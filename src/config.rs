//! Configuration loading and the runtime operating-mode switch.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Switchboard configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (holds the form-state file).
    pub data_dir: std::path::PathBuf,

    /// Listen port for the webhook server.
    pub port: u16,

    /// Shared secret for webhook signature verification.
    pub channel_secret: String,

    /// Bearer credential for the platform reply API.
    pub channel_access_token: String,

    /// Base URL of the intake form; the user id is appended as a query param.
    pub form_base_url: String,

    /// CRM mirror target. `None` disables mirroring.
    pub crm_webhook_url: Option<String>,

    /// Assistant (LLM) collaborator settings.
    pub assistant: AssistantConfig,

    /// Team alert transport selection.
    pub alert: AlertConfig,

    /// Initial operating mode.
    pub forwarding_only: bool,
}

/// Assistant collaborator configuration.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// API key. `None` means every generation fails and the fallback
    /// apology escalates to the team, which is the designed degradation.
    pub api_key: Option<String>,

    /// Model name.
    pub model: String,
}

/// Team alert transport, selected from whichever credentials are present.
/// Broadcast wins when both are configured.
#[derive(Debug, Clone)]
pub enum AlertConfig {
    /// Broadcast through a secondary bot channel.
    Broadcast { access_token: String },

    /// Outgoing SMTP email.
    Email(EmailConfig),

    /// No transport configured; alerts are logged and dropped.
    Disabled,
}

impl AlertConfig {
    /// Short transport name for logs and the health payload.
    pub fn transport_name(&self) -> &'static str {
        match self {
            AlertConfig::Broadcast { .. } => "broadcast",
            AlertConfig::Email(_) => "email",
            AlertConfig::Disabled => "disabled",
        }
    }
}

/// SMTP email alert configuration.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub recipients: Vec<String>,
    pub sender: String,
    pub password: String,
    pub smtp_server: String,
    pub smtp_port: u16,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let channel_secret = required("LINE_CHANNEL_SECRET")?;
        let channel_access_token = required("LINE_CHANNEL_ACCESS_TOKEN")?;
        let form_base_url = required("FORM_BASE_URL")?;

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a valid port: {raw}")))?,
            Err(_) => 5000,
        };

        let data_dir = match std::env::var("SWITCHBOARD_DATA_DIR") {
            Ok(dir) => std::path::PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .map(|d| d.join("switchboard"))
                .unwrap_or_else(|| std::path::PathBuf::from("./data")),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let assistant = AssistantConfig {
            api_key: non_empty(std::env::var("ANTHROPIC_API_KEY").ok()),
            model: std::env::var("SWITCHBOARD_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".into()),
        };

        let forwarding_only = std::env::var("FORWARDING_ONLY")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            data_dir,
            port,
            channel_secret,
            channel_access_token,
            form_base_url,
            crm_webhook_url: non_empty(std::env::var("CRM_WEBHOOK_URL").ok()),
            assistant,
            alert: load_alert_config()?,
            forwarding_only,
        })
    }

    /// Get the form-state file path.
    pub fn form_state_path(&self) -> std::path::PathBuf {
        self.data_dir.join("form_state.json")
    }
}

fn load_alert_config() -> Result<AlertConfig> {
    if let Some(access_token) = non_empty(std::env::var("LINE_TEAM_ACCESS_TOKEN").ok()) {
        return Ok(AlertConfig::Broadcast { access_token });
    }

    let recipients: Vec<String> = std::env::var("TEAM_EMAIL_ADDRESSES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let sender = non_empty(std::env::var("SENDER_EMAIL").ok());
    let password = non_empty(std::env::var("SENDER_PASSWORD").ok());

    match (recipients.is_empty(), sender, password) {
        (false, Some(sender), Some(password)) => {
            let smtp_port = match std::env::var("SMTP_PORT") {
                Ok(raw) => raw.parse().map_err(|_| {
                    ConfigError::Invalid(format!("SMTP_PORT is not a valid port: {raw}"))
                })?,
                Err(_) => 587,
            };
            Ok(AlertConfig::Email(EmailConfig {
                recipients,
                sender,
                password,
                smtp_server: std::env::var("SMTP_SERVER")
                    .unwrap_or_else(|_| "smtp.gmail.com".into()),
                smtp_port,
            }))
        }
        _ => Ok(AlertConfig::Disabled),
    }
}

fn required(key: &str) -> std::result::Result<String, ConfigError> {
    match non_empty(std::env::var(key).ok()) {
        Some(value) => Ok(value),
        None => Err(ConfigError::MissingKey(key.to_string())),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Operating mode for the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Mirror to the CRM and generate replies.
    Full,

    /// Mirror to the CRM only; the assistant is bypassed.
    ForwardingOnly,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Full => "full",
            OperatingMode::ForwardingOnly => "forwarding_only",
        }
    }
}

/// Thread-safe holder for the operating mode.
///
/// Set once at startup from the environment, mutated only by the two safety
/// endpoints, and read once per incoming delivery.
pub struct ModeSwitch {
    inner: ArcSwap<OperatingMode>,
}

impl ModeSwitch {
    pub fn new(forwarding_only: bool) -> Self {
        let mode = if forwarding_only {
            OperatingMode::ForwardingOnly
        } else {
            OperatingMode::Full
        };
        Self {
            inner: ArcSwap::from_pointee(mode),
        }
    }

    pub fn current(&self) -> OperatingMode {
        *self.inner.load().as_ref()
    }

    pub fn set(&self, mode: OperatingMode) {
        self.inner.store(Arc::new(mode));
    }

    pub fn is_forwarding_only(&self) -> bool {
        self.current() == OperatingMode::ForwardingOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_switch_toggles_idempotently() {
        let mode = ModeSwitch::new(false);
        assert_eq!(mode.current(), OperatingMode::Full);

        mode.set(OperatingMode::ForwardingOnly);
        mode.set(OperatingMode::ForwardingOnly);
        assert!(mode.is_forwarding_only());

        mode.set(OperatingMode::Full);
        assert_eq!(mode.current(), OperatingMode::Full);
    }

    #[test]
    fn non_empty_filters_blank_values() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some("token".into())), Some("token".into()));
        assert_eq!(non_empty(None), None);
    }
}
