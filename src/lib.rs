//! Switchboard: a webhook router for a messaging-platform bot.
//!
//! Every inbound delivery is mirrored unmodified to a legacy CRM endpoint
//! and, unless forwarding-only mode is active, routed through an assistant
//! pipeline with per-user conversation state: bounded conversation memory,
//! durable form-completion flags, and human-handoff escalation.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod forms;
pub mod handoff;
pub mod llm;
pub mod memory;
pub mod planner;
pub mod server;
pub mod signature;
pub mod sinks;
#[cfg(feature = "metrics")]
pub mod telemetry;
pub mod webhook;

pub use error::{Error, Result};
