//! Human-handoff detection and marker stripping.
//!
//! The assistant signals "a human should take over" by embedding a reserved
//! marker in its generated text. The marker is an internal convention
//! between the generator and the dispatcher, never a user-visible feature:
//! every outbound generated reply is stripped unconditionally so it cannot
//! leak, even on partial-failure paths.
//!
//! Phrase matching exists only for user self-reports, where no generation
//! step is involved. Generated text is classified by the marker alone.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Reserved marker embedded by the reply generator.
pub const HANDOFF_MARKER: &str = "[HANDOFF]";

/// True iff the generated reply asks for a human handoff.
pub fn contains_marker(reply: &str) -> bool {
    reply.contains(HANDOFF_MARKER)
}

/// Remove every marker occurrence and trim surrounding whitespace.
/// Idempotent: stripping an already-clean reply returns it unchanged.
pub fn strip_marker(reply: &str) -> String {
    reply.replace(HANDOFF_MARKER, "").trim().to_string()
}

/// Why a conversation is being escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandoffReason {
    /// The user self-reported completing the intake form.
    FormCompleted,

    /// The assistant flagged the conversation (or generation failed and the
    /// fallback escalated it).
    CustomerNeedsHelp,
}

impl HandoffReason {
    pub fn as_str(self) -> &'static str {
        match self {
            HandoffReason::FormCompleted => "form-completed",
            HandoffReason::CustomerNeedsHelp => "customer-needs-help",
        }
    }
}

/// A transient escalation event: produced by detection, consumed immediately
/// by the alert sink, never stored.
#[derive(Debug, Clone)]
pub struct HandoffEvent {
    pub reason: HandoffReason,
    pub triggering_text: String,
    pub timestamp: DateTime<Utc>,
}

impl HandoffEvent {
    pub fn now(reason: HandoffReason, triggering_text: &str) -> Self {
        Self {
            reason,
            triggering_text: triggering_text.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Locale-specific phrase classifier for user "form completed" self-reports.
pub struct SelfReportMatcher {
    phrases: Vec<String>,
}

impl SelfReportMatcher {
    pub fn new(phrases: Vec<String>) -> Self {
        Self { phrases }
    }

    /// The phrases Thai customers actually use to report finishing the form.
    pub fn thai_defaults() -> Self {
        Self::new(
            [
                "เรียบร้อยแล้ว",
                "กรอกฟอร์มแล้ว",
                "กรอกเรียบร้อย",
                "ส่งฟอร์มแล้ว",
                "กรอกเสร็จแล้ว",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        )
    }

    pub fn matches(&self, text: &str) -> bool {
        self.phrases.iter().any(|phrase| text.contains(phrase.as_str()))
    }
}
