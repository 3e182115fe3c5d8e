//! Reply planning: which text goes out for a given event.
//!
//! Owns the canned reply texts, the profile selection for generated replies,
//! and the conversation-memory bookkeeping around generation. The dispatcher
//! decides *whether* to reply; the planner decides *what*.

use crate::handoff::{self, HandoffReason};
use crate::llm::{Profile, ReplyGenerator};
use crate::memory::{ConversationMemory, Role};
use std::sync::Arc;

/// Fixed acknowledgment for a user self-reporting form completion.
const COMPLETION_ACK: &str =
    "ขอบคุณมากค่ะ 🙏 ได้รับข้อมูลเรียบร้อยแล้วนะคะ ทีมงานจะติดต่อกลับเร็วๆ นี้ค่ะ";

/// Fallback when generation fails. Carries the handoff marker so every
/// technical failure escalates to a human instead of dropping silently.
const FALLBACK_APOLOGY: &str =
    "ขอโทษนะคะ ระบบมีปัญหาทางเทคนิคค่ะ ทีมจะติดต่อกลับเร็วๆ นี้นะคะ 🙏 [HANDOFF]";

const STICKER_COMPLETED: &str = "น่ารักค่ะ 😊 มีอะไรให้ช่วยไหมคะ?";
const STICKER_LINK_SENT: &str =
    "น่ารักค่ะ 😊 รบกวนกรอกฟอร์มที่ส่งให้ก่อนหน้านี้ด้วยนะคะ ทีมงานจะได้แนะนำที่พักให้เลยค่ะ";
const STICKER_WITH_LINK: &str =
    "น่ารักค่ะ 😊 ทีมงานยินดีช่วยเหลือนะคะ กรอกฟอร์มสั้นๆ นี้ให้เราก่อนนะคะ 👉 {form_link}";

const IMAGE_COMPLETED: &str = "ได้รับรูปแล้วค่ะ 😊 มีอะไรให้ช่วยดูไหมคะ?";
const IMAGE_LINK_SENT: &str =
    "ได้รับรูปแล้วค่ะ 😊 รบกวนกรอกฟอร์มที่ส่งให้ก่อนหน้านี้ด้วยนะคะ";
const IMAGE_WITH_LINK: &str =
    "ได้รับรูปแล้วค่ะ 😊 ทีมงานดูรูปไม่ได้ แต่ยินดีช่วยเหลือเรื่องที่พักนะคะ กรอกฟอร์มนี้ให้เราก่อนนะคะ 👉 {form_link}";

const UNSUPPORTED_REDIRECT: &str =
    "ได้รับแล้วค่ะ 😊 ทีมงานตอบได้ทางข้อความนะคะ พิมพ์คำถามมาได้เลยค่ะ ยินดีช่วยเหลือค่ะ 💬";

/// A generated (or fallback) reply, already stripped of the marker.
#[derive(Debug)]
pub struct PlannedReply {
    pub text: String,
    pub handoff: Option<HandoffReason>,
}

/// A fixed templated reply for sticker/media events.
#[derive(Debug)]
pub struct CannedReply {
    pub text: String,
    /// True on the link-not-yet-sent branch: sending this reply is the side
    /// effect that marks the link as sent.
    pub sends_form_link: bool,
}

pub struct ReplyPlanner {
    memory: Arc<ConversationMemory>,
    generator: Arc<dyn ReplyGenerator>,
    form_base_url: String,
}

impl ReplyPlanner {
    pub fn new(
        memory: Arc<ConversationMemory>,
        generator: Arc<dyn ReplyGenerator>,
        form_base_url: String,
    ) -> Self {
        Self {
            memory,
            generator,
            form_base_url,
        }
    }

    /// The intake form link for a user, with their id as the referral param.
    pub fn form_link(&self, user_id: &str) -> String {
        format!("{}?ref={}", self.form_base_url, user_id)
    }

    /// Plan the reply for a user text message.
    ///
    /// Appends the user turn, generates under the profile selected by the
    /// completion flag, appends the assistant turn on success, and strips
    /// the marker unconditionally. On generation failure the fallback
    /// apology goes out instead and is *not* appended — a transient outage
    /// must not bake apology text into future context.
    pub async fn text_reply(
        &self,
        user_id: &str,
        text: &str,
        form_completed: bool,
    ) -> PlannedReply {
        self.memory.append(user_id, Role::User, text);

        let profile = if form_completed {
            Profile::Standard
        } else {
            Profile::FormNudger {
                form_link: self.form_link(user_id),
            }
        };

        let context = self.memory.context(user_id);
        let (raw, generated) = match self.generator.generate(&profile, &context).await {
            Ok(reply) => (reply, true),
            Err(error) => {
                tracing::warn!(%error, user_id, "reply generation failed, sending fallback");
                (FALLBACK_APOLOGY.to_string(), false)
            }
        };

        let handoff = handoff::contains_marker(&raw).then_some(HandoffReason::CustomerNeedsHelp);
        let text = handoff::strip_marker(&raw);

        if generated {
            self.memory.append(user_id, Role::Assistant, &text);
        }

        PlannedReply { text, handoff }
    }

    pub fn sticker_reply(&self, user_id: &str, completed: bool, link_sent: bool) -> CannedReply {
        self.canned(
            user_id,
            completed,
            link_sent,
            STICKER_COMPLETED,
            STICKER_LINK_SENT,
            STICKER_WITH_LINK,
        )
    }

    pub fn image_reply(&self, user_id: &str, completed: bool, link_sent: bool) -> CannedReply {
        self.canned(
            user_id,
            completed,
            link_sent,
            IMAGE_COMPLETED,
            IMAGE_LINK_SENT,
            IMAGE_WITH_LINK,
        )
    }

    pub fn unsupported_reply(&self) -> &'static str {
        UNSUPPORTED_REDIRECT
    }

    pub fn completion_ack(&self) -> &'static str {
        COMPLETION_ACK
    }

    /// Three-way branch shared by the sticker and image acknowledgments:
    /// completed / link already sent / link not yet sent.
    fn canned(
        &self,
        user_id: &str,
        completed: bool,
        link_sent: bool,
        completed_text: &str,
        link_sent_text: &str,
        with_link_template: &str,
    ) -> CannedReply {
        if completed {
            CannedReply {
                text: completed_text.to_string(),
                sends_form_link: false,
            }
        } else if link_sent {
            CannedReply {
                text: link_sent_text.to_string(),
                sends_form_link: false,
            }
        } else {
            CannedReply {
                text: with_link_template.replace("{form_link}", &self.form_link(user_id)),
                sends_form_link: true,
            }
        }
    }
}
