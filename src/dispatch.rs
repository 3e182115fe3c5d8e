//! Per-event dispatch: the state machine driving every inbound delivery.
//!
//! A delivery moves through verify → mirror → mode gate → parse → per-event
//! routing. The CRM mirror is causally independent of the reply path from
//! the moment it is spawned: its failures are logged in its own task and
//! never propagate. Events within a batch are processed independently and
//! in order, with no cross-event rollback.

use crate::config::ModeSwitch;
use crate::forms::FormStore;
use crate::handoff::{HandoffEvent, HandoffReason, SelfReportMatcher};
use crate::memory::ConversationMemory;
use crate::planner::ReplyPlanner;
use crate::signature;
use crate::sinks::{AlertSink, MirrorSink, ReplySink};
use crate::webhook::{self, Event, MessageKind};
use chrono::Utc;
use std::sync::Arc;

/// Outcome of one inbound delivery, for logs and the HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Bad signature. The only outcome surfaced as a non-200.
    Rejected,

    /// Forwarding-only mode: mirrored, assistant bypassed.
    MirroredOnly,

    /// Body was not valid JSON; acknowledged as a no-op so the platform
    /// does not hammer the endpoint with retries.
    NoOp,

    Processed { replied: usize, suppressed: usize },
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Rejected => "rejected",
            DeliveryOutcome::MirroredOnly => "mirrored_only",
            DeliveryOutcome::NoOp => "noop",
            DeliveryOutcome::Processed { .. } => "processed",
        }
    }
}

/// What happened to a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Replied,
    Suppressed,
}

pub struct Dispatcher {
    channel_secret: String,
    mode: Arc<ModeSwitch>,
    forms: Arc<dyn FormStore>,
    memory: Arc<ConversationMemory>,
    planner: ReplyPlanner,
    mirror: Option<Arc<dyn MirrorSink>>,
    reply: Arc<dyn ReplySink>,
    alert: Arc<dyn AlertSink>,
    self_reports: SelfReportMatcher,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_secret: String,
        mode: Arc<ModeSwitch>,
        forms: Arc<dyn FormStore>,
        memory: Arc<ConversationMemory>,
        planner: ReplyPlanner,
        mirror: Option<Arc<dyn MirrorSink>>,
        reply: Arc<dyn ReplySink>,
        alert: Arc<dyn AlertSink>,
        self_reports: SelfReportMatcher,
    ) -> Self {
        Self {
            channel_secret,
            mode,
            forms,
            memory,
            planner,
            mirror,
            reply,
            alert,
            self_reports,
        }
    }

    /// Process one inbound webhook delivery end to end.
    pub async fn handle_delivery(
        &self,
        body: &[u8],
        content_type: &str,
        signature_header: &str,
    ) -> DeliveryOutcome {
        let outcome = self
            .handle_delivery_inner(body, content_type, signature_header)
            .await;

        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global()
            .deliveries_total
            .with_label_values(&[outcome.as_str()])
            .inc();

        outcome
    }

    async fn handle_delivery_inner(
        &self,
        body: &[u8],
        content_type: &str,
        signature_header: &str,
    ) -> DeliveryOutcome {
        if !signature::verify(&self.channel_secret, body, signature_header) {
            tracing::warn!("rejecting delivery with invalid signature");
            return DeliveryOutcome::Rejected;
        }

        // Mirror unconditionally, before and independently of routing.
        self.spawn_mirror(body, content_type, signature_header);

        if self.mode.is_forwarding_only() {
            tracing::info!("forwarding-only mode, skipping assistant");
            return DeliveryOutcome::MirroredOnly;
        }

        let Some(events) = webhook::parse_events(body) else {
            tracing::warn!("delivery body is not valid JSON, acknowledging as no-op");
            return DeliveryOutcome::NoOp;
        };

        // Opportunistic staleness sweep; touches conversation memory only.
        self.memory.evict_stale(Utc::now());

        let mut replied = 0;
        let mut suppressed = 0;
        for event in &events {
            match self.handle_event(event).await {
                EventDisposition::Replied => replied += 1,
                EventDisposition::Suppressed => suppressed += 1,
            }
        }

        DeliveryOutcome::Processed { replied, suppressed }
    }

    async fn handle_event(&self, event: &Event) -> EventDisposition {
        if event.kind != "message" {
            return EventDisposition::Suppressed;
        }

        let reply_token = event.reply_token.as_deref().unwrap_or("");
        let user_id = event
            .source
            .as_ref()
            .and_then(|source| source.user_id.as_deref())
            .unwrap_or("");
        let Some(message) = &event.message else {
            return EventDisposition::Suppressed;
        };
        if reply_token.is_empty() || user_id.is_empty() {
            return EventDisposition::Suppressed;
        }

        let kind = MessageKind::classify(&message.kind);

        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global()
            .events_total
            .with_label_values(&[kind.as_str()])
            .inc();

        match kind {
            MessageKind::Text => {
                let text = message.text.as_deref().unwrap_or("");
                self.handle_text(user_id, reply_token, text).await
            }
            MessageKind::Sticker | MessageKind::Image => {
                self.handle_media(user_id, reply_token, kind).await
            }
            MessageKind::Unsupported => {
                self.send_reply(reply_token, self.planner.unsupported_reply(), "redirect")
                    .await;
                EventDisposition::Replied
            }
            MessageKind::Unknown => {
                tracing::info!(kind = %message.kind, "ignoring unknown message kind");
                EventDisposition::Suppressed
            }
        }
    }

    async fn handle_text(
        &self,
        user_id: &str,
        reply_token: &str,
        text: &str,
    ) -> EventDisposition {
        let preview: String = text.chars().take(50).collect();
        tracing::info!(user_id, text = %preview, "text message received");

        // Self-report short-circuit: no generation step is involved, so
        // phrase matching is the right classifier here.
        if self.self_reports.matches(text) {
            let newly_completed = match self.forms.mark_completed(user_id).await {
                Ok(newly) => newly,
                Err(error) => {
                    tracing::error!(%error, user_id, "failed to persist form completion");
                    // The in-memory flag is set; alert anyway rather than
                    // risk losing the escalation.
                    true
                }
            };

            self.send_reply(reply_token, self.planner.completion_ack(), "completion-ack")
                .await;
            // Alert only on the false→true transition, so a redelivered
            // webhook cannot page the team twice.
            if newly_completed {
                self.send_alert(HandoffReason::FormCompleted, text).await;
            }
            return EventDisposition::Replied;
        }

        let completed = self.forms.is_completed(user_id).await;
        let planned = self.planner.text_reply(user_id, text, completed).await;

        self.send_reply(reply_token, &planned.text, "generated").await;
        if let Some(reason) = planned.handoff {
            self.send_alert(reason, text).await;
        }
        EventDisposition::Replied
    }

    async fn handle_media(
        &self,
        user_id: &str,
        reply_token: &str,
        kind: MessageKind,
    ) -> EventDisposition {
        let completed = self.forms.is_completed(user_id).await;
        let link_sent = self.forms.is_link_sent(user_id).await;

        let canned = if kind == MessageKind::Sticker {
            self.planner.sticker_reply(user_id, completed, link_sent)
        } else {
            self.planner.image_reply(user_id, completed, link_sent)
        };

        self.send_reply(reply_token, &canned.text, kind.as_str()).await;

        if canned.sends_form_link {
            if let Err(error) = self.forms.mark_link_sent(user_id).await {
                tracing::error!(%error, user_id, "failed to record form link send");
            }
        }
        EventDisposition::Replied
    }

    fn spawn_mirror(&self, body: &[u8], content_type: &str, signature_header: &str) {
        let Some(mirror) = self.mirror.clone() else {
            tracing::debug!("crm mirror not configured, skipping forward");
            return;
        };
        let body = body.to_vec();
        let content_type = content_type.to_string();
        let signature_header = signature_header.to_string();

        tokio::spawn(async move {
            if let Err(error) = mirror.forward(body, &content_type, &signature_header).await {
                tracing::warn!(%error, "failed to forward delivery to crm mirror");

                #[cfg(feature = "metrics")]
                crate::telemetry::Metrics::global()
                    .sink_failures_total
                    .with_label_values(&["crm-mirror"])
                    .inc();
            }
        });
    }

    async fn send_reply(&self, reply_token: &str, text: &str, variant: &str) {
        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global()
            .replies_total
            .with_label_values(&[variant])
            .inc();
        #[cfg(not(feature = "metrics"))]
        let _ = variant;

        if let Err(error) = self.reply.send(reply_token, text).await {
            tracing::error!(%error, "failed to send reply");

            #[cfg(feature = "metrics")]
            crate::telemetry::Metrics::global()
                .sink_failures_total
                .with_label_values(&["reply"])
                .inc();
        }
    }

    async fn send_alert(&self, reason: HandoffReason, triggering_text: &str) {
        tracing::info!(reason = reason.as_str(), "handoff triggered");

        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global()
            .handoffs_total
            .with_label_values(&[reason.as_str()])
            .inc();

        let event = HandoffEvent::now(reason, triggering_text);
        if let Err(error) = self.alert.alert(&event).await {
            tracing::error!(%error, reason = reason.as_str(), "failed to send team alert");

            #[cfg(feature = "metrics")]
            crate::telemetry::Metrics::global()
                .sink_failures_total
                .with_label_values(&["alert"])
                .inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, SinkError};
    use crate::forms::JsonFileStore;
    use crate::llm::{Profile, ReplyGenerator};
    use crate::memory::ContextTurn;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingReply {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingReply {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().expect("reply log should lock").clone()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingReply {
        async fn send(&self, reply_token: &str, text: &str) -> Result<(), SinkError> {
            self.sent
                .lock()
                .expect("reply log should lock")
                .push((reply_token.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct RecordingAlert {
        reasons: Mutex<Vec<HandoffReason>>,
    }

    impl RecordingAlert {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reasons: Mutex::new(Vec::new()),
            })
        }

        fn reasons(&self) -> Vec<HandoffReason> {
            self.reasons.lock().expect("alert log should lock").clone()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingAlert {
        async fn alert(&self, event: &HandoffEvent) -> Result<(), SinkError> {
            self.reasons
                .lock()
                .expect("alert log should lock")
                .push(event.reason);
            Ok(())
        }
    }

    /// Mirror that always fails, as if the CRM endpoint refused connections.
    struct UnreachableMirror {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl MirrorSink for UnreachableMirror {
        async fn forward(
            &self,
            _body: Vec<u8>,
            _content_type: &str,
            _signature: &str,
        ) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Request {
                sink: "crm-mirror",
                message: "connection refused".into(),
            })
        }
    }

    struct ScriptedGenerator {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReplyGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _profile: &Profile,
            _context: &[ContextTurn],
        ) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(GenerationError::Request("scripted outage".into())),
            }
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        forms: Arc<JsonFileStore>,
        memory: Arc<ConversationMemory>,
        reply: Arc<RecordingReply>,
        alert: Arc<RecordingAlert>,
        generator: Arc<ScriptedGenerator>,
        _dir: tempfile::TempDir,
    }

    const SECRET: &str = "test-channel-secret";

    fn harness_with_mirror(mirror: Option<Arc<dyn MirrorSink>>) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let forms = Arc::new(JsonFileStore::open(dir.path().join("form_state.json")));
        let memory = Arc::new(ConversationMemory::new());
        let reply = RecordingReply::new();
        let alert = RecordingAlert::new();
        let generator = ScriptedGenerator::replying("generated reply");

        let planner = ReplyPlanner::new(
            memory.clone(),
            generator.clone(),
            "https://forms.example/intake".into(),
        );
        let dispatcher = Dispatcher::new(
            SECRET.into(),
            Arc::new(ModeSwitch::new(false)),
            forms.clone(),
            memory.clone(),
            planner,
            mirror,
            reply.clone(),
            alert.clone(),
            SelfReportMatcher::thai_defaults(),
        );

        Harness {
            dispatcher,
            forms,
            memory,
            reply,
            alert,
            generator,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with_mirror(None)
    }

    fn message_body(user_id: &str, kind: &str, text: Option<&str>) -> Vec<u8> {
        let mut message = serde_json::json!({"type": kind});
        if let Some(text) = text {
            message["text"] = serde_json::json!(text);
        }
        serde_json::to_vec(&serde_json::json!({
            "events": [{
                "type": "message",
                "replyToken": "rt-1",
                "source": {"userId": user_id, "type": "user"},
                "message": message,
            }]
        }))
        .expect("body should serialize")
    }

    async fn deliver(harness: &Harness, body: &[u8]) -> DeliveryOutcome {
        let signature = signature::sign(SECRET, body);
        harness
            .dispatcher
            .handle_delivery(body, "application/json", &signature)
            .await
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_any_side_effect() {
        let harness = harness();
        let body = message_body("U1", "text", Some("hello"));

        let outcome = harness
            .dispatcher
            .handle_delivery(&body, "application/json", "bogus")
            .await;

        assert_eq!(outcome, DeliveryOutcome::Rejected);
        assert!(harness.reply.sent().is_empty());
        assert_eq!(harness.generator.calls(), 0);
        assert!(harness.memory.context("U1").is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_acknowledged_as_noop() {
        let harness = harness();
        let body = b"definitely not json";
        let signature = signature::sign(SECRET, body);

        let outcome = harness
            .dispatcher
            .handle_delivery(body, "application/json", &signature)
            .await;

        assert_eq!(outcome, DeliveryOutcome::NoOp);
        assert!(harness.reply.sent().is_empty());
    }

    #[tokio::test]
    async fn first_text_from_new_user_generates_and_stores_two_turns() {
        let harness = harness();
        let body = message_body("U1", "text", Some("สวัสดีค่ะ"));

        let outcome = deliver(&harness, &body).await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Processed {
                replied: 1,
                suppressed: 0
            }
        );
        assert_eq!(harness.generator.calls(), 1);
        assert_eq!(
            harness.reply.sent(),
            vec![("rt-1".to_string(), "generated reply".to_string())]
        );
        assert_eq!(harness.memory.context("U1").len(), 2);
        assert!(harness.alert.reasons().is_empty());
    }

    #[tokio::test]
    async fn self_report_marks_store_alerts_once_and_bypasses_generation() {
        let harness = harness();
        let body = message_body("U1", "text", Some("เรียบร้อยแล้วค่ะ"));

        deliver(&harness, &body).await;

        assert!(harness.forms.is_completed("U1").await);
        assert_eq!(harness.generator.calls(), 0);
        let sent = harness.reply.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("ขอบคุณ"));
        assert_eq!(harness.alert.reasons(), vec![HandoffReason::FormCompleted]);

        // Redelivery: acknowledged again, but no duplicate alert.
        deliver(&harness, &body).await;
        assert_eq!(harness.reply.sent().len(), 2);
        assert_eq!(harness.alert.reasons().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_self_reports_complete_once_without_corruption() {
        let harness = harness();
        let body = message_body("U1", "text", Some("เรียบร้อยแล้ว"));

        let (a, b) = tokio::join!(deliver(&harness, &body), deliver(&harness, &body));
        assert!(matches!(a, DeliveryOutcome::Processed { replied: 1, .. }));
        assert!(matches!(b, DeliveryOutcome::Processed { replied: 1, .. }));

        assert!(harness.forms.is_completed("U1").await);
        assert_eq!(harness.forms.counts().await.completed, 1);
        assert_eq!(harness.alert.reasons().len(), 1);
        assert_eq!(harness.reply.sent().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_mirror_never_blocks_the_reply_path() {
        let mirror: Arc<dyn MirrorSink> = Arc::new(UnreachableMirror {
            attempts: AtomicUsize::new(0),
        });
        let harness = harness_with_mirror(Some(mirror));
        let body = message_body("U1", "text", Some("hello"));

        let outcome = deliver(&harness, &body).await;

        assert!(matches!(outcome, DeliveryOutcome::Processed { replied: 1, .. }));
        assert_eq!(harness.reply.sent().len(), 1);
    }

    #[tokio::test]
    async fn handoff_marker_in_generated_reply_alerts_the_team() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let forms = Arc::new(JsonFileStore::open(dir.path().join("form_state.json")));
        let memory = Arc::new(ConversationMemory::new());
        let reply = RecordingReply::new();
        let alert = RecordingAlert::new();
        let generator = ScriptedGenerator::replying("ทีมจะติดต่อกลับค่ะ [HANDOFF]");
        let planner = ReplyPlanner::new(
            memory.clone(),
            generator.clone(),
            "https://forms.example/intake".into(),
        );
        let dispatcher = Dispatcher::new(
            SECRET.into(),
            Arc::new(ModeSwitch::new(false)),
            forms,
            memory,
            planner,
            None,
            reply.clone(),
            alert.clone(),
            SelfReportMatcher::thai_defaults(),
        );

        let body = message_body("U1", "text", Some("ขอจองห้องค่ะ"));
        let signature = signature::sign(SECRET, &body);
        dispatcher
            .handle_delivery(&body, "application/json", &signature)
            .await;

        let sent = reply.sent();
        assert_eq!(sent[0].1, "ทีมจะติดต่อกลับค่ะ");
        assert!(!sent[0].1.contains("[HANDOFF]"));
        assert_eq!(alert.reasons(), vec![HandoffReason::CustomerNeedsHelp]);
    }

    #[tokio::test]
    async fn audio_event_redirects_without_touching_state() {
        let harness = harness();
        let body = message_body("U1", "audio", None);

        deliver(&harness, &body).await;

        let sent = harness.reply.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("ทางข้อความ"));

        assert!(harness.memory.context("U1").is_empty());
        let counts = harness.forms.counts().await;
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.link_sent, 0);
        assert_eq!(harness.generator.calls(), 0);
    }

    #[tokio::test]
    async fn sticker_from_new_user_sends_link_and_marks_it_sent() {
        let harness = harness();
        let body = message_body("U1", "sticker", None);

        deliver(&harness, &body).await;

        assert!(harness.forms.is_link_sent("U1").await);
        assert!(!harness.forms.is_completed("U1").await);
        assert!(harness.reply.sent()[0].1.contains("?ref=U1"));

        // Second sticker: reminder branch, no second link send needed.
        deliver(&harness, &body).await;
        assert_eq!(harness.forms.counts().await.link_sent, 1);
        assert!(!harness.reply.sent()[1].1.contains("?ref="));
    }

    #[tokio::test]
    async fn forwarding_only_mode_skips_routing_entirely() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let forms = Arc::new(JsonFileStore::open(dir.path().join("form_state.json")));
        let memory = Arc::new(ConversationMemory::new());
        let reply = RecordingReply::new();
        let generator = ScriptedGenerator::replying("unused");
        let planner = ReplyPlanner::new(
            memory.clone(),
            generator.clone(),
            "https://forms.example/intake".into(),
        );
        let dispatcher = Dispatcher::new(
            SECRET.into(),
            Arc::new(ModeSwitch::new(true)),
            forms,
            memory,
            planner,
            None,
            reply.clone(),
            RecordingAlert::new(),
            SelfReportMatcher::thai_defaults(),
        );

        let body = message_body("U1", "text", Some("hello"));
        let signature = signature::sign(SECRET, &body);
        let outcome = dispatcher
            .handle_delivery(&body, "application/json", &signature)
            .await;

        assert_eq!(outcome, DeliveryOutcome::MirroredOnly);
        assert!(reply.sent().is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn non_message_and_incomplete_events_are_suppressed() {
        let harness = harness();
        let body = serde_json::to_vec(&serde_json::json!({
            "events": [
                {"type": "follow", "source": {"userId": "U1"}},
                {"type": "message", "source": {"userId": "U1"},
                 "message": {"type": "text", "text": "no reply token"}},
                {"type": "message", "replyToken": "rt",
                 "message": {"type": "text", "text": "no user id"}},
                {"type": "message", "replyToken": "rt",
                 "source": {"userId": "U1"},
                 "message": {"type": "location"}},
            ]
        }))
        .expect("body should serialize");

        let outcome = deliver(&harness, &body).await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Processed {
                replied: 0,
                suppressed: 4
            }
        );
        assert!(harness.reply.sent().is_empty());
    }

    #[tokio::test]
    async fn partial_batch_failure_does_not_roll_back_earlier_events() {
        let harness = harness();
        // Event 1 completes the form; event 2 is malformed and skipped at
        // parse time; event 3 still gets its redirect reply.
        let body = serde_json::to_vec(&serde_json::json!({
            "events": [
                {"type": "message", "replyToken": "rt-1",
                 "source": {"userId": "U1"},
                 "message": {"type": "text", "text": "เรียบร้อยแล้ว"}},
                {"type": 42},
                {"type": "message", "replyToken": "rt-2",
                 "source": {"userId": "U2"},
                 "message": {"type": "audio"}},
            ]
        }))
        .expect("body should serialize");

        deliver(&harness, &body).await;

        assert!(harness.forms.is_completed("U1").await);
        assert_eq!(harness.reply.sent().len(), 2);
    }

    #[tokio::test]
    async fn staleness_sweep_runs_on_the_hot_path_and_spares_the_store() {
        let harness = harness();
        harness
            .forms
            .mark_completed("old-user")
            .await
            .expect("mark should persist");

        deliver(&harness, &message_body("U1", "text", Some("hi"))).await;

        // The sweep may purge conversation memory, never form state.
        assert!(harness.forms.is_completed("old-user").await);
    }
}
