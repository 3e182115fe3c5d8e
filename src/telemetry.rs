//! Global metrics registry and the /metrics handler.

use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use prometheus::{
    Encoder as _, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

use std::sync::LazyLock;

/// Global metrics instance. Initialized once, accessed from any call site.
static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// All Prometheus metric handles for the Switchboard process.
///
/// Access via `Metrics::global()`. Metric handles are cheap to clone (Arc
/// internally) so call sites can grab references without threading state.
pub struct Metrics {
    registry: Registry,

    /// Inbound deliveries by outcome.
    /// Label: outcome (rejected / mirrored_only / noop / processed).
    pub deliveries_total: IntCounterVec,

    /// Routed events by message kind.
    pub events_total: IntCounterVec,

    /// Outbound replies by variant (generated / completion-ack / sticker /
    /// image / redirect).
    pub replies_total: IntCounterVec,

    /// Handoff escalations by reason.
    pub handoffs_total: IntCounterVec,

    /// Outbound sink failures by sink.
    pub sink_failures_total: IntCounterVec,

    /// Assistant generation duration in seconds.
    pub generation_duration_seconds: Histogram,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let deliveries_total = IntCounterVec::new(
            Opts::new(
                "switchboard_deliveries_total",
                "Inbound webhook deliveries by outcome",
            ),
            &["outcome"],
        )
        .expect("hardcoded metric descriptor");

        let events_total = IntCounterVec::new(
            Opts::new(
                "switchboard_events_total",
                "Routed message events by kind",
            ),
            &["kind"],
        )
        .expect("hardcoded metric descriptor");

        let replies_total = IntCounterVec::new(
            Opts::new(
                "switchboard_replies_total",
                "Outbound replies by variant",
            ),
            &["variant"],
        )
        .expect("hardcoded metric descriptor");

        let handoffs_total = IntCounterVec::new(
            Opts::new(
                "switchboard_handoffs_total",
                "Handoff escalations by reason",
            ),
            &["reason"],
        )
        .expect("hardcoded metric descriptor");

        let sink_failures_total = IntCounterVec::new(
            Opts::new(
                "switchboard_sink_failures_total",
                "Outbound sink failures by sink",
            ),
            &["sink"],
        )
        .expect("hardcoded metric descriptor");

        let generation_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "switchboard_generation_duration_seconds",
                "Assistant generation duration in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0]),
        )
        .expect("hardcoded metric descriptor");

        registry
            .register(Box::new(deliveries_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(events_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(replies_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(handoffs_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(sink_failures_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(generation_duration_seconds.clone()))
            .expect("hardcoded metric");

        Self {
            registry,
            deliveries_total,
            events_total,
            replies_total,
            handoffs_total,
            sink_failures_total,
            generation_duration_seconds,
        }
    }

    /// Access the global metrics instance.
    pub fn global() -> &'static Self {
        &METRICS
    }
}

/// Axum handler serving the text exposition format.
pub async fn metrics_handler() -> impl IntoResponse {
    let metric_families = Metrics::global().registry.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(%error, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "encoding failed").into_response();
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
