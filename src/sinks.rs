//! Outbound sinks: CRM mirror, platform reply, and team alert.
//!
//! All three are fire-and-forget collaborators behind small async traits.
//! Every sink swallows its own failures at the call site — an unreachable
//! CRM must never block a reply, and vice versa.

pub mod alert;
pub mod crm;
pub mod reply;

pub use alert::{AlertSink, BroadcastAlert, DisabledAlert, EmailAlert};
pub use crm::{HttpMirror, MirrorSink};
pub use reply::{LineReply, ReplySink};

use std::time::Duration;

/// Bounded timeout shared by the outbound HTTP sinks.
pub(crate) const SINK_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(SINK_TIMEOUT).build()?)
}
