//! Switchboard CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use switchboard::config::{AlertConfig, Config, ModeSwitch};
use switchboard::dispatch::Dispatcher;
use switchboard::forms::{FormStore, JsonFileStore};
use switchboard::handoff::SelfReportMatcher;
use switchboard::llm::AnthropicGenerator;
use switchboard::memory::ConversationMemory;
use switchboard::planner::ReplyPlanner;
use switchboard::server::{self, AppState};
use switchboard::sinks::{
    AlertSink, BroadcastAlert, DisabledAlert, EmailAlert, HttpMirror, LineReply, MirrorSink,
};

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Webhook router: mirrors chat events to a CRM and generates assistant replies")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Listen port override (defaults to PORT or 5000)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load().with_context(|| "failed to load configuration from environment")?;
    let port = cli.port.unwrap_or(config.port);

    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let forms: Arc<dyn FormStore> = Arc::new(JsonFileStore::open(config.form_state_path()));
    let memory = Arc::new(ConversationMemory::new());
    let mode = Arc::new(ModeSwitch::new(config.forwarding_only));

    let generator = AnthropicGenerator::new(&config.assistant)
        .with_context(|| "failed to build assistant client")?;
    let assistant_configured = generator.is_configured();

    let mirror: Option<Arc<dyn MirrorSink>> = match &config.crm_webhook_url {
        Some(url) => Some(Arc::new(
            HttpMirror::new(url.clone()).with_context(|| "failed to build crm mirror sink")?,
        )),
        None => None,
    };

    let alert: Arc<dyn AlertSink> = match &config.alert {
        AlertConfig::Broadcast { access_token } => Arc::new(
            BroadcastAlert::new(access_token.clone())
                .with_context(|| "failed to build broadcast alert sink")?,
        ),
        AlertConfig::Email(email) => Arc::new(
            EmailAlert::new(email).with_context(|| "failed to build email alert sink")?,
        ),
        AlertConfig::Disabled => {
            tracing::warn!("no team alert transport configured, handoffs will only be logged");
            Arc::new(DisabledAlert)
        }
    };

    let reply = Arc::new(
        LineReply::new(config.channel_access_token.clone())
            .with_context(|| "failed to build reply sink")?,
    );

    let planner = ReplyPlanner::new(
        memory.clone(),
        Arc::new(generator),
        config.form_base_url.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        config.channel_secret.clone(),
        mode.clone(),
        forms.clone(),
        memory,
        planner,
        mirror.clone(),
        reply,
        alert,
        SelfReportMatcher::thai_defaults(),
    ));

    tracing::info!(
        mirror = if mirror.is_some() { "active" } else { "not configured" },
        assistant = if assistant_configured { "active" } else { "not configured" },
        alerts = config.alert.transport_name(),
        mode = mode.current().as_str(),
        "starting switchboard"
    );

    let state = Arc::new(AppState {
        dispatcher,
        mode,
        forms,
        mirror_configured: mirror.is_some(),
        assistant_configured,
        alert_transport: config.alert.transport_name(),
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let bind: SocketAddr = ([0, 0, 0, 0], port).into();
    let server_handle = server::start_http_server(bind, state, shutdown_rx).await?;

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = server_handle.await;

    tracing::info!("switchboard stopped");
    Ok(())
}
