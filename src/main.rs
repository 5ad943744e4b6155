use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use mugo_zap::api::{self, AppState};
use mugo_zap::channels::WhatsAppGateway;
use mugo_zap::config::AppConfig;
use mugo_zap::dispatch::Dispatcher;
use mugo_zap::flow::{FlowEngine, FlowGraph};
use mugo_zap::llm::create_generator;
use mugo_zap::store::{Database, MemoryBackend, RestBackend};

/// Stderr logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mugo-zap.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment still applies.
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    info!("mugo-zap v{}", env!("CARGO_PKG_VERSION"));

    // ── Store ────────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = match &config.supabase {
        Some(supabase) => {
            info!(url = %supabase.url, "Using Supabase store");
            Arc::new(RestBackend::new(supabase.clone(), config.http_timeout)?)
        }
        None => {
            warn!("SUPABASE_URL not set, running in local mode with an in-memory store");
            Arc::new(MemoryBackend::new())
        }
    };

    // ── Flow ─────────────────────────────────────────────────────────────
    let graph = match &config.flow.graph_path {
        Some(path) => FlowGraph::from_path(path)
            .with_context(|| format!("failed to load flow graph from {}", path.display()))?,
        None => FlowGraph::default(),
    };
    info!(
        enabled = config.flow.enabled,
        menu_style = %config.flow.menu_style,
        categories = graph.root.options.len(),
        "Flow ready"
    );
    let engine = Arc::new(FlowEngine::new(db.clone(), Arc::new(graph), &config.flow));

    // ── Dispatcher ───────────────────────────────────────────────────────
    let gateway = Arc::new(WhatsAppGateway::new(&config.whatsapp, config.http_timeout)?);
    let generator = create_generator(config.openai.as_ref())?;
    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        gateway,
        engine,
        generator,
        &config.handoff,
        config.http_timeout,
    ));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let state = AppState {
        dispatcher,
        db,
        verify_token: config.server.verify_token.clone(),
        app_secret: config.whatsapp.app_secret.clone(),
        debug_webhook: config.server.debug_webhook,
        panel_api_key: config.server.panel_api_key.clone(),
    };
    if state.panel_api_key.is_none() {
        info!("PANEL_API_KEY not set, panel routes disabled");
    }
    let app = api::routes(state, &config.server.allowed_origins);

    let port = config.server.port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, "Webhook server started");
    axum::serve(listener, app).await?;
    Ok(())
}
