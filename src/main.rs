//! Portal runtime server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────▶ http::server (axum loop, request id, trace span)
//!                 │
//!                 ▼
//!             routing::App ── layers in registration order ──┐
//!                 │                                           │
//!                 │   cookie parser → session → json/form     │
//!                 │   → static files → routes → error layers  │
//!                 ▼                                           │
//!             http::response (helpers, views, commit hooks) ◀─┘
//!                 │
//!     ◀────────── Client Response
//!
//!     Cross-cutting: config (TOML), observability (tracing, Prometheus),
//!     lifecycle (graceful shutdown), runtime (session + template caches)
//! ```

use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use portal_runtime::config::{self, AppConfig};
use portal_runtime::http::{body, serve_static};
use portal_runtime::observability::{logging, metrics};
use portal_runtime::routing::settings;
use portal_runtime::session::{cookie_parser, session};
use portal_runtime::{App, Flow, Shutdown};

#[derive(Parser)]
#[command(name = "portal-runtime")]
#[command(about = "Minimal HTTP application runtime", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(host) = cli.host {
        config.listener.host = host;
    }
    if let Some(port) = cli.port {
        config.listener.port = port;
    }

    logging::init(&config.observability.log_level)?;
    tracing::info!("portal-runtime v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        body_limit = config.limits.body_bytes,
        session_cookie = %config.session.name,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = build_app(&config)?;
    let shutdown = Shutdown::new();

    let sessions = app.runtime().sessions().clone();
    let purger = tokio::spawn(
        sessions.run_purger(config.session.purge_interval(), shutdown.subscribe()),
    );

    let served = app
        .listen(&config.listener.host, config.listener.port, shutdown.subscribe())
        .await;
    shutdown.trigger();
    let _ = purger.await;
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_app(config: &AppConfig) -> Result<App, Box<dyn std::error::Error>> {
    let mut app = App::new();

    if let Some(dir) = &config.views.dir {
        app.set(settings::VIEWS, dir.to_string_lossy().to_string())
            .set(settings::VIEW_ENGINE, config.views.engine.clone());
    }

    app.use_handler("/", cookie_parser())?
        .use_handler("/", session(config.session.clone()))?
        .use_handler("/", body::json().limit(config.limits.body_bytes))?
        .use_handler("/", body::urlencoded().limit(config.limits.body_bytes))?;

    if let Some(root) = &config.static_files.root {
        let index = Some(config.static_files.index.as_str()).filter(|i| !i.is_empty());
        app.use_handler("/", serve_static(root).index(index))?;
    }

    app.get("/healthz", |_req, res| {
        Box::pin(async move {
            res.json(&json!({ "status": "ok" }))?;
            Ok(Flow::Done)
        })
    })?;

    Ok(app)
}
