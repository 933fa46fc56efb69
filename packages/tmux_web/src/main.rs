use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use tmux_bridge::{DEFAULT_SESSION, SessionBridge, TmuxEngine};
use tmux_web::config::{AppConfig, Cli};
use tmux_web::{AppState, app_router};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "tmux_web=debug,tmux_bridge=debug,tower_http=debug,info"
    } else {
        "tmux_web=info,tmux_bridge=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = AppConfig::load(&cli)?;
    info!("Starting tmux-web");

    let engine = TmuxEngine::locate(config.engine.clone())
        .await
        .context("tmux is required but could not be run")?;
    let bridge = SessionBridge::spawn(Arc::new(engine));
    bridge.ensure_default(config.session_cwd.as_deref()).await;

    let addr = config.bind_addr;
    let static_dir = config.static_dir.clone();
    let app_state = AppState::new(bridge, config);
    let connections = app_state.connections.clone();

    let app = app_router(app_state)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("tmux-web listening on http://{}", actual_addr);
    info!("Static files from {}", static_dir.display());
    info!("Default session: '{}'", DEFAULT_SESSION);
    info!("API endpoints:");
    info!("  GET    /sessions            - List sessions");
    info!("  POST   /sessions            - Create session");
    info!("  PATCH  /sessions/{{name}}     - Rename session");
    info!("  DELETE /sessions/{{name}}     - Kill session");
    info!("  POST   /exec/{{session}}      - Type a command into a session");
    info!("  GET    /ws/{{session}}        - Terminal WebSocket");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    // Attach clients go away; the tmux sessions stay.
    let bindings = connections.drain().await;
    for binding in &bindings {
        if let Err(e) = binding.handle.kill().await {
            warn!("Failed to kill PTY for '{}': {}", binding.session, e);
        }
    }
    info!("Detached {} client(s)", bindings.len());

    info!("Shutdown complete");
    server_result
}
