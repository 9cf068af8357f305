use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use relay_hub::Hub;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod metrics;
mod models;
mod repository;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::auth::AuthState;
use crate::config::{FileConfig, ServerConfig, SocialConfig, load_config};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::SocialRepository;

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

#[derive(Parser)]
#[command(name = "social")]
#[command(about = "Real-time chat and notification server for the social network")]
struct Cli {
    /// Custom data directory (defaults to ~/.social)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Host to bind to (overrides config.toml)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server (overrides config.toml)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Clone)]
#[allow(dead_code)]
pub(crate) struct AppState {
    pub config: Arc<SocialConfig>,
    /// Server runtime configuration
    pub server_config: Arc<ServerConfig>,
    /// Connection registry and fan-out
    pub hub: Arc<Hub>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    pub db: Arc<Database>,
    pub repository: Arc<SocialRepository>,
}

fn build_router(state: AppState) -> Router {
    let auth_state = AuthState {
        repository: state.repository.clone(),
    };

    Router::new()
        // Live connection
        .route("/ws", get(handlers::websocket_handler))
        // Chat
        .route("/api/chat/direct", post(handlers::send_direct_message))
        .route(
            "/api/chat/direct/{user_id}",
            get(handlers::list_direct_messages),
        )
        .route(
            "/api/chat/group/{id}",
            get(handlers::list_group_messages).post(handlers::send_group_message),
        )
        .route(
            "/api/chat/read/{message_id}",
            post(handlers::mark_message_read),
        )
        .route(
            "/api/chat/conversations",
            get(handlers::list_conversations),
        )
        // Groups
        .route("/api/groups", post(handlers::create_group))
        .route("/api/groups/{id}/invite", post(handlers::invite_to_group))
        .route(
            "/api/groups/{id}/invitations/{invitation_id}/accept",
            post(handlers::accept_invitation),
        )
        .route("/api/groups/{id}/requests", post(handlers::request_to_join))
        .route(
            "/api/groups/{id}/requests/{request_id}/accept",
            post(handlers::accept_join_request),
        )
        // Notifications
        .route("/api/notifications", get(handlers::list_notifications))
        .route(
            "/api/notifications/read",
            post(handlers::mark_notification_read),
        )
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth::auth_middleware,
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "social=debug,relay_hub=debug,tower_http=debug,info"
    } else {
        "social=info,relay_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = SocialConfig::new(cli.data_dir.clone())?;
    let file_config: FileConfig = load_config(&config.data_dir)
        .extract()
        .with_context(|| {
            format!(
                "Failed to load configuration from {}",
                config.config_toml_path().display()
            )
        })?;

    if cli.print_config {
        println!("{}", file_config.to_toml()?);
        return Ok(());
    }

    run_server(cli, config, file_config).await
}

async fn run_server(cli: Cli, config: SocialConfig, file_config: FileConfig) -> Result<()> {
    info!("Starting social real-time server");

    let mut server_config = ServerConfig::from_file(&file_config.server);
    if let Some(host) = cli.host {
        server_config.host = host;
    }
    if let Some(port) = cli.port {
        server_config.port = port;
    }
    let hub_config = file_config.hub.to_hub_config()?;
    info!(
        queue_capacity = hub_config.queue_capacity,
        pong_wait = ?hub_config.pong_wait,
        ping_period = ?hub_config.ping_period,
        slow_consumer = ?hub_config.slow_consumer,
        "Hub configured"
    );

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config, &file_config.database).await?);
    let repository = Arc::new(SocialRepository::new(db.pool.clone()));

    // Spawn periodic expired session cleanup
    if let Some(period) = server_config.session_sweep {
        let cleanup_repo = repository.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match cleanup_repo.cleanup_expired_sessions().await {
                    Ok(n) if n > 0 => info!("Cleaned up {} expired sessions", n),
                    Ok(_) => {}
                    Err(e) => warn!("Session cleanup failed: {:#}", e),
                }
            }
        });
    }

    let addr = format!("{}:{}", server_config.host, server_config.port)
        .parse::<SocketAddr>()
        .context("Invalid listen address")?;

    let app_state = AppState {
        config: Arc::new(config),
        server_config: Arc::new(server_config),
        hub: Arc::new(Hub::new(hub_config)),
        metrics: Arc::new(ServerMetrics::new()),
        db,
        repository,
    };
    let hub_for_shutdown = app_state.hub.clone();

    let app = build_router(app_state)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Listening on http://{}", actual_addr);
    info!("WebSocket endpoint: ws://{}/ws", actual_addr);

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    let stats = hub_for_shutdown.stats();
    info!(
        registrations = stats.registrations,
        delivered = stats.messages_delivered,
        dropped = stats.messages_dropped,
        evicted = stats.connections_evicted,
        "Shutdown complete"
    );
    server_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{read_json, session_cookie, test_app_state};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_is_public() {
        let (state, _tmp) = test_app_state(&[]).await;
        let resp = build_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_requires_session_cookie() {
        let (state, _tmp) = test_app_state(&["alice"]).await;

        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/notifications")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(read_json(resp).await["error"], "Authentication required");

        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/notifications")
                    .header(header::COOKIE, "sid=not-a-session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let cookie = session_cookie(&state, "alice").await;
        let resp = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/notifications")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(read_json(resp).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let (state, _tmp) = test_app_state(&["alice"]).await;
        let session = state
            .repository
            .create_session("alice", chrono::Duration::minutes(-5), None, None)
            .await
            .unwrap();

        let resp = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/chat/conversations")
                    .header(header::COOKIE, format!("sid={}", session.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn group_routes_are_wired_behind_auth() {
        let (state, _tmp) = test_app_state(&["alice"]).await;
        let body = || Body::from(serde_json::json!({ "title": "Chess" }).to_string());

        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/groups")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let cookie = session_cookie(&state, "alice").await;
        let resp = build_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/groups")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::COOKIE, cookie)
                    .body(body())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp).await["owner_user_id"], "alice");
    }

    #[tokio::test]
    async fn websocket_requires_session() {
        let (state, _tmp) = test_app_state(&[]).await;
        let resp = build_router(state)
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
