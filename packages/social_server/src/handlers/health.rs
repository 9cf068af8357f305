use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use crate::AppState;
use crate::db::DbStats;
use crate::metrics::{self, MetricsSnapshot, PresenceMetrics};

async fn presence(state: &AppState) -> PresenceMetrics {
    let registry = state.hub.registry();
    PresenceMetrics {
        online_users: registry.user_count().await as u64,
        active_groups: registry.group_count().await as u64,
        registered_connections: registry.connection_count().await as u64,
    }
}

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let presence = presence(&state).await;
    let metrics = state.metrics.snapshot(state.hub.stats(), presence);

    let status = if metrics.errors.database == 0 && metrics.errors.websocket == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        connections: metrics.connections.active,
        online_users: metrics.presence.online_users,
        uptime_secs: metrics.uptime_secs,
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    #[serde(flatten)]
    server: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<DbStats>,
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let presence = presence(&state).await;
    let database = match state.db.get_stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Database stats unavailable: {:#}", e);
            None
        }
    };
    Json(MetricsResponse {
        server: state.metrics.snapshot(state.hub.stats(), presence),
        database,
    })
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 if the server is ready to accept requests
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let db_ok = state.db.pool.acquire().await.is_ok();

    if db_ok {
        Json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected"
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{read_json, test_app_state};
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    fn health_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(health_live_handler))
            .route("/health/ready", get(health_ready_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_presence() {
        let (state, _tmp) = test_app_state(&["alice"]).await;
        let (conn, _out) = state.hub.connect("alice", None);
        state.hub.register("alice", &conn).await;

        let resp = health_router(state).oneshot(get_req("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = read_json(resp).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["online_users"], 1);
    }

    #[tokio::test]
    async fn live_and_ready() {
        let (state, _tmp) = test_app_state(&[]).await;
        let resp = health_router(state.clone())
            .oneshot(get_req("/health/live"))
            .await
            .unwrap();
        assert_eq!(read_json(resp).await["status"], "alive");

        let resp = health_router(state).oneshot(get_req("/health/ready")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp).await["database"], "connected");
    }

    #[tokio::test]
    async fn metrics_include_hub_and_database() {
        let (state, _tmp) = test_app_state(&["alice", "bob"]).await;
        let group = state.repository.create_group("alice", "Chess", "").await.unwrap();
        let (conn, _out) = state.hub.connect("alice", Some(group.id));
        state.hub.register("alice", &conn).await;

        let resp = health_router(state).oneshot(get_req("/metrics")).await.unwrap();
        let json = read_json(resp).await;
        assert_eq!(json["hub"]["registrations"], 1);
        assert_eq!(json["presence"]["active_groups"], 1);
        assert_eq!(json["presence"]["registered_connections"], 1);
        assert_eq!(json["database"]["users"], 2);
        assert!(json["uptime_secs"].is_u64());
    }
}
