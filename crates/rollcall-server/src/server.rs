//! `RollcallServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use rollcall_core::{IdentityPool, PeerId, RosterEntry};
use rollcall_settings::{RollcallSettings, ServerSettings};
use rollcall_telemetry::metrics::WS_REJECTED_TOTAL;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::health::{self, HealthResponse};
use crate::manager::ConnectionManager;
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry and outbound sends.
    pub manager: Arc<ConnectionManager>,
    /// Cancelled once shutdown starts; sessions and the listener watch it.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Connection limits.
    pub settings: Arc<ServerSettings>,
    /// Prometheus handle for `/metrics`, when a recorder exists.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The rollcall server.
pub struct RollcallServer {
    settings: Arc<ServerSettings>,
    manager: Arc<ConnectionManager>,
    shutdown: CancellationToken,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl RollcallServer {
    /// Create a new server from loaded settings.
    pub fn new(settings: &RollcallSettings, metrics_handle: Option<PrometheusHandle>) -> Self {
        let pool = IdentityPool::new(settings.identities.labels.iter().cloned());
        Self {
            settings: Arc::new(settings.server.clone()),
            manager: Arc::new(ConnectionManager::new(
                pool,
                settings.server.duplicate_peer_policy,
            )),
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
            metrics_handle,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: self.manager.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            settings: self.settings.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/ws/{user_id}", get(ws_handler))
            .route("/api/ws/{user_id}", get(ws_handler))
            .route("/api/health", get(health_handler))
            .route("/api/active-users", get(active_users_handler))
            .route("/metrics", get(metrics_handler))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(state)
    }

    /// Bind `host:port` and serve until shutdown is requested.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "rollcall server listening");

        let router = self.router();
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Get the connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Stop accepting connections and tell every session to close.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Shut down, close every session, and wait up to `timeout` for the
    /// serve task returned by [`listen`](Self::listen).
    pub async fn shutdown_gracefully(&self, serve: JoinHandle<()>, timeout: Duration) {
        self.shutdown();
        let closed = self.manager.close_all();
        info!(sessions = closed, timeout_secs = timeout.as_secs(), "shutting down");
        if tokio::time::timeout(timeout, serve).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, listener still running");
        }
    }

    /// Get the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// GET /ws/{user_id}: upgrade and hand the socket to a session task.
async fn ws_handler(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    // Upgrades in flight are not counted, so concurrent upgrades can overshoot
    // the limit by at most their number.
    if state.manager.len() >= state.settings.max_connections {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(
            peer_id = %user_id,
            max_connections = state.settings.max_connections,
            "connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let config = SessionConfig {
        max_send_queue: state.settings.max_send_queue,
        heartbeat_interval: Duration::from_secs(state.settings.heartbeat_interval_secs),
        heartbeat_timeout: Duration::from_secs(state.settings.heartbeat_timeout_secs),
    };
    let manager = state.manager.clone();
    let token = state.shutdown.clone();
    let peer_id = PeerId::from_raw(user_id);
    ws.max_message_size(state.settings.max_message_size)
        .max_frame_size(state.settings.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, peer_id, manager, config, token))
}

/// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.manager.len()))
}

/// Body of `/api/active-users`.
#[derive(Debug, Serialize)]
pub struct ActiveUsers {
    /// Current roster.
    pub users: Vec<RosterEntry>,
}

/// GET /api/active-users
async fn active_users_handler(State(state): State<AppState>) -> Json<ActiveUsers> {
    Json(ActiveUsers {
        users: state.manager.roster(),
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => rollcall_telemetry::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientConnection;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use rollcall_settings::DuplicatePeerPolicy;
    use tower::ServiceExt;

    fn make_server() -> RollcallServer {
        RollcallServer::new(&RollcallSettings::default(), None)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_json(make_server().router(), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "rollcall");
        assert_eq!(body["connections"], 0);
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn active_users_empty_roster() {
        let (status, body) = get_json(make_server().router(), "/api/active-users").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"users": []}));
    }

    #[tokio::test]
    async fn active_users_lists_sessions() {
        let server = make_server();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(PeerId::from_raw("alice"), tx));
        let reg = server.manager().connect(conn.peer_id.clone(), conn).unwrap();

        let (_, body) = get_json(server.router(), "/api/active-users").await;
        assert_eq!(body["users"][0]["user_id"], "alice");
        assert_eq!(body["users"][0]["character"], reg.identity.as_str());
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let req = Request::builder().uri("/api/ws/alice").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (status, _) = get_json(make_server().router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let (status, _) = get_json(make_server().router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_renders_with_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = RollcallServer::new(&RollcallSettings::default(), Some(handle));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn server_uses_configured_policy_and_pool() {
        let mut settings = RollcallSettings::default();
        settings.server.duplicate_peer_policy = DuplicatePeerPolicy::Reject;
        settings.server.max_connections = 3;
        settings.identities.labels = vec!["Vega".into()];
        let server = RollcallServer::new(&settings, None);
        assert_eq!(server.settings().max_connections, 3);

        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(PeerId::from_raw("a"), tx));
        let reg = server.manager().connect(conn.peer_id.clone(), conn).unwrap();
        assert_eq!(reg.identity, "Vega");
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let mut settings = RollcallSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        let server = RollcallServer::new(&settings, None);
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown();
        assert!(server.is_shutting_down());
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_gracefully_closes_sessions_and_stops_listener() {
        let mut settings = RollcallSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        let server = RollcallServer::new(&settings, None);
        let (_addr, handle) = server.listen().await.unwrap();

        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(PeerId::from_raw("a"), tx));
        let _ = server.manager().connect(conn.peer_id.clone(), conn.clone()).unwrap();

        server.shutdown_gracefully(handle, Duration::from_secs(5)).await;
        assert!(server.is_shutting_down());
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_gracefully_gives_up_after_timeout() {
        let server = make_server();
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        server.shutdown_gracefully(stuck, Duration::from_millis(50)).await;
        assert!(server.is_shutting_down());
    }
}
