//! HTTP and WebSocket handlers for the Huddle server.
//!
//! `/ws` upgrades to a room session after admission checks, `/health` and
//! `/rooms` report registry state. When a static directory is configured the
//! web client is served from it for every other path.

use crate::auth::SharedSecret;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::persistence::build_store;
use crate::ratelimit::{client_key, RateLimiter};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use huddle_core::HubHandle;
use huddle_protocol::{
    validate_room_name, validate_username, NameError, DEFAULT_ROOM, DEFAULT_USERNAME,
};
use huddle_transport::{websocket, Session};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the room hub.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: Config,
    /// Shared-secret authentication.
    pub auth: SharedSecret,
    /// Per-source connection limiter.
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        Self {
            auth: SharedSecret::new(config.auth_token()),
            limiter: Arc::new(RateLimiter::per_minute(config.security.rate_limit_per_minute)),
            hub,
            config,
        }
    }
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Room to join.
    pub room: Option<String>,
    /// Display name.
    pub username: Option<String>,
    /// Shared secret.
    pub token: Option<String>,
}

/// Why a connection attempt was refused before the upgrade.
#[derive(Debug, Error)]
pub enum Rejection {
    /// The source exceeded its rate limit.
    #[error("Too Many Requests")]
    RateLimited,

    /// Missing or wrong shared secret.
    #[error("Unauthorized")]
    Unauthorized,

    /// The `Origin` header is not on the allow-list.
    #[error("Origin not allowed")]
    OriginNotAllowed,

    /// The room or username is not acceptable.
    #[error("{0}")]
    InvalidName(#[from] NameError),
}

impl Rejection {
    fn status(&self) -> StatusCode {
        match self {
            Rejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Rejection::Unauthorized => StatusCode::UNAUTHORIZED,
            Rejection::OriginNotAllowed => StatusCode::FORBIDDEN,
            Rejection::InvalidName(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Rejection::RateLimited => "rate_limited",
            Rejection::Unauthorized => "unauthorized",
            Rejection::OriginNotAllowed => "origin",
            Rejection::InvalidName(_) => "invalid_name",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        metrics::record_rejection(self.reason());
        (self.status(), self.to_string()).into_response()
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    // Layers wrap inside out: the rate limit runs before authentication.
    let mut app = Router::new()
        .route(&state.config.websocket_path, get(ws_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit,
        ))
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler));

    if let Some(dir) = &state.config.static_dir {
        let web_client = Router::new()
            .fallback_service(ServeDir::new(dir))
            .layer(axum_middleware::from_fn_with_state(
                Arc::clone(&state),
                rate_limit,
            ));
        app = app.merge(web_client);
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    serve(config, listener, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` completes.
///
/// The history store is built here and closed once the server has stopped.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = build_store(&config.store).await;
    let hub = HubHandle::spawn(config.hub_config(), Arc::clone(&store));
    let state = Arc::new(AppState::new(config, hub));
    let sweeper = state.limiter.spawn_sweeper();

    let addr = listener.local_addr()?;
    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.websocket_path
    );
    info!(
        auth_enabled = state.auth.is_enabled(),
        rate_limit = state.config.security.rate_limit_per_minute,
        allowed_origins = ?state.config.security.allowed_origins,
        store = store.name(),
        static_dir = ?state.config.static_dir,
        "Admission settings"
    );

    let app = build_app(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    sweeper.abort();
    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close history store");
    }
    info!("Huddle server stopped");

    result.context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Reject sources over their connection rate.
async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(request.headers(), peer);
    if !state.limiter.allow(&key) {
        warn!(source = %key, path = %request.uri().path(), "Rate limit exceeded");
        return Rejection::RateLimited.into_response();
    }
    next.run(request).await
}

/// Reject requests without the shared secret.
async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let token = Query::<ConnectParams>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(params)| params.token);

    if !state.auth.verify(token.as_deref(), request.headers()) {
        warn!(path = %request.uri().path(), "Unauthorized request");
        return Rejection::Unauthorized.into_response();
    }
    next.run(request).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    metrics::record_hub(&stats);
    Json(serde_json::json!({
        "status": "ok",
        "rooms": stats.rooms,
        "clients": stats.clients,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Serialize)]
struct RoomEntry {
    room: String,
    members: usize,
}

#[derive(Debug, Serialize)]
struct RoomsResponse {
    room_count: usize,
    rooms: Vec<RoomEntry>,
}

/// Live rooms and their sizes.
async fn rooms_handler(State(state): State<Arc<AppState>>) -> Json<RoomsResponse> {
    let rooms: Vec<RoomEntry> = state
        .hub
        .rooms()
        .into_iter()
        .map(|summary| RoomEntry {
            room: summary.room,
            members: summary.members,
        })
        .collect();

    Json(RoomsResponse {
        room_count: rooms.len(),
        rooms,
    })
}

fn name_or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, Rejection> {
    let origin = headers
        .get(header::ORIGIN)
        .map(|value| value.to_str().unwrap_or_default());
    if !state.config.is_origin_allowed(origin) {
        warn!(origin = ?origin, "Origin not allowed");
        return Err(Rejection::OriginNotAllowed);
    }

    let room = name_or_default(params.room, DEFAULT_ROOM);
    let username = name_or_default(params.username, DEFAULT_USERNAME);
    validate_room_name(&room)?;
    validate_username(&username)?;

    Ok(ws
        .max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| {
            handle_websocket(socket, state, room, username)
        }))
}

/// Run one room session over an upgraded socket.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    room: String,
    username: String,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    debug!(room = %room, username = %username, "WebSocket connected");

    let (reader, writer) = websocket::split(socket);
    let session = Session::new(
        state.hub.clone(),
        room,
        username,
        state.config.pump_settings(),
    );
    let stats = session.run(reader, writer).await;

    metrics::record_session(&stats);
    metrics::record_hub(&state.hub.stats());
}
