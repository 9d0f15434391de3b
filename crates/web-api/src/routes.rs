use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{header, HeaderValue, Method},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use domain::UserId;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct SocketQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    database: &'static str,
    uptime_secs: u64,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/socket", get(socket_upgrade))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = if state.hub.store().is_available() {
        "connected"
    } else {
        "disconnected"
    };

    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        database,
        uptime_secs: state.uptime().as_secs(),
    })
}

/// 握手时校验 `userId`，不合法直接拒绝，不升级连接
fn parse_handshake_user(raw: Option<&str>) -> Result<UserId, ApiError> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty()).ok_or_else(|| {
        tracing::warn!("握手缺少 userId，拒绝连接");
        ApiError::bad_request("userId is required")
    })?;

    raw.parse::<UserId>().map_err(|err| {
        tracing::warn!(user_id = %raw, error = %err, "握手 userId 无效，拒绝连接");
        ApiError::bad_request("userId must be a positive integer")
    })
}

async fn socket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = parse_handshake_user(query.user_id.as_deref())?;
    Ok(ws.on_upgrade(move |socket| ws_connection::serve(socket, state, user_id)))
}
