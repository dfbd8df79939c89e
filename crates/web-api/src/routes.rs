use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Default, Deserialize)]
struct UpgradeQuery {
    token: Option<String>,
}

/// 构建路由；服务时需要使用 `into_make_service_with_connect_info::<SocketAddr>()`
pub fn router(state: AppState) -> Router {
    let ws_path = state.ws_path.clone();
    Router::new()
        .route("/health", get(health))
        .route(&ws_path, get(websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let hub = Arc::clone(&state.hub);

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !hub.config().origin_allowed(origin) {
        tracing::debug!(peer = %peer, origin = ?origin, "拒绝来源不被允许的升级请求");
        return Err(ApiError::forbidden());
    }

    let permit = hub
        .connection_limiter()
        .acquire(peer.ip())
        .map_err(|err| {
            tracing::debug!(peer = %peer, error = %err, "连接数超过上限");
            ApiError::from(err)
        })?;

    let identity =
        state
            .jwt_service
            .authenticate(&headers, query.token.as_deref(), &state.cookie_name)?;

    // 身份以存储中的资料为准
    let profile = hub.resolve_profile(identity.id).await.map_err(|err| {
        tracing::debug!(peer = %peer, user_id = %identity.id, error = %err, "握手阶段加载用户资料失败");
        ApiError::from(err)
    })?;

    let max_frame_bytes = hub.config().max_frame_bytes;
    Ok(ws
        .max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| async move {
            WebSocketConnection::open(hub, &profile, permit)
                .await
                .run(socket)
                .await;
        }))
}
