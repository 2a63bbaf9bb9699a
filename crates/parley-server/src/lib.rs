//! HTTP application assembly: the REST router plus the `/gateway` upgrade.
pub mod config;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use parley_api::middleware::{decode_token, token_from_headers};
use parley_api::{ApiError, AppState};
use parley_gateway::connection;

pub fn app(state: AppState) -> Router {
    let gateway_route = Router::new()
        .route("/gateway", get(gateway_upgrade))
        .with_state(state.clone());

    parley_api::router(state)
        .merge(gateway_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also arrive as `?token=`.
async fn gateway_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .or_else(|| token_from_headers(&headers))
        .ok_or(ApiError::Unauthorized)?;
    let claims = decode_token(&state.auth.jwt_secret, &token)?;
    debug!("Gateway upgrade for {}", claims.sub);

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, db, claims.sub, claims.display_name)
    }))
}
