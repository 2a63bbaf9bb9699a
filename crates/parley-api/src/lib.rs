pub mod auth;
pub mod channels;
pub mod convert;
pub mod dms;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod state;
pub mod users;

pub use error::ApiError;
pub use state::{AppState, AppStateInner, AuthSettings};

use axum::{
    Json, Router, middleware as axum_middleware,
    routing::{delete, get, post},
};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// All REST routes. The gateway upgrade route is added by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list_users))
        .route("/users/{user_id}/unlock", post(users::unlock_user))
        .route("/channels", get(channels::list_channels).post(channels::create_channel))
        .route(
            "/channels/{channel_id}",
            get(channels::get_channel).delete(channels::delete_channel),
        )
        .route("/channels/{channel_id}/join", post(channels::join_channel))
        .route("/channels/{channel_id}/leave", post(channels::leave_channel))
        .route("/channels/{channel_id}/members", get(channels::list_members))
        .route(
            "/channels/{channel_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/dms", get(dms::list_dms))
        .route(
            "/dms/{user_id}/messages",
            get(dms::get_dm_messages).post(dms::send_dm),
        )
        .route("/messages/{message_id}/reactions", post(reactions::add_reaction))
        .route(
            "/messages/{message_id}/reactions/{emoji}",
            delete(reactions::remove_reaction),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
