use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_types::api::{Claims, UserProfile};

use crate::convert;
use crate::error::ApiError;
use crate::state::{AppState, AppStateInner};

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.db(|db| db.list_users()).await?;
    let profiles: Vec<UserProfile> = users.iter().map(convert::profile).collect();
    Ok(Json(profiles))
}

/// Admin only: clear a user's failed-login counter.
pub async fn unlock_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, claims.sub).await?;

    let user = state.db(move |db| db.reset_login_attempts(user_id)).await?;
    info!("{} unlocked account {}", claims.sub, user.id);
    Ok(Json(convert::profile(&user)))
}

pub async fn is_admin(state: &AppStateInner, user_id: Uuid) -> Result<bool, ApiError> {
    let user = state.db(move |db| db.get_user(user_id)).await?;
    Ok(user.is_some_and(|u| u.is_admin))
}

async fn require_admin(state: &AppStateInner, user_id: Uuid) -> Result<(), ApiError> {
    if is_admin(state, user_id).await? {
        Ok(())
    } else {
        Err(ApiError::forbidden("admin only"))
    }
}
