use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_types::api::{ChannelResponse, Claims, CreateChannelRequest, UserProfile};
use parley_types::events::GatewayEvent;

use crate::convert;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::is_admin;

const MAX_CHANNEL_NAME_LEN: usize = 80;
const MAX_DESCRIPTION_LEN: usize = 500;

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let channels = state.db(|db| db.list_channels()).await?;
    let channels: Vec<ChannelResponse> = channels
        .into_iter()
        .map(|(record, members)| convert::channel(record, members))
        .collect();
    Ok(Json(channels))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_CHANNEL_NAME_LEN {
        return Err(ApiError::bad_request("channel name must be 1-80 characters"));
    }
    if req.description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ApiError::bad_request("description must be at most 500 characters"));
    }

    let creator = claims.sub;
    let description = req.description;
    let record = state
        .db(move |db| db.create_channel(&name, &description, creator))
        .await?;

    info!("{} created channel #{} ({})", creator, record.name, record.id);

    let channel = convert::channel(record, 1);
    state.dispatcher.broadcast(GatewayEvent::ChannelCreate {
        channel: channel.clone(),
    });

    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (record, members) = state
        .db(move |db| {
            let record = db.get_channel(channel_id)?;
            let members = db.member_count(channel_id)?;
            Ok((record, members))
        })
        .await?;
    let record = record.ok_or_else(|| ApiError::not_found("channel not found"))?;
    Ok(Json(convert::channel(record, members)))
}

/// Only the creator or an admin may delete a channel.
pub async fn delete_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .db(move |db| db.get_channel(channel_id))
        .await?
        .ok_or_else(|| ApiError::not_found("channel not found"))?;

    if record.created_by != claims.sub && !is_admin(&state, claims.sub).await? {
        return Err(ApiError::forbidden("only the creator or an admin can delete a channel"));
    }

    if !state.db(move |db| db.delete_channel(channel_id)).await? {
        return Err(ApiError::not_found("channel not found"));
    }

    info!("{} deleted channel #{} ({})", claims.sub, record.name, channel_id);

    state.dispatcher.revoke_channel(channel_id, None).await;
    state
        .dispatcher
        .broadcast(GatewayEvent::ChannelDelete { channel_id });

    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let joined = state
        .db(move |db| db.add_member(channel_id, user_id))
        .await?;

    if joined {
        state
            .dispatcher
            .broadcast(GatewayEvent::MemberJoin { channel_id, user_id });
    }

    Ok(Json(serde_json::json!({ "joined": joined })))
}

pub async fn leave_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let left = state
        .db(move |db| db.remove_member(channel_id, user_id))
        .await?;

    if left {
        state
            .dispatcher
            .revoke_channel(channel_id, Some(user_id))
            .await;
        state
            .dispatcher
            .broadcast(GatewayEvent::MemberLeave { channel_id, user_id });
    }

    Ok(Json(serde_json::json!({ "left": left })))
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let members = state
        .db(move |db| {
            if db.get_channel(channel_id)?.is_none() {
                return Ok(None);
            }
            let mut users = Vec::new();
            for user_id in db.channel_members(channel_id)? {
                if let Some(user) = db.get_user(user_id)? {
                    users.push(user);
                }
            }
            Ok(Some(users))
        })
        .await?
        .ok_or_else(|| ApiError::not_found("channel not found"))?;

    let profiles: Vec<UserProfile> = members.iter().map(convert::profile).collect();
    Ok(Json(profiles))
}
