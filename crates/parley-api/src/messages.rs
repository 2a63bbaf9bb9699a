use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use parley_types::api::{Claims, SendMessageRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::Conversation;

use crate::convert;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_CONTENT_LEN: usize = 4000;
const MAX_PAGE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Cursor: id of the oldest message of the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> usize {
    50
}

impl MessageQuery {
    pub fn page_size(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE)
    }
}

pub fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() || content.chars().count() > MAX_CONTENT_LEN {
        return Err(ApiError::bad_request("message must be 1-4000 characters"));
    }
    Ok(())
}

/// Posting requires channel membership.
pub async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_content(&req.content)?;

    let sender_id = claims.sub;
    let conversation = Conversation::Channel { channel_id };
    let record = state
        .db(move |db| {
            if db.get_channel(channel_id)?.is_none() {
                return Ok(Err(ApiError::not_found("channel not found")));
            }
            if !db.is_member(channel_id, sender_id)? {
                return Ok(Err(ApiError::forbidden("join the channel before posting")));
            }
            db.post_message(conversation, sender_id, &req.content).map(Ok)
        })
        .await??;

    let message = convert::message(record, claims.display_name);
    state
        .emit(
            &conversation,
            GatewayEvent::MessageCreate {
                message: message.clone(),
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Reading requires channel membership.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let limit = query.page_size();
    let before = query.before;

    let messages = state
        .db(move |db| {
            if db.get_channel(channel_id)?.is_none() {
                return Ok(Err(ApiError::not_found("channel not found")));
            }
            if !db.is_member(channel_id, user_id)? {
                return Ok(Err(ApiError::forbidden("not a member of this channel")));
            }
            let records =
                db.list_messages(&Conversation::Channel { channel_id }, limit, before)?;
            convert::messages_with_names(db, records).map(Ok)
        })
        .await??;

    Ok(Json(messages))
}
