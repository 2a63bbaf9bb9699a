use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::MessageRecord;
use parley_types::api::{AddReactionRequest, Claims, ReactionResponse};
use parley_types::events::GatewayEvent;
use parley_types::models::Conversation;

use crate::error::ApiError;
use crate::state::AppState;

const MAX_EMOJI_LEN: usize = 32;

pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let emoji = validate_emoji(&req.emoji)?;
    let user_id = claims.sub;

    let stored = emoji.clone();
    let (message, added) = state
        .db(move |db| {
            if let Err(denied) = authorize(db, message_id, user_id)? {
                return Ok(Err(denied));
            }
            db.add_reaction(message_id, user_id, &stored).map(Ok)
        })
        .await??;

    if added {
        let conversation = message.conversation;
        state
            .emit(
                &conversation,
                GatewayEvent::ReactionAdd {
                    message_id,
                    conversation,
                    user_id,
                    emoji,
                },
            )
            .await;
    }

    Ok(Json(ReactionResponse { added }))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((message_id, emoji)): Path<(Uuid, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let emoji = validate_emoji(&emoji)?;
    let user_id = claims.sub;

    let stored = emoji.clone();
    let (message, removed) = state
        .db(move |db| {
            if let Err(denied) = authorize(db, message_id, user_id)? {
                return Ok(Err(denied));
            }
            db.remove_reaction(message_id, user_id, &stored).map(Ok)
        })
        .await??;

    if removed {
        let conversation = message.conversation;
        state
            .emit(
                &conversation,
                GatewayEvent::ReactionRemove {
                    message_id,
                    conversation,
                    user_id,
                    emoji,
                },
            )
            .await;
    }

    Ok(Json(serde_json::json!({ "removed": removed })))
}

fn validate_emoji(emoji: &str) -> Result<String, ApiError> {
    let emoji = emoji.trim();
    if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_LEN {
        return Err(ApiError::bad_request("emoji must be 1-32 characters"));
    }
    Ok(emoji.to_string())
}

/// A user may react to messages in channels they belong to and in their own DM threads.
fn authorize(
    db: &Database,
    message_id: Uuid,
    user_id: Uuid,
) -> parley_db::Result<Result<MessageRecord, ApiError>> {
    let Some(message) = db.get_message(message_id)? else {
        return Ok(Err(ApiError::not_found("message not found")));
    };

    let allowed = match message.conversation {
        Conversation::Channel { channel_id } => db.is_member(channel_id, user_id)?,
        Conversation::Direct { thread } => thread.contains(user_id),
    };

    if allowed {
        Ok(Ok(message))
    } else {
        Ok(Err(ApiError::forbidden("no access to this message")))
    }
}
