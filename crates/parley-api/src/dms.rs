use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{Claims, DmPeer, SendMessageRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::{Conversation, DmThreadId};

use crate::convert;
use crate::error::ApiError;
use crate::messages::{MessageQuery, validate_content};
use crate::state::AppState;

/// Threads the current user takes part in, one entry per peer.
pub async fn list_dms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub;
    let peers = state
        .db(move |db| {
            let mut peers = Vec::new();
            for peer_id in db.dm_peers(me)? {
                let Some(user) = db.get_user(peer_id)? else { continue };
                let conversation = Conversation::Direct {
                    thread: DmThreadId::new(me, peer_id),
                };
                peers.push(DmPeer {
                    user: convert::profile(&user),
                    message_count: db.message_count(&conversation)?,
                });
            }
            Ok(peers)
        })
        .await?;

    Ok(Json(peers))
}

pub async fn get_dm_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = Conversation::Direct {
        thread: DmThreadId::new(claims.sub, peer_id),
    };
    let limit = query.page_size();
    let before = query.before;

    let messages = state
        .db(move |db| {
            if db.get_user(peer_id)?.is_none() {
                return Ok(Err(ApiError::not_found("user not found")));
            }
            let records = db.list_messages(&conversation, limit, before)?;
            convert::messages_with_names(db, records).map(Ok)
        })
        .await??;

    Ok(Json(messages))
}

pub async fn send_dm(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_content(&req.content)?;

    let sender_id = claims.sub;
    let conversation = Conversation::Direct {
        thread: DmThreadId::new(sender_id, peer_id),
    };

    let record = state
        .db(move |db| {
            if db.get_user(peer_id)?.is_none() {
                return Ok(Err(ApiError::not_found("user not found")));
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
