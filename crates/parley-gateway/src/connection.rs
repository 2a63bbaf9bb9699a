use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{BroadcastMessage, Dispatcher};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle an authenticated WebSocket connection. The JWT was validated at
/// the HTTP upgrade, so the loop starts with `Ready`.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    display_name: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", display_name, user_id);

    // Subscribed before Ready so nothing broadcast during the handshake is lost
    let broadcast_rx = dispatcher.subscribe();

    let ready = GatewayEvent::Ready {
        user_id,
        display_name: display_name.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Send users already online so the client starts with a full roster
    for (uid, name) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: uid,
            display_name: name,
            online: true,
        };
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    let (conn_id, user_rx) = dispatcher.connect(user_id, display_name.clone()).await;

    run_connection_loop(
        sender,
        receiver,
        broadcast_rx,
        user_rx,
        &dispatcher,
        db,
        conn_id,
        user_id,
        &display_name,
    )
    .await;

    dispatcher.disconnect(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", display_name, user_id);
}

#[allow(clippy::too_many_arguments)]
async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut broadcast_rx: tokio::sync::broadcast::Receiver<BroadcastMessage>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<Arc<str>>,
    dispatcher: &Dispatcher,
    db: Arc<Database>,
    conn_id: Uuid,
    user_id: Uuid,
    display_name: &str,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Forward broadcasts + targeted events -> client, with heartbeat
    let send_dispatcher = dispatcher.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if let Some(channel_id) = msg.channel_id {
                        if !send_dispatcher.is_subscribed(conn_id, channel_id).await {
                            continue;
                        }
                    }

                    if sender.send(Message::Text(msg.json.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(json) = result else { break };
                    if sender.send(Message::Text(json.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_name = display_name.to_string();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, &db, conn_id, user_id, &recv_name, cmd)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_name,
                            user_id,
                            e,
                            truncate(text.as_str(), 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conn_id: Uuid,
    user_id: Uuid,
    display_name: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Subscribe { channel_ids } => {
            let requested = channel_ids.len();
            let allowed = member_channels(db, user_id, channel_ids).await;
            info!(
                "{} ({}) subscribing to {} of {} requested channels",
                display_name,
                user_id,
                allowed.len(),
                requested
            );
            dispatcher.set_subscriptions(conn_id, allowed).await;
        }

        GatewayCommand::StartTyping { channel_id } => {
            if !dispatcher.is_subscribed(conn_id, channel_id).await {
                debug!("{} typing in unsubscribed channel {}", user_id, channel_id);
                return;
            }
            dispatcher.broadcast(GatewayEvent::TypingStart {
                channel_id,
                user_id,
                display_name: display_name.to_string(),
            });
        }
    }
}

/// Filter requested channels down to the ones the user belongs to.
async fn member_channels(
    db: &Arc<Database>,
    user_id: Uuid,
    channel_ids: Vec<Uuid>,
) -> HashSet<Uuid> {
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut allowed = HashSet::new();
        for channel_id in channel_ids {
            match db.is_member(channel_id, user_id) {
                Ok(true) => {
                    allowed.insert(channel_id);
                }
                Ok(false) => {}
                Err(e) => warn!("Membership lookup failed for {}: {}", channel_id, e),
            }
        }
        allowed
    })
    .await;

    result.unwrap_or_else(|e| {
        warn!("spawn_blocking join error: {}", e);
        HashSet::new()
    })
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|e| {
        warn!("Failed to encode {} event: {}", event.kind(), e);
    })?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 200), "short");
    }
}
