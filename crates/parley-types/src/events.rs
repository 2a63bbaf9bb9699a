use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ChannelResponse, MessageResponse};
use crate::models::Conversation;

/// Events pushed from the server over the WebSocket gateway.
///
/// Serialized adjacently tagged: `{"type": "MessageCreate", "data": {...}}`.
/// The `type` string is the topic clients subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid, display_name: String },

    /// A message was posted to a channel or a DM thread
    MessageCreate { message: MessageResponse },

    /// A user started typing in a channel
    TypingStart {
        channel_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        display_name: String,
        online: bool,
    },

    ReactionAdd {
        message_id: Uuid,
        conversation: Conversation,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemove {
        message_id: Uuid,
        conversation: Conversation,
        user_id: Uuid,
        emoji: String,
    },

    ChannelCreate { channel: ChannelResponse },

    ChannelDelete { channel_id: Uuid },

    MemberJoin { channel_id: Uuid, user_id: Uuid },

    MemberLeave { channel_id: Uuid, user_id: Uuid },
}

impl GatewayEvent {
    /// The `type` discriminator this event serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "Ready",
            Self::MessageCreate { .. } => "MessageCreate",
            Self::TypingStart { .. } => "TypingStart",
            Self::PresenceUpdate { .. } => "PresenceUpdate",
            Self::ReactionAdd { .. } => "ReactionAdd",
            Self::ReactionRemove { .. } => "ReactionRemove",
            Self::ChannelCreate { .. } => "ChannelCreate",
            Self::ChannelDelete { .. } => "ChannelDelete",
            Self::MemberJoin { .. } => "MemberJoin",
            Self::MemberLeave { .. } => "MemberLeave",
        }
    }

    /// Returns the channel_id if this event is scoped to a specific channel.
    /// Events that return `None` are either global or targeted at specific users.
    pub fn channel_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => message.conversation.channel_id(),
            Self::TypingStart { channel_id, .. } => Some(*channel_id),
            Self::ReactionAdd { conversation, .. } | Self::ReactionRemove { conversation, .. } => {
                conversation.channel_id()
            }
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Replace the set of channels whose scoped events this connection receives.
    /// The server drops ids the user is not a member of.
    Subscribe { channel_ids: Vec<Uuid> },

    /// Indicate typing in a channel
    StartTyping { channel_id: Uuid },
}
