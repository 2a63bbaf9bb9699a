use chrono::Utc;
use uuid::Uuid;

use crate::kv::{self, keys};
use crate::models::ChannelRecord;
use crate::{Database, Result, StoreError};

impl Database {
    /// Create a channel with its creator as the first member.
    /// Channel names are unique, compared case-insensitively.
    pub fn create_channel(
        &self,
        name: &str,
        description: &str,
        created_by: Uuid,
    ) -> Result<ChannelRecord> {
        let channel = ChannelRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            created_by,
            created_at: Utc::now(),
        };

        self.with_tx(|conn| {
            if !kv::put_new(conn, &keys::channel_name(name), &channel.id)? {
                return Err(StoreError::Conflict(format!("channel #{name}")));
            }
            kv::put(conn, &keys::channel(channel.id), &channel)?;
            kv::set_add(conn, keys::CHANNELS, &channel.id.to_string())?;
            kv::set_add(conn, &keys::channel_members(channel.id), &created_by.to_string())?;
            Ok(())
        })?;

        Ok(channel)
    }

    pub fn get_channel(&self, id: Uuid) -> Result<Option<ChannelRecord>> {
        self.with_conn(|conn| kv::get(conn, &keys::channel(id)))
    }

    /// All channels with their member counts, oldest first.
    pub fn list_channels(&self) -> Result<Vec<(ChannelRecord, usize)>> {
        self.with_conn(|conn| {
            let mut channels = Vec::new();
            for member in kv::set_members(conn, keys::CHANNELS)? {
                let Ok(id) = member.parse::<Uuid>() else {
                    tracing::warn!("Skipping corrupt channel id in index: {}", member);
                    continue;
                };
                if let Some(channel) = kv::get::<ChannelRecord>(conn, &keys::channel(id))? {
                    let members = kv::set_len(conn, &keys::channel_members(id))?;
                    channels.push((channel, members));
                }
            }
            channels.sort_by_key(|(c, _)| c.created_at);
            Ok(channels)
        })
    }

    /// Delete a channel together with its members, message list and messages.
    /// Returns false if the channel did not exist.
    pub fn delete_channel(&self, id: Uuid) -> Result<bool> {
        self.with_tx(|conn| {
            let Some(channel) = kv::get::<ChannelRecord>(conn, &keys::channel(id))? else {
                return Ok(false);
            };

            let list_key = keys::channel_messages(id);
            for message_id in kv::list_rev(conn, &list_key)? {
                if let Ok(message_id) = message_id.parse() {
                    kv::delete(conn, &keys::message(message_id))?;
                }
            }
            kv::purge(conn, &list_key)?;
            kv::purge(conn, &keys::channel_members(id))?;
            kv::delete(conn, &keys::channel_name(&channel.name))?;
            kv::delete(conn, &keys::channel(id))?;
            kv::set_remove(conn, keys::CHANNELS, &id.to_string())?;
            Ok(true)
        })
    }

    /// Add a member. Returns false if the user was already a member.
    pub fn add_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_tx(|conn| {
            ensure_channel(conn, channel_id)?;
            kv::set_add(conn, &keys::channel_members(channel_id), &user_id.to_string())
        })
    }

    /// Remove a member. Returns false if the user was not a member.
    pub fn remove_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_tx(|conn| {
            ensure_channel(conn, channel_id)?;
            kv::set_remove(conn, &keys::channel_members(channel_id), &user_id.to_string())
        })
    }

    pub fn is_member(&self, channel_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            kv::set_contains(conn, &keys::channel_members(channel_id), &user_id.to_string())
        })
    }

    pub fn channel_members(&self, channel_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            Ok(kv::set_members(conn, &keys::channel_members(channel_id))?
                .iter()
                .filter_map(|m| m.parse().ok())
                .collect())
        })
    }

    pub fn member_count(&self, channel_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| kv::set_len(conn, &keys::channel_members(channel_id)))
    }
}

fn ensure_channel(conn: &rusqlite::Connection, channel_id: Uuid) -> Result<()> {
    kv::get::<ChannelRecord>(conn, &keys::channel(channel_id))?
        .map(|_| ())
        .ok_or_else(|| StoreError::NotFound(format!("channel {channel_id}")))
}
