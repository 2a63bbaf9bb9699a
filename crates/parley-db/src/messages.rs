use chrono::Utc;
use parley_types::models::Conversation;
use rusqlite::Connection;
use uuid::Uuid;

use crate::kv::{self, keys};
use crate::models::{MessageRecord, ReactionRecord};
use crate::{Database, Result, StoreError};

impl Database {
    /// Append a message to a conversation.
    ///
    /// `created_at` is assigned inside the transaction and never earlier than the
    /// previous message of the same conversation, so list order and timestamp
    /// order agree even if the wall clock steps backwards.
    pub fn post_message(
        &self,
        conversation: Conversation,
        sender_id: Uuid,
        content: &str,
    ) -> Result<MessageRecord> {
        self.with_tx(|conn| {
            let list_key = keys::conversation_messages(&conversation);

            let mut created_at = Utc::now();
            if let Some(previous) = last_message(conn, &list_key)? {
                created_at = created_at.max(previous.created_at);
            }

            let message = MessageRecord {
                id: Uuid::new_v4(),
                conversation,
                sender_id,
                content: content.to_string(),
                created_at,
                reactions: Vec::new(),
            };

            kv::put(conn, &keys::message(message.id), &message)?;
            kv::list_push(conn, &list_key, &message.id.to_string())?;

            if let Conversation::Direct { thread } = conversation {
                let [a, b] = thread.participants();
                kv::set_add(conn, &keys::dm_peers(a), &b.to_string())?;
                kv::set_add(conn, &keys::dm_peers(b), &a.to_string())?;
            }

            Ok(message)
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRecord>> {
        self.with_conn(|conn| kv::get(conn, &keys::message(id)))
    }

    /// A page of messages, newest first. With `before`, the page starts just
    /// below that message in list order, so messages sharing a timestamp are
    /// never skipped.
    pub fn list_messages(
        &self,
        conversation: &Conversation,
        limit: usize,
        before: Option<Uuid>,
    ) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            let list_key = keys::conversation_messages(conversation);
            let before_seq = match before {
                Some(cursor) => Some(
                    kv::list_seq(conn, &list_key, &cursor.to_string())?
                        .ok_or_else(|| StoreError::NotFound(format!("message {cursor}")))?,
                ),
                None => None,
            };

            let mut page = Vec::with_capacity(limit.min(256));
            for id in kv::list_rev_before(conn, &list_key, before_seq)? {
                if page.len() >= limit {
                    break;
                }
                if let Some(message) = load_listed(conn, &id)? {
                    page.push(message);
                }
            }
            Ok(page)
        })
    }

    pub fn message_count(&self, conversation: &Conversation) -> Result<usize> {
        self.with_conn(|conn| kv::list_len(conn, &keys::conversation_messages(conversation)))
    }

    /// Users this user has a DM thread with.
    pub fn dm_peers(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            Ok(kv::set_members(conn, &keys::dm_peers(user_id))?
                .iter()
                .filter_map(|m| m.parse().ok())
                .collect())
        })
    }

    // -- Reactions --

    /// Append a reaction. A user reacting twice with the same emoji is a no-op.
    /// Returns the updated message and whether a reaction was added.
    pub fn add_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(MessageRecord, bool)> {
        self.update_message(message_id, |message| {
            let exists = message
                .reactions
                .iter()
                .any(|r| r.user_id == user_id && r.emoji == emoji);
            if exists {
                return false;
            }
            message.reactions.push(ReactionRecord {
                user_id,
                emoji: emoji.to_string(),
                created_at: Utc::now(),
            });
            true
        })
    }

    /// Remove the user's reaction. Returns the updated message and whether anything was removed.
    pub fn remove_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(MessageRecord, bool)> {
        self.update_message(message_id, |message| {
            let before = message.reactions.len();
            message
                .reactions
                .retain(|r| !(r.user_id == user_id && r.emoji == emoji));
            message.reactions.len() != before
        })
    }

    fn update_message<F>(&self, message_id: Uuid, f: F) -> Result<(MessageRecord, bool)>
    where
        F: FnOnce(&mut MessageRecord) -> bool,
    {
        self.with_tx(|conn| {
            let key = keys::message(message_id);
            let mut message: MessageRecord = kv::get(conn, &key)?
                .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
            let changed = f(&mut message);
            if changed {
                kv::put(conn, &key, &message)?;
            }
            Ok((message, changed))
        })
    }
}

fn last_message(conn: &Connection, list_key: &str) -> Result<Option<MessageRecord>> {
    match kv::list_last(conn, list_key)? {
        Some(id) => load_listed(conn, &id),
        None => Ok(None),
    }
}

fn load_listed(conn: &Connection, id: &str) -> Result<Option<MessageRecord>> {
    let Ok(id) = id.parse::<Uuid>() else {
        tracing::warn!("Skipping corrupt message id in list: {}", id);
        return Ok(None);
    };
    kv::get(conn, &keys::message(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::models::DmThreadId;

    fn channel() -> Conversation {
        Conversation::Channel {
            channel_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn messages_are_returned_newest_first_with_nondecreasing_timestamps() {
        let db = Database::open_in_memory().unwrap();
        let conversation = channel();
        let sender = Uuid::new_v4();

        for i in 0..5 {
            db.post_message(conversation, sender, &format!("m{i}")).unwrap();
        }

        let page = db.list_messages(&conversation, 10, None).unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2", "m1", "m0"]);
        assert!(page.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[test]
    fn before_cursor_and_limit_page_backwards() {
        let db = Database::open_in_memory().unwrap();
        let conversation = channel();
        let sender = Uuid::new_v4();

        let first = db.post_message(conversation, sender, "old").unwrap();
        let second = db.post_message(conversation, sender, "new").unwrap();

        let page = db.list_messages(&conversation, 10, Some(second.id)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first.id);

        let latest = db.list_messages(&conversation, 1, None).unwrap();
        assert_eq!(latest[0].id, second.id);

        let err = db
            .list_messages(&conversation, 10, Some(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn paging_reaches_messages_with_tied_timestamps() {
        let db = Database::open_in_memory().unwrap();
        let conversation = channel();
        let sender = Uuid::new_v4();

        let older = db.post_message(conversation, sender, "older").unwrap();
        let mut newer = db.post_message(conversation, sender, "newer").unwrap();
        newer.created_at = older.created_at;
        db.with_conn(|conn| kv::put(conn, &keys::message(newer.id), &newer))
            .unwrap();

        let first_page = db.list_messages(&conversation, 1, None).unwrap();
        assert_eq!(first_page[0].content, "newer");

        let cursor = first_page[0].id;
        let second_page = db.list_messages(&conversation, 1, Some(cursor)).unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].content, "older");

        let rest = db.list_messages(&conversation, 1, Some(older.id)).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn direct_messages_register_peers_both_ways() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let thread = DmThreadId::new(a, b);

        db.post_message(Conversation::Direct { thread }, b, "hi").unwrap();

        assert_eq!(db.dm_peers(a).unwrap(), vec![b]);
        assert_eq!(db.dm_peers(b).unwrap(), vec![a]);
        assert_eq!(
            db.message_count(&Conversation::Direct {
                thread: DmThreadId::new(b, a)
            })
            .unwrap(),
            1
        );
    }

    #[test]
    fn reactions_append_once_per_user_and_emoji() {
        let db = Database::open_in_memory().unwrap();
        let sender = Uuid::new_v4();
        let message = db.post_message(channel(), sender, "react to me").unwrap();

        let (_, added) = db.add_reaction(message.id, sender, "🎉").unwrap();
        assert!(added);
        let (updated, added) = db.add_reaction(message.id, sender, "🎉").unwrap();
        assert!(!added);
        assert_eq!(updated.reactions.len(), 1);

        let (updated, removed) = db.remove_reaction(message.id, sender, "🎉").unwrap();
        assert!(removed);
        assert!(updated.reactions.is_empty());

        let err = db.add_reaction(Uuid::new_v4(), sender, "🎉").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
