//! Store records -> API responses.

use std::collections::HashMap;

use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{ChannelRecord, MessageRecord, ReactionRecord, UserRecord};
use parley_types::api::{ChannelResponse, MessageResponse, ReactionGroup, UserProfile};

pub fn profile(user: &UserRecord) -> UserProfile {
    UserProfile {
        id: user.id,
        email: user.email.clone(),
        display_name: user.display_name.clone(),
        is_admin: user.is_admin,
        created_at: user.created_at,
    }
}

pub fn channel(record: ChannelRecord, member_count: usize) -> ChannelResponse {
    ChannelResponse {
        id: record.id,
        name: record.name,
        description: record.description,
        created_by: record.created_by,
        created_at: record.created_at,
        member_count,
    }
}

pub fn message(record: MessageRecord, sender_name: String) -> MessageResponse {
    MessageResponse {
        id: record.id,
        conversation: record.conversation,
        sender_id: record.sender_id,
        sender_name,
        reactions: group_reactions(&record.reactions),
        content: record.content,
        created_at: record.created_at,
    }
}

/// Group reactions by emoji, in order of each emoji's first use.
pub fn group_reactions(reactions: &[ReactionRecord]) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for r in reactions {
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(r.user_id);
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji.clone(),
                count: 1,
                user_ids: vec![r.user_id],
            }),
        }
    }
    groups
}

/// Attach sender display names to a page of messages, one lookup per distinct sender.
pub fn messages_with_names(
    db: &Database,
    records: Vec<MessageRecord>,
) -> parley_db::Result<Vec<MessageResponse>> {
    let mut names: HashMap<Uuid, String> = HashMap::new();
    for record in &records {
        if !names.contains_key(&record.sender_id) {
            let name = db
                .get_user(record.sender_id)?
                .map(|u| u.display_name)
                .unwrap_or_else(|| "unknown".to_string());
            names.insert(record.sender_id, name);
        }
    }

    Ok(records
        .into_iter()
        .map(|record| {
            let name = names.get(&record.sender_id).cloned().unwrap_or_default();
            message(record, name)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn reactions_group_in_first_use_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let reaction = |user_id, emoji: &str| ReactionRecord {
            user_id,
            emoji: emoji.to_string(),
            created_at: now,
        };

        let groups = group_reactions(&[
            reaction(a, "👍"),
            reaction(a, "🎉"),
            reaction(b, "👍"),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].emoji, "👍");
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].user_ids, vec![a, b]);
        assert_eq!(groups[1].emoji, "🎉");
    }
}
