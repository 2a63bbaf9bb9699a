//! Key-value primitives over the `kv`, `kv_sets` and `kv_lists` tables.
//!
//! Every function takes a plain `&Connection` so the same calls work inside
//! `Database::with_conn` and `Database::with_tx`.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Result, StoreError};

/// Key layout. Values are JSON, set members and list entries are plain strings.
pub mod keys {
    use parley_types::models::{Conversation, DmThreadId};
    use uuid::Uuid;

    pub const USERS: &str = "users";
    pub const CHANNELS: &str = "channels";

    pub fn user(id: Uuid) -> String {
        format!("user:{id}")
    }

    pub fn user_email(email: &str) -> String {
        format!("user:email:{email}")
    }

    pub fn channel(id: Uuid) -> String {
        format!("channel:{id}")
    }

    pub fn channel_name(name: &str) -> String {
        format!("channel:name:{}", name.to_lowercase())
    }

    pub fn channel_members(id: Uuid) -> String {
        format!("channel:{id}:members")
    }

    pub fn channel_messages(id: Uuid) -> String {
        format!("channel:{id}:messages")
    }

    pub fn message(id: Uuid) -> String {
        format!("message:{id}")
    }

    pub fn dm_thread(thread: DmThreadId) -> String {
        format!("dm:{thread}")
    }

    pub fn dm_peers(user_id: Uuid) -> String {
        format!("dm:peers:{user_id}")
    }

    pub fn conversation_messages(conversation: &Conversation) -> String {
        match conversation {
            Conversation::Channel { channel_id } => channel_messages(*channel_id),
            Conversation::Direct { thread } => dm_thread(*thread),
        }
    }
}

// -- Values --

pub fn get<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;

    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })
    })
    .transpose()
}

/// Insert or overwrite.
pub fn put<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, raw],
    )?;
    Ok(())
}

/// Insert only if the key is absent. Returns false when the key already existed.
pub fn put_new<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<bool> {
    let raw = serde_json::to_string(value)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
        params![key, raw],
    )?;
    Ok(inserted == 1)
}

pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
    Ok(removed == 1)
}

// -- Sets --

pub fn set_add(conn: &Connection, key: &str, member: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?1, ?2)",
        params![key, member],
    )?;
    Ok(inserted == 1)
}

pub fn set_remove(conn: &Connection, key: &str, member: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM kv_sets WHERE key = ?1 AND member = ?2",
        params![key, member],
    )?;
    Ok(removed == 1)
}

pub fn set_contains(conn: &Connection, key: &str, member: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM kv_sets WHERE key = ?1 AND member = ?2",
            params![key, member],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn set_members(conn: &Connection, key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT member FROM kv_sets WHERE key = ?1 ORDER BY member")?;
    let members = stmt
        .query_map([key], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(members)
}

pub fn set_len(conn: &Connection, key: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM kv_sets WHERE key = ?1",
        [key],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

// -- Lists --

pub fn list_push(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_lists (key, seq, value)
         VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM kv_lists WHERE key = ?1), ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_last(conn: &Connection, key: &str) -> Result<Option<String>> {
    let last = conn
        .query_row(
            "SELECT value FROM kv_lists WHERE key = ?1 ORDER BY seq DESC LIMIT 1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(last)
}

/// All entries, newest first.
pub fn list_rev(conn: &Connection, key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT value FROM kv_lists WHERE key = ?1 ORDER BY seq DESC")?;
    let values = stmt
        .query_map([key], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(values)
}

/// Position of `value` in the list, if present.
pub fn list_seq(conn: &Connection, key: &str, value: &str) -> Result<Option<i64>> {
    let seq = conn
        .query_row(
            "SELECT seq FROM kv_lists WHERE key = ?1 AND value = ?2",
            params![key, value],
            |row| row.get(0),
        )
        .optional()?;
    Ok(seq)
}

/// Entries positioned before `before_seq` (all entries when `None`), newest first.
pub fn list_rev_before(conn: &Connection, key: &str, before_seq: Option<i64>) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT value FROM kv_lists WHERE key = ?1 AND (?2 IS NULL OR seq < ?2) ORDER BY seq DESC",
    )?;
    let values = stmt
        .query_map(params![key, before_seq], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(values)
}

pub fn list_len(conn: &Connection, key: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM kv_lists WHERE key = ?1",
        [key],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Drop every value, set member and list entry stored under `key`.
pub fn purge(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
    conn.execute("DELETE FROM kv_sets WHERE key = ?1", [key])?;
    conn.execute("DELETE FROM kv_lists WHERE key = ?1", [key])?;
    Ok(())
}
