use chrono::Utc;
use uuid::Uuid;

use crate::kv::{self, keys};
use crate::models::UserRecord;
use crate::{Database, Result, StoreError};

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Database {
    /// Create a user and claim its email in one transaction.
    /// Fails with `StoreError::Conflict` if the email is already registered.
    pub fn create_user(
        &self,
        email: &str,
        display_name: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<UserRecord> {
        let email = normalize_email(email);
        let now = Utc::now();
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: email.clone(),
            display_name: display_name.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            created_at: now,
            updated_at: now,
            login_attempts: 0,
        };

        self.with_tx(|conn| {
            if !kv::put_new(conn, &keys::user_email(&email), &user.id)? {
                return Err(StoreError::Conflict(format!("email {email}")));
            }
            kv::put(conn, &keys::user(user.id), &user)?;
            kv::set_add(conn, keys::USERS, &user.id.to_string())?;
            Ok(())
        })?;

        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>> {
        self.with_conn(|conn| kv::get(conn, &keys::user(id)))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let email = normalize_email(email);
        self.with_conn(|conn| {
            let Some(id) = kv::get::<Uuid>(conn, &keys::user_email(&email))? else {
                return Ok(None);
            };
            kv::get(conn, &keys::user(id))
        })
    }

    /// All users, oldest first.
    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        self.with_conn(|conn| {
            let mut users = Vec::new();
            for member in kv::set_members(conn, keys::USERS)? {
                let Ok(id) = member.parse::<Uuid>() else {
                    tracing::warn!("Skipping corrupt user id in index: {}", member);
                    continue;
                };
                if let Some(user) = kv::get::<UserRecord>(conn, &keys::user(id))? {
                    users.push(user);
                }
            }
            users.sort_by_key(|u| u.created_at);
            Ok(users)
        })
    }

    /// Increment the failed-login counter. Returns the new count.
    pub fn record_failed_login(&self, id: Uuid) -> Result<u32> {
        self.update_user(id, |user| user.login_attempts = user.login_attempts.saturating_add(1))
            .map(|user| user.login_attempts)
    }

    pub fn reset_login_attempts(&self, id: Uuid) -> Result<UserRecord> {
        self.update_user(id, |user| user.login_attempts = 0)
    }

    fn update_user<F>(&self, id: Uuid, f: F) -> Result<UserRecord>
    where
        F: FnOnce(&mut UserRecord),
    {
        self.with_tx(|conn| {
            let key = keys::user(id);
            let mut user: UserRecord =
                kv::get(conn, &key)?.ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
            f(&mut user);
            user.updated_at = Utc::now();
            kv::put(conn, &key, &user)?;
            Ok(user)
        })
    }
}
