use std::sync::Arc;

use tracing::error;

use parley_db::Database;
use parley_gateway::Dispatcher;
use parley_types::events::GatewayEvent;
use parley_types::models::Conversation;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    /// Failed logins allowed before the account is locked.
    pub max_login_attempts: u32,
    /// Normalized emails that get the admin flag at registration.
    pub admin_emails: Vec<String>,
}

impl AppStateInner {
    /// Run a blocking store call off the async runtime.
    pub async fn db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> parley_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }

    /// Deliver an event about a conversation: broadcast for channels (the
    /// gateway filters by subscription), targeted for DM participants.
    pub async fn emit(&self, conversation: &Conversation, event: GatewayEvent) {
        match conversation {
            Conversation::Channel { .. } => self.dispatcher.broadcast(event),
            Conversation::Direct { thread } => {
                self.dispatcher
                    .send_to_users(&thread.participants(), event)
                    .await
            }
        }
    }
}
