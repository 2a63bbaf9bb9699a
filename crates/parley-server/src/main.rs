use std::sync::Arc;

use tracing::info;

use parley_api::{AppState, AppStateInner, AuthSettings};
use parley_gateway::Dispatcher;
use parley_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let db = parley_db::Database::open(&config.db_path)?;
    info!("Opened database at {}", config.db_path.display());

    let state: AppState = Arc::new(AppStateInner {
        db: Arc::new(db),
        dispatcher: Dispatcher::new(),
        auth: AuthSettings {
            jwt_secret: config.jwt_secret.clone(),
            token_ttl: chrono::Duration::days(config.token_ttl_days),
            max_login_attempts: config.max_login_attempts,
            admin_emails: config.admin_emails.clone(),
        },
    });

    let app = parley_server::app(state);

    let addr = config.addr()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
