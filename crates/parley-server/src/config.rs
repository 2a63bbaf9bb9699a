use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::warn;

use parley_db::users::normalize_email;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Server settings, read from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub max_login_attempts: u32,
    pub admin_emails: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = match lookup("PARLEY_JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("PARLEY_JWT_SECRET not set, using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let admin_emails = var("PARLEY_ADMIN_EMAILS", "")
            .split(',')
            .map(normalize_email)
            .filter(|email| !email.is_empty())
            .collect();

        Ok(Self {
            host: var("PARLEY_HOST", "0.0.0.0"),
            port: parse("PARLEY_PORT", &var("PARLEY_PORT", "3000"))?,
            db_path: PathBuf::from(var("PARLEY_DB_PATH", "parley.db")),
            jwt_secret,
            token_ttl_days: parse("PARLEY_TOKEN_TTL_DAYS", &var("PARLEY_TOKEN_TTL_DAYS", "30"))?,
            max_login_attempts: parse(
                "PARLEY_MAX_LOGIN_ATTEMPTS",
                &var("PARLEY_MAX_LOGIN_ATTEMPTS", "5"),
            )?,
            admin_emails,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {key}: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(config.token_ttl_days, 30);
        assert_eq!(config.max_login_attempts, 5);
        assert!(config.admin_emails.is_empty());
    }

    #[test]
    fn overrides_and_admin_list() {
        let config = config(&[
            ("PARLEY_PORT", "8080"),
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_ADMIN_EMAILS", " Root@Example.com, ,ops@example.com"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.admin_emails, vec!["root@example.com", "ops@example.com"]);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = config(&[("PARLEY_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PARLEY_PORT"));
    }
}
