//! Process configuration read from the environment.

use std::time::Duration;

use thiserror::Error;

const DATABASE_URL_VARS: [&str; 4] = [
    "DATABASE_URL",
    "DATABASE_PUBLIC_URL",
    "POSTGRES_URL",
    "POSTGRES_PUBLIC_URL",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no database url configured (set one of {})", DATABASE_URL_VARS.join(", "))]
    MissingDatabaseUrl,
    #[error("required environment variable `{0}` is not set")]
    Missing(&'static str),
}

#[derive(Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub redis_url: String,
    pub pos_api_url: String,
    pub content_api_url: Option<String>,
    pub content_api_key: Option<String>,
    pub stores_api_url: String,
    pub stores_api_token: Option<String>,
    pub user_agent: String,
    pub sync_interval_minutes: u64,
    pub daily_sync_hour: u32,
    pub location_concurrency: usize,
    pub http_timeout_secs: u64,
    pub db_max_connections: u32,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));

        let database_url = DATABASE_URL_VARS
            .iter()
            .find_map(|&key| var(key))
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        Ok(Self {
            database_url,
            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            pos_api_url: required("POS_API_URL")?,
            content_api_url: var("CONTENT_API_URL"),
            content_api_key: var("CONTENT_API_KEY"),
            stores_api_url: required("STORES_API_URL")?,
            stores_api_token: var("STORES_API_TOKEN"),
            user_agent: var("SHELF_USER_AGENT").unwrap_or_else(|| "shelfsync/0.1".to_string()),
            sync_interval_minutes: var("SYNC_INTERVAL_MINUTES")
                .and_then(|v| v.parse().ok())
                .filter(|m| *m > 0)
                .unwrap_or(10),
            daily_sync_hour: var("DAILY_SYNC_HOUR")
                .and_then(|v| v.parse().ok())
                .filter(|h| *h < 24)
                .unwrap_or(5),
            location_concurrency: var("SYNC_LOCATION_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1),
            http_timeout_secs: var("HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            db_max_connections: var("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        })
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes * 60)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Content calls need both an endpoint and a key.
    pub fn content_api(&self) -> Option<(&str, &str)> {
        match (&self.content_api_url, &self.content_api_key) {
            (Some(url), Some(key)) => Some((url.as_str(), key.as_str())),
            _ => None,
        }
    }
}

// Credentials stay out of debug output.
impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field(
                "database_url",
                &shelf_storage::redact_database_url(&self.database_url),
            )
            .field("pos_api_url", &self.pos_api_url)
            .field("content_api_url", &self.content_api_url)
            .field("content_api_key", &self.content_api_key.as_ref().map(|_| "****"))
            .field("stores_api_url", &self.stores_api_url)
            .field("stores_api_token", &self.stores_api_token.as_ref().map(|_| "****"))
            .field("sync_interval_minutes", &self.sync_interval_minutes)
            .field("daily_sync_hour", &self.daily_sync_hour)
            .field("location_concurrency", &self.location_concurrency)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish_non_exhaustive()
    }
}
