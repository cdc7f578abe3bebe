//! Write-only cache layer backed by Redis.

use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("serializing cache entry `{key}`: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Locations,
    Inventory(String),
    Discounts(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Locations => f.write_str("locations"),
            CacheKey::Inventory(location_id) => write!(f, "inventory:{location_id}"),
            CacheKey::Discounts(location_id) => write!(f, "discounts:{location_id}"),
        }
    }
}

#[async_trait]
pub trait CacheWriter: Send + Sync {
    async fn write_entry(&self, key: &CacheKey, value: &JsonValue) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheWriter for RedisCache {
    async fn write_entry(&self, key: &CacheKey, value: &JsonValue) -> Result<(), CacheError> {
        let rendered_key = key.to_string();
        let payload = serde_json::to_string(value).map_err(|source| CacheError::Serialize {
            key: rendered_key.clone(),
            source,
        })?;
        let bytes = payload.len();
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&rendered_key, payload).await?;
        debug!(key = %rendered_key, bytes, "cache entry written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_location_and_entity() {
        assert_eq!(CacheKey::Locations.to_string(), "locations");
        assert_eq!(
            CacheKey::Inventory("loc-9".into()).to_string(),
            "inventory:loc-9"
        );
        assert_eq!(
            CacheKey::Discounts("loc-9".into()).to_string(),
            "discounts:loc-9"
        );
    }
}
