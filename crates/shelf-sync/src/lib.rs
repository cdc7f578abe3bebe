//! Sync pipeline: entity units, phase orchestration, cache refresh and scheduling.

pub mod cache_refresh;
pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod scheduler;
pub mod units;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use shelf_adapters::{ContentHttpClient, PosApi, PosHttpClient, StoreDirectoryClient};
use shelf_storage::{HttpClientConfig, HttpFetcher, PgRowStore, RedisCache};
use tracing::info;

pub use cache_refresh::{CacheRefreshReport, CacheRefreshUnit};
pub use config::{ConfigError, SyncConfig};
pub use orchestrator::{run_phase, BatchReport};
pub use pipeline::{PipelineDeps, SyncPipeline};
pub use scheduler::{BatchScheduler, DailyGate};
pub use units::{BannerUnit, DiscountUnit, EntitySyncUnit, InventoryUnit, ProductDetailUnit};

pub const CRATE_NAME: &str = "shelf-sync";

/// Process-lifetime handles. The store is kept separately so shutdown can close the pool.
pub struct Services {
    pub pipeline: Arc<SyncPipeline>,
    pub store: PgRowStore,
}

impl Services {
    pub async fn connect(config: &SyncConfig) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?);

        let store = PgRowStore::connect(&config.database_url, config.db_max_connections)
            .await
            .context("connecting to postgres")?;
        let cache = RedisCache::connect(&config.redis_url)
            .await
            .context("connecting to redis")?;

        let pos: Arc<dyn PosApi> = Arc::new(PosHttpClient::new(http.clone(), &config.pos_api_url));
        let content = match config.content_api() {
            Some((url, key)) => ContentHttpClient::new(http.clone(), url, Some(key.to_string())),
            None => {
                info!("content api not configured; banner and enrichment phases will skip");
                ContentHttpClient::new(http.clone(), "", None)
            }
        };
        let directory = Arc::new(StoreDirectoryClient::new(
            http,
            &config.stores_api_url,
            config.stores_api_token.clone(),
            pos.clone(),
        ));

        let deps = PipelineDeps {
            directory: directory.clone(),
            pos,
            content: Arc::new(content),
            destination: directory,
            store: Arc::new(store.clone()),
            cache: Arc::new(cache),
        };
        Ok(Self {
            pipeline: Arc::new(SyncPipeline::new(deps, config.location_concurrency)),
            store,
        })
    }

    pub async fn close(&self) {
        self.store.close().await;
        info!("postgres pool closed");
    }
}
