//! Batch composition: location resolution, phase order and the single-batch lock.

use std::sync::Arc;

use shelf_adapters::{ContentApi, ContentDestination, LocationDirectory, PosApi};
use shelf_core::{BatchId, LocationConfig, StartupError};
use shelf_storage::{CacheWriter, RowStore};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::cache_refresh::CacheRefreshUnit;
use crate::orchestrator::{run_phase, BatchReport};
use crate::units::{BannerUnit, DiscountUnit, EntitySyncUnit, InventoryUnit, ProductDetailUnit};

/// Injected seams; the pipeline owns nothing global.
#[derive(Clone)]
pub struct PipelineDeps {
    pub directory: Arc<dyn LocationDirectory>,
    pub pos: Arc<dyn PosApi>,
    pub content: Arc<dyn ContentApi>,
    pub destination: Arc<dyn ContentDestination>,
    pub store: Arc<dyn RowStore>,
    pub cache: Arc<dyn CacheWriter>,
}

pub struct SyncPipeline {
    directory: Arc<dyn LocationDirectory>,
    inventory: InventoryUnit,
    product_details: ProductDetailUnit,
    discounts: DiscountUnit,
    banners: BannerUnit,
    cache_refresh: CacheRefreshUnit,
    concurrency: usize,
    locations: Mutex<Vec<LocationConfig>>,
    batch_lock: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(deps: PipelineDeps, concurrency: usize) -> Self {
        Self {
            directory: deps.directory,
            inventory: InventoryUnit::new(deps.pos.clone(), deps.store.clone()),
            product_details: ProductDetailUnit::new(deps.content.clone(), deps.store.clone()),
            discounts: DiscountUnit::new(deps.pos, deps.store.clone()),
            banners: BannerUnit::new(deps.content, deps.destination),
            cache_refresh: CacheRefreshUnit::new(deps.store, deps.cache),
            concurrency: concurrency.max(1),
            locations: Mutex::new(Vec::new()),
            batch_lock: Mutex::new(()),
        }
    }

    /// Startup resolution. Failure or an empty result is fatal for the process.
    pub async fn resolve_initial_locations(&self) -> Result<Vec<LocationConfig>, StartupError> {
        let resolved = self
            .directory
            .resolve_locations()
            .await
            .map_err(|e| StartupError::Discovery(e.to_string()))?;
        if resolved.is_empty() {
            return Err(StartupError::NoLocations);
        }
        info!(locations = resolved.len(), "resolved locations");
        *self.locations.lock().await = resolved.clone();
        Ok(resolved)
    }

    /// Re-resolves for a new batch, keeping the last good list on failure or empty result.
    pub async fn refresh_locations(&self) -> Vec<LocationConfig> {
        let mut current = self.locations.lock().await;
        match self.directory.resolve_locations().await {
            Ok(resolved) if !resolved.is_empty() => {
                if resolved.len() != current.len() {
                    info!(previous = current.len(), now = resolved.len(), "location set changed");
                }
                *current = resolved;
            }
            Ok(_) => warn!(kept = current.len(), "directory returned no locations; keeping last good list"),
            Err(err) => warn!(kept = current.len(), error = %err, "location refresh failed; keeping last good list"),
        }
        current.clone()
    }

    pub async fn current_locations(&self) -> Vec<LocationConfig> {
        self.locations.lock().await.clone()
    }

    /// Interval phases in order: inventory, enrichment, discounts, then the cache.
    pub async fn run_interval_batch(&self) -> BatchReport {
        let _guard = self.batch_lock.lock().await;
        self.interval_batch(None).await
    }

    pub async fn run_daily_batch(&self) -> BatchReport {
        let _guard = self.batch_lock.lock().await;
        self.daily_batch(None).await
    }

    /// Interval batch over an already resolved list; the directory is not consulted.
    pub async fn run_interval_batch_for(&self, locations: Vec<LocationConfig>) -> BatchReport {
        let _guard = self.batch_lock.lock().await;
        self.interval_batch(Some(locations)).await
    }

    pub async fn run_daily_batch_for(&self, locations: Vec<LocationConfig>) -> BatchReport {
        let _guard = self.batch_lock.lock().await;
        self.daily_batch(Some(locations)).await
    }

    /// Runs the interval batch unless another batch holds the lock.
    pub async fn try_run_interval_batch(&self) -> Option<BatchReport> {
        let Ok(_guard) = self.batch_lock.try_lock() else {
            info!("previous batch still running; skipping interval trigger");
            return None;
        };
        Some(self.interval_batch(None).await)
    }

    /// Runs the daily batch unless another batch holds the lock.
    pub async fn try_run_daily_batch(&self) -> Option<BatchReport> {
        let Ok(_guard) = self.batch_lock.try_lock() else {
            info!("batch in progress; daily run will retry on the next check");
            return None;
        };
        Some(self.daily_batch(None).await)
    }

    async fn batch_locations(&self, preset: Option<Vec<LocationConfig>>) -> Vec<LocationConfig> {
        match preset {
            Some(locations) => locations,
            None => self.refresh_locations().await,
        }
    }

    async fn interval_batch(&self, preset: Option<Vec<LocationConfig>>) -> BatchReport {
        let batch = BatchId::start();
        let span = info_span!("interval_batch", run_id = %batch.run_id);
        async {
            let locations = self.batch_locations(preset).await;
            let units: [&dyn EntitySyncUnit; 3] =
                [&self.inventory, &self.product_details, &self.discounts];
            let mut phases = Vec::with_capacity(units.len());
            for unit in units {
                phases.push(run_phase(unit, &locations, self.concurrency).await);
            }
            let cache = self.cache_refresh.refresh(&locations).await;
            let report = BatchReport {
                batch,
                locations: locations.len(),
                phases,
                cache: Some(cache),
            };
            info!(locations = report.locations, errored = report.errored(), "interval batch finished");
            report
        }
        .instrument(span)
        .await
    }

    async fn daily_batch(&self, preset: Option<Vec<LocationConfig>>) -> BatchReport {
        let batch = BatchId::start();
        let span = info_span!("daily_batch", run_id = %batch.run_id);
        async {
            let locations = self.batch_locations(preset).await;
            let phase = run_phase(&self.banners, &locations, self.concurrency).await;
            let report = BatchReport {
                batch,
                locations: locations.len(),
                phases: vec![phase],
                cache: None,
            };
            info!(locations = report.locations, errored = report.errored(), "daily batch finished");
            report
        }
        .instrument(span)
        .await
    }
}
