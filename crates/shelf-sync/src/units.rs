//! Per-entity sync units: fetch, filter, map and upsert one location's collection.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use shelf_adapters::{
    map_inventory, map_product_detail, sanitize_banner, ContentApi, ContentDestination,
    DiscountPayload, PosApi,
};
use shelf_core::{
    EntityKind, LocationConfig, MappingError, NormalizedRow, SyncResult, TableSpec,
    DISCOUNTS_TABLE, INVENTORY_TABLE, PRODUCT_DETAILS_TABLE,
};
use shelf_storage::RowStore;
use tracing::{debug, info, warn};

/// One entity's sync for one location.
///
/// Fetch failures come back as a failed [`SyncResult`]; an `Err` is reserved for failures
/// the unit did not anticipate, and the orchestrator counts those against the location.
#[async_trait]
pub trait EntitySyncUnit: Send + Sync {
    fn entity(&self) -> EntityKind;

    async fn sync(&self, location: &LocationConfig) -> Result<SyncResult>;
}

async fn persist(
    store: &dyn RowStore,
    table: &'static TableSpec,
    mapped: Result<NormalizedRow, MappingError>,
    result: &mut SyncResult,
) {
    let row = match mapped {
        Ok(row) => row,
        Err(err) => {
            result.errored += 1;
            debug!(table = table.name, location_id = %result.location_id, error = %err, "record failed to map");
            return;
        }
    };
    match store.upsert(table, &row).await {
        Ok(()) => result.synced += 1,
        Err(err) => {
            result.errored += 1;
            warn!(table = table.name, id = row.id(), error = %err, "row write failed");
        }
    }
}

fn log_result(result: &SyncResult) {
    info!(
        entity = %result.entity,
        location_id = %result.location_id,
        synced = result.synced,
        skipped = result.skipped,
        errored = result.errored,
        duration_ms = result.duration_ms,
        "entity sync finished"
    );
}

pub struct InventoryUnit {
    pos: Arc<dyn PosApi>,
    store: Arc<dyn RowStore>,
}

impl InventoryUnit {
    pub fn new(pos: Arc<dyn PosApi>, store: Arc<dyn RowStore>) -> Self {
        Self { pos, store }
    }
}

#[async_trait]
impl EntitySyncUnit for InventoryUnit {
    fn entity(&self) -> EntityKind {
        EntityKind::Inventory
    }

    async fn sync(&self, location: &LocationConfig) -> Result<SyncResult> {
        let started = Instant::now();
        let records = match self.pos.fetch_inventory(location).await {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    location_id = %location.id,
                    auth_rejected = err.is_auth_failure(),
                    error = %err,
                    "inventory fetch failed"
                );
                return Ok(SyncResult::failed(self.entity(), &location.id, err)
                    .with_duration(started.elapsed()));
            }
        };

        let mut result = SyncResult::new(self.entity(), &location.id);
        for record in &records {
            let mapped = map_inventory(record, &location.id);
            persist(self.store.as_ref(), &INVENTORY_TABLE, mapped, &mut result).await;
        }
        let result = result.with_duration(started.elapsed());
        log_result(&result);
        Ok(result)
    }
}

pub struct DiscountUnit {
    pos: Arc<dyn PosApi>,
    store: Arc<dyn RowStore>,
}

impl DiscountUnit {
    pub fn new(pos: Arc<dyn PosApi>, store: Arc<dyn RowStore>) -> Self {
        Self { pos, store }
    }
}

#[async_trait]
impl EntitySyncUnit for DiscountUnit {
    fn entity(&self) -> EntityKind {
        EntityKind::Discount
    }

    async fn sync(&self, location: &LocationConfig) -> Result<SyncResult> {
        let started = Instant::now();
        let records = match self.pos.fetch_discounts(location).await {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    location_id = %location.id,
                    auth_rejected = err.is_auth_failure(),
                    error = %err,
                    "discount fetch failed"
                );
                return Ok(SyncResult::failed(self.entity(), &location.id, err)
                    .with_duration(started.elapsed()));
            }
        };

        let mut result = SyncResult::new(self.entity(), &location.id);
        for record in &records {
            let payload = match DiscountPayload::decode(record) {
                Ok(payload) => payload,
                Err(err) => {
                    persist(self.store.as_ref(), &DISCOUNTS_TABLE, Err(err), &mut result).await;
                    continue;
                }
            };
            if let Some(reason) = payload.exclusion_reason() {
                result.skipped += 1;
                debug!(
                    location_id = %location.id,
                    schema = payload.schema().as_str(),
                    reason,
                    "discount excluded"
                );
                continue;
            }
            let mapped = payload.map(&location.id);
            persist(self.store.as_ref(), &DISCOUNTS_TABLE, mapped, &mut result).await;
        }
        let result = result.with_duration(started.elapsed());
        log_result(&result);
        Ok(result)
    }
}

/// Menu product enrichment from the content API into `product_details`.
pub struct ProductDetailUnit {
    content: Arc<dyn ContentApi>,
    store: Arc<dyn RowStore>,
}

impl ProductDetailUnit {
    pub fn new(content: Arc<dyn ContentApi>, store: Arc<dyn RowStore>) -> Self {
        Self { content, store }
    }
}

#[async_trait]
impl EntitySyncUnit for ProductDetailUnit {
    fn entity(&self) -> EntityKind {
        EntityKind::ProductDetail
    }

    async fn sync(&self, location: &LocationConfig) -> Result<SyncResult> {
        let started = Instant::now();
        let mut result = SyncResult::new(self.entity(), &location.id);
        if !self.content.is_configured() {
            result.skipped += 1;
            return Ok(result.with_duration(started.elapsed()));
        }

        let records = match self.content.fetch_menu_products(&location.id).await {
            Ok(records) => records,
            Err(err) => {
                warn!(location_id = %location.id, error = %err, "menu product fetch failed");
                return Ok(SyncResult::failed(self.entity(), &location.id, err)
                    .with_duration(started.elapsed()));
            }
        };
        for record in &records {
            let mapped = map_product_detail(record, &location.id);
            persist(self.store.as_ref(), &PRODUCT_DETAILS_TABLE, mapped, &mut result).await;
        }
        let result = result.with_duration(started.elapsed());
        log_result(&result);
        Ok(result)
    }
}

/// Daily banner refresh: content API markup, sanitized, written to the content destination.
pub struct BannerUnit {
    content: Arc<dyn ContentApi>,
    destination: Arc<dyn ContentDestination>,
}

impl BannerUnit {
    pub fn new(content: Arc<dyn ContentApi>, destination: Arc<dyn ContentDestination>) -> Self {
        Self {
            content,
            destination,
        }
    }
}

#[async_trait]
impl EntitySyncUnit for BannerUnit {
    fn entity(&self) -> EntityKind {
        EntityKind::Banner
    }

    async fn sync(&self, location: &LocationConfig) -> Result<SyncResult> {
        let started = Instant::now();
        let mut result = SyncResult::new(self.entity(), &location.id);
        let destination_id = match location.content_destination_id.as_deref() {
            Some(id) if self.content.is_configured() => id,
            _ => {
                result.skipped += 1;
                return Ok(result.with_duration(started.elapsed()));
            }
        };

        let markup = match self.content.fetch_banner_markup(&location.id).await {
            Ok(markup) => markup,
            Err(err) => {
                warn!(location_id = %location.id, error = %err, "banner fetch failed");
                return Ok(SyncResult::failed(self.entity(), &location.id, err)
                    .with_duration(started.elapsed()));
            }
        };
        let text = markup.as_deref().and_then(sanitize_banner);

        match self
            .destination
            .write_banner_text(destination_id, text.as_deref())
            .await
        {
            Ok(()) => {
                result.synced += 1;
                info!(
                    location_id = %location.id,
                    banner = text.as_deref().unwrap_or("<cleared>"),
                    "banner updated"
                );
            }
            Err(err) => {
                warn!(location_id = %location.id, error = %err, "banner write failed");
                result.errored += 1;
                result.error = Some(err.to_string());
            }
        }
        Ok(result.with_duration(started.elapsed()))
    }
}
