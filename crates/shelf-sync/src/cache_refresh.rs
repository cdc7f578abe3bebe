//! Publishes the location directory and active per-location rows to the cache.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use shelf_core::LocationConfig;
use shelf_storage::{CacheKey, CacheWriter, RowStore};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheRefreshReport {
    pub total_inventory: usize,
    pub total_discounts: usize,
    pub failed_locations: usize,
    pub duration_ms: u64,
}

pub struct CacheRefreshUnit {
    store: Arc<dyn RowStore>,
    cache: Arc<dyn CacheWriter>,
}

impl CacheRefreshUnit {
    pub fn new(store: Arc<dyn RowStore>, cache: Arc<dyn CacheWriter>) -> Self {
        Self { store, cache }
    }

    pub async fn refresh(&self, locations: &[LocationConfig]) -> CacheRefreshReport {
        let started = Instant::now();
        let mut report = CacheRefreshReport::default();

        if let Err(err) = self
            .cache
            .write_entry(&CacheKey::Locations, &directory_entry(locations))
            .await
        {
            warn!(error = %err, "location directory cache write failed");
        }

        for location in locations {
            match self.refresh_location(location).await {
                Ok((inventory, discounts)) => {
                    report.total_inventory += inventory;
                    report.total_discounts += discounts;
                }
                Err(err) => {
                    report.failed_locations += 1;
                    warn!(location_id = %location.id, error = format!("{err:#}"), "cache refresh failed for location");
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis().min(u64::MAX as u128) as u64;
        info!(
            locations = locations.len(),
            inventory = report.total_inventory,
            discounts = report.total_discounts,
            failed = report.failed_locations,
            duration_ms = report.duration_ms,
            "cache refreshed"
        );
        report
    }

    async fn refresh_location(&self, location: &LocationConfig) -> Result<(usize, usize)> {
        let inventory = self
            .store
            .active_inventory(&location.id)
            .await
            .context("reading active inventory")?;
        let discounts = self
            .store
            .active_discounts(&location.id)
            .await
            .context("reading active discounts")?;

        let counts = (inventory.len(), discounts.len());
        self.cache
            .write_entry(
                &CacheKey::Inventory(location.id.clone()),
                &JsonValue::Array(inventory),
            )
            .await
            .context("writing inventory cache entry")?;
        self.cache
            .write_entry(
                &CacheKey::Discounts(location.id.clone()),
                &JsonValue::Array(discounts),
            )
            .await
            .context("writing discounts cache entry")?;
        Ok(counts)
    }
}

fn directory_entry(locations: &[LocationConfig]) -> JsonValue {
    JsonValue::Array(
        locations
            .iter()
            .map(|l| {
                json!({
                    "id": l.id,
                    "name": l.name,
                    "city": l.city,
                    "state": l.state,
                    "slug": l.slug,
                    "bannerText": l.banner_text,
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{location, MemoryCache, MemoryStore};
    use shelf_core::{ColumnValue, NormalizedRow, DISCOUNTS_TABLE, INVENTORY_TABLE};

    fn inventory_row(location_id: &str, natural: &str, name: &str, active: bool) -> NormalizedRow {
        let mut row = NormalizedRow::new();
        row.set("inventory_id", ColumnValue::Text(natural.into()));
        row.set("product_name", ColumnValue::Text(name.into()));
        row.set("is_active", ColumnValue::Bool(active));
        row.set("location_id", ColumnValue::Text(location_id.into()));
        row.set("id", ColumnValue::Text(format!("{location_id}_{natural}")));
        row
    }

    async fn seeded_store(store: MemoryStore) -> Arc<MemoryStore> {
        for row in [
            inventory_row("loc-a", "1", "Zkittlez", true),
            inventory_row("loc-a", "2", "Afghan Kush", true),
            inventory_row("loc-a", "3", "Sold Out", false),
            inventory_row("loc-b", "1", "Gelato", true),
        ] {
            store.upsert(&INVENTORY_TABLE, &row).await.expect("seed");
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn writes_directory_and_active_rows_per_location() {
        let store = seeded_store(MemoryStore::default()).await;
        let cache = Arc::new(MemoryCache::default());
        let unit = CacheRefreshUnit::new(store, cache.clone());
        let mut a = location("loc-a");
        a.banner_text = Some("Open late".into());

        let report = unit.refresh(&[a, location("loc-b")]).await;

        assert_eq!(report.total_inventory, 3);
        assert_eq!(report.total_discounts, 0);
        assert_eq!(report.failed_locations, 0);

        let directory = cache.entry("locations").expect("directory");
        assert_eq!(directory[0]["bannerText"], "Open late");
        assert!(directory[0].get("apiKey").is_none());

        let inventory = cache.entry("inventory:loc-a").expect("inventory entry");
        let names: Vec<_> = inventory
            .as_array()
            .expect("array")
            .iter()
            .map(|row| row["product_name"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["Afghan Kush", "Zkittlez"]);
        assert_eq!(cache.entry("discounts:loc-b"), Some(json!([])));
    }

    fn discount_row(natural: &str, name: &str, valid_until: Option<&str>) -> NormalizedRow {
        let mut row = NormalizedRow::new();
        row.set("discount_id", ColumnValue::Text(natural.into()));
        row.set("discount_name", ColumnValue::Text(name.into()));
        row.set("is_active", ColumnValue::Bool(true));
        row.set(
            "valid_until",
            valid_until.map_or(ColumnValue::Null, |v| ColumnValue::Text(v.into())),
        );
        row.set("location_id", ColumnValue::Text("loc-a".into()));
        row.set("id", ColumnValue::Text(format!("loc-a_{natural}")));
        row
    }

    #[tokio::test]
    async fn expired_discounts_are_not_republished() {
        let store = MemoryStore::default();
        for row in [
            discount_row("1", "Spring Sale", Some("2000-01-01T00:00:00Z")),
            discount_row("2", "Happy Hour", Some("2999-12-31T23:59:59Z")),
            discount_row("3", "Loyalty", None),
        ] {
            store.upsert(&DISCOUNTS_TABLE, &row).await.expect("seed");
        }
        let cache = Arc::new(MemoryCache::default());
        let unit = CacheRefreshUnit::new(Arc::new(store), cache.clone());

        let report = unit.refresh(&[location("loc-a")]).await;

        assert_eq!(report.total_discounts, 2);
        let discounts = cache.entry("discounts:loc-a").expect("discounts entry");
        let names: Vec<_> = discounts
            .as_array()
            .expect("array")
            .iter()
            .map(|row| row["discount_name"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["Happy Hour", "Loyalty"]);
    }

    #[tokio::test]
    async fn one_failing_location_contributes_zero() {
        let store = seeded_store(MemoryStore::default().failing_reads_for("loc-a")).await;
        let cache = Arc::new(MemoryCache::default());
        let unit = CacheRefreshUnit::new(store, cache.clone());

        let report = unit.refresh(&[location("loc-a"), location("loc-b")]).await;

        assert_eq!(report.total_inventory, 1);
        assert_eq!(report.failed_locations, 1);
        assert!(cache.entry("inventory:loc-a").is_none());
        assert!(cache.entry("inventory:loc-b").is_some());
    }

    #[tokio::test]
    async fn directory_write_failure_does_not_block_location_entries() {
        let store = seeded_store(MemoryStore::default()).await;
        let cache = Arc::new(MemoryCache::default().failing_on("locations"));
        let unit = CacheRefreshUnit::new(store, cache.clone());

        let report = unit.refresh(&[location("loc-b")]).await;

        assert_eq!(report.total_inventory, 1);
        assert_eq!(
            cache.keys(),
            vec!["discounts:loc-b".to_string(), "inventory:loc-b".to_string()]
        );
    }
}
