//! In-memory fakes for the upstream, store and cache seams.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use shelf_adapters::{
    AdapterError, ContentApi, ContentDestination, LocationDirectory, PosApi, PosIdentity,
};
use shelf_core::{ColumnValue, LocationConfig, NormalizedRow, TableSpec, UpstreamRecord};
use shelf_storage::{CacheError, CacheKey, CacheWriter, RowStore, StoreError};

pub fn location(id: &str) -> LocationConfig {
    LocationConfig::new(id, format!("Store {id}"), format!("key-{id}"))
}

fn records(values: &[JsonValue]) -> Vec<UpstreamRecord> {
    values
        .iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
}

type Canned = HashMap<String, Result<Vec<JsonValue>, String>>;

fn canned(map: &Canned, location_id: &str) -> Result<Vec<UpstreamRecord>, AdapterError> {
    match map.get(location_id) {
        Some(Ok(values)) => Ok(records(values)),
        Some(Err(message)) => Err(AdapterError::Message(message.clone())),
        None => Ok(Vec::new()),
    }
}

#[derive(Default)]
pub struct FakePos {
    inventory: Canned,
    discounts: Canned,
    panic_for: Option<String>,
}

impl FakePos {
    pub fn with_inventory(mut self, location_id: &str, values: Vec<JsonValue>) -> Self {
        self.inventory.insert(location_id.to_string(), Ok(values));
        self
    }

    pub fn with_inventory_failure(mut self, location_id: &str, message: &str) -> Self {
        self.inventory
            .insert(location_id.to_string(), Err(message.to_string()));
        self
    }

    pub fn with_discounts(mut self, location_id: &str, values: Vec<JsonValue>) -> Self {
        self.discounts.insert(location_id.to_string(), Ok(values));
        self
    }

    pub fn panicking_for(mut self, location_id: &str) -> Self {
        self.panic_for = Some(location_id.to_string());
        self
    }
}

#[async_trait]
impl PosApi for FakePos {
    async fn fetch_inventory(
        &self,
        location: &LocationConfig,
    ) -> Result<Vec<UpstreamRecord>, AdapterError> {
        if self.panic_for.as_deref() == Some(location.id.as_str()) {
            panic!("inventory payload for {} blew up", location.id);
        }
        canned(&self.inventory, &location.id)
    }

    async fn fetch_discounts(
        &self,
        location: &LocationConfig,
    ) -> Result<Vec<UpstreamRecord>, AdapterError> {
        canned(&self.discounts, &location.id)
    }

    async fn whoami(&self, _api_key: &str) -> Result<PosIdentity, AdapterError> {
        Ok(PosIdentity::default())
    }
}

pub struct FakeContent {
    configured: bool,
    banners: HashMap<String, String>,
    products: HashMap<String, Vec<JsonValue>>,
}

impl Default for FakeContent {
    fn default() -> Self {
        Self {
            configured: true,
            banners: HashMap::new(),
            products: HashMap::new(),
        }
    }
}

impl FakeContent {
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::default()
        }
    }

    pub fn with_banner(mut self, location_id: &str, markup: &str) -> Self {
        self.banners
            .insert(location_id.to_string(), markup.to_string());
        self
    }

    pub fn with_products(mut self, location_id: &str, values: Vec<JsonValue>) -> Self {
        self.products.insert(location_id.to_string(), values);
        self
    }
}

#[async_trait]
impl ContentApi for FakeContent {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn fetch_banner_markup(&self, retailer_id: &str) -> Result<Option<String>, AdapterError> {
        Ok(self.banners.get(retailer_id).cloned())
    }

    async fn fetch_menu_products(
        &self,
        retailer_id: &str,
    ) -> Result<Vec<UpstreamRecord>, AdapterError> {
        Ok(self
            .products
            .get(retailer_id)
            .map(|values| records(values))
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeDestination {
    writes: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeDestination {
    pub fn writes(&self) -> Vec<(String, Option<String>)> {
        self.writes.lock().expect("writes lock").clone()
    }
}

#[async_trait]
impl ContentDestination for FakeDestination {
    async fn write_banner_text(
        &self,
        destination_id: &str,
        text: Option<&str>,
    ) -> Result<(), AdapterError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push((destination_id.to_string(), text.map(str::to_string)));
        Ok(())
    }
}

/// Hands out queued directory responses; an empty queue is a discovery failure.
#[derive(Default)]
pub struct FakeDirectory {
    responses: Mutex<VecDeque<Result<Vec<LocationConfig>, String>>>,
    calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn then(self, response: Result<Vec<LocationConfig>, &str>) -> Self {
        self.responses
            .lock()
            .expect("directory lock")
            .push_back(response.map_err(str::to_string));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationDirectory for FakeDirectory {
    async fn resolve_locations(&self) -> Result<Vec<LocationConfig>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().expect("directory lock").pop_front();
        match next {
            Some(Ok(locations)) => Ok(locations),
            Some(Err(message)) => Err(AdapterError::Message(message)),
            None => Err(AdapterError::Message("directory unavailable".into())),
        }
    }
}

/// Null or missing `valid_until` never expires.
fn unexpired(row: &NormalizedRow, now: DateTime<Utc>) -> bool {
    match row.get("valid_until").and_then(ColumnValue::as_text) {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|until| until.with_timezone(&Utc) > now)
            .unwrap_or(true),
        None => true,
    }
}

/// Row store with upsert-by-id semantics keyed on `(table, id)`.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<(String, String), NormalizedRow>>,
    failing_ids: HashSet<String>,
    failing_reads: HashSet<String>,
    upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn failing_on(mut self, id: &str) -> Self {
        self.failing_ids.insert(id.to_string());
        self
    }

    pub fn failing_reads_for(mut self, location_id: &str) -> Self {
        self.failing_reads.insert(location_id.to_string());
        self
    }

    pub fn row(&self, table: &str, id: &str) -> Option<NormalizedRow> {
        self.rows
            .lock()
            .expect("rows lock")
            .get(&(table.to_string(), id.to_string()))
            .cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows
            .lock()
            .expect("rows lock")
            .keys()
            .filter(|(t, _)| t == table)
            .count()
    }

    pub fn snapshot(&self) -> BTreeMap<(String, String), NormalizedRow> {
        self.rows.lock().expect("rows lock").clone()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn active_rows(
        &self,
        table: &str,
        location_id: &str,
        order_by: &str,
        keep: impl Fn(&NormalizedRow) -> bool,
    ) -> Vec<JsonValue> {
        let rows = self.rows.lock().expect("rows lock");
        let mut active: Vec<&NormalizedRow> = rows
            .iter()
            .filter(|((t, _), row)| {
                t == table
                    && row.location_id() == Some(location_id)
                    && row.get("is_active").and_then(ColumnValue::as_bool) == Some(true)
                    && keep(row)
            })
            .map(|(_, row)| row)
            .collect();
        active.sort_by_key(|row| {
            row.get(order_by)
                .and_then(ColumnValue::as_text)
                .unwrap_or_default()
                .to_string()
        });
        active
            .into_iter()
            .map(|row| {
                let object: Map<String, JsonValue> = row
                    .columns()
                    .map(|(name, value)| {
                        (
                            name.to_string(),
                            serde_json::to_value(value).unwrap_or(JsonValue::Null),
                        )
                    })
                    .collect();
                JsonValue::Object(object)
            })
            .collect()
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn upsert(&self, table: &'static TableSpec, row: &NormalizedRow) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let Some(id) = row.id() else {
            return Err(StoreError::MissingId { table: table.name });
        };
        if self.failing_ids.contains(id) {
            return Err(StoreError::MissingId { table: table.name });
        }
        let mut rows = self.rows.lock().expect("rows lock");
        let key = (table.name.to_string(), id.to_string());
        match rows.get_mut(&key) {
            Some(existing) => {
                for (column, value) in row.columns() {
                    if !table.is_immutable(column) {
                        existing.set(column, value.clone());
                    }
                }
            }
            None => {
                rows.insert(key, row.clone());
            }
        }
        Ok(())
    }

    async fn active_inventory(&self, location_id: &str) -> Result<Vec<JsonValue>, StoreError> {
        if self.failing_reads.contains(location_id) {
            return Err(StoreError::MissingId { table: "inventory" });
        }
        Ok(self.active_rows("inventory", location_id, "product_name", |_| true))
    }

    async fn active_discounts(&self, location_id: &str) -> Result<Vec<JsonValue>, StoreError> {
        if self.failing_reads.contains(location_id) {
            return Err(StoreError::MissingId { table: "discounts" });
        }
        let now = Utc::now();
        Ok(self.active_rows("discounts", location_id, "discount_name", |row| {
            unexpired(row, now)
        }))
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, JsonValue>>,
    failing_keys: HashSet<String>,
}

impl MemoryCache {
    pub fn failing_on(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    pub fn entry(&self, key: &str) -> Option<JsonValue> {
        self.entries.lock().expect("cache lock").get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().expect("cache lock").keys().cloned().collect()
    }
}

#[async_trait]
impl CacheWriter for MemoryCache {
    async fn write_entry(&self, key: &CacheKey, value: &JsonValue) -> Result<(), CacheError> {
        let key = key.to_string();
        if self.failing_keys.contains(&key) {
            let source = serde_json::from_str::<JsonValue>("{").unwrap_err();
            return Err(CacheError::Serialize { key, source });
        }
        self.entries
            .lock()
            .expect("cache lock")
            .insert(key, value.clone());
        Ok(())
    }
}
