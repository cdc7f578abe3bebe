//! Core domain model for the Shelfsync location sync pipeline.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "shelf-core";

pub const ID_COLUMN: &str = "id";
pub const LOCATION_ID_COLUMN: &str = "location_id";
pub const SYNCED_AT_COLUMN: &str = "synced_at";

/// One upstream record as returned by a POS or content API, keyed by upstream field name.
pub type UpstreamRecord = Map<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Inventory,
    ProductDetail,
    Discount,
    Banner,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Inventory => "inventory",
            EntityKind::ProductDetail => "product_detail",
            EntityKind::Discount => "discount",
            EntityKind::Banner => "banner",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-location descriptor resolved from the location directory at the start of a batch.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub slug: Option<String>,
    pub pos_location_id: Option<String>,
    pub content_destination_id: Option<String>,
    pub banner_text: Option<String>,
}

impl LocationConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            api_key: api_key.into(),
            city: None,
            state: None,
            slug: None,
            pos_location_id: None,
            content_destination_id: None,
            banner_text: None,
        }
    }

    pub fn display_place(&self) -> String {
        match (self.city.as_deref(), self.state.as_deref()) {
            (Some(city), Some(state)) => format!("{city}, {state}"),
            (Some(city), None) => city.to_string(),
            (None, Some(state)) => state.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

// Keeps the POS credential out of logs.
impl fmt::Debug for LocationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .field("city", &self.city)
            .field("state", &self.state)
            .field("slug", &self.slug)
            .field("pos_location_id", &self.pos_location_id)
            .field("content_destination_id", &self.content_destination_id)
            .field("banner_text", &self.banner_text)
            .finish()
    }
}

/// Normalized column value. Structured upstream values arrive here already serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(String),
}

impl ColumnValue {
    /// Pass-through conversion for scalar upstream values. Arrays and objects are
    /// serialized rather than dropped.
    pub fn from_scalar(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => ColumnValue::Null,
            JsonValue::Bool(b) => ColumnValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => ColumnValue::Int(i),
                None => n.as_f64().map(ColumnValue::Float).unwrap_or(ColumnValue::Null),
            },
            JsonValue::String(s) => ColumnValue::Text(s.clone()),
            other => ColumnValue::Json(other.to_string()),
        }
    }

    /// Serialize a structured value for blob storage. Null stays null.
    pub fn blob(column: &str, value: &JsonValue) -> Result<Self, MappingError> {
        if value.is_null() {
            return Ok(ColumnValue::Null);
        }
        serde_json::to_string(value)
            .map(ColumnValue::Json)
            .map_err(|e| MappingError::Serialize {
                column: column.to_string(),
                message: e.to_string(),
            })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Canonical row handed from the mappers to the store. Column order is insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NormalizedRow {
    columns: Vec<(String, ColumnValue)>,
}

impl NormalizedRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, replacing an earlier value in place so ordering stays stable.
    pub fn set(&mut self, column: impl Into<String>, value: ColumnValue) {
        let column = column.into();
        if let Some(slot) = self.columns.iter_mut().find(|(name, _)| *name == column) {
            slot.1 = value;
        } else {
            self.columns.push((column, value));
        }
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn id(&self) -> Option<&str> {
        self.get(ID_COLUMN).and_then(ColumnValue::as_text)
    }

    pub fn location_id(&self) -> Option<&str> {
        self.get(LOCATION_ID_COLUMN).and_then(ColumnValue::as_text)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Conflict key shared by every destination table.
pub fn synthesize_row_id(location_id: &str, natural_id: &str) -> String {
    format!("{location_id}_{natural_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    BigInt,
    Numeric,
    Boolean,
    TimestampTz,
    Jsonb,
}

impl SqlType {
    pub fn cast(&self) -> &'static str {
        match self {
            SqlType::Text => "text",
            SqlType::BigInt => "bigint",
            SqlType::Numeric => "numeric",
            SqlType::Boolean => "boolean",
            SqlType::TimestampTz => "timestamptz",
            SqlType::Jsonb => "jsonb",
        }
    }
}

/// Static description of one destination table.
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub natural_id_column: &'static str,
    pub columns: &'static [(&'static str, SqlType)],
}

impl TableSpec {
    pub fn column_type(&self, column: &str) -> Option<SqlType> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, ty)| *ty)
    }

    /// Columns fixed at first insert and never overwritten on conflict.
    pub fn is_immutable(&self, column: &str) -> bool {
        column == ID_COLUMN || column == LOCATION_ID_COLUMN || column == self.natural_id_column
    }
}

pub static INVENTORY_TABLE: TableSpec = TableSpec {
    name: "inventory",
    natural_id_column: "inventory_id",
    columns: &[
        ("id", SqlType::Text),
        ("location_id", SqlType::Text),
        ("inventory_id", SqlType::Text),
        ("product_id", SqlType::Text),
        ("sku", SqlType::Text),
        ("product_name", SqlType::Text),
        ("description", SqlType::Text),
        ("category", SqlType::Text),
        ("master_category", SqlType::Text),
        ("image_url", SqlType::Text),
        ("quantity_available", SqlType::Numeric),
        ("quantity_units", SqlType::Text),
        ("unit_weight", SqlType::Numeric),
        ("unit_weight_unit", SqlType::Text),
        ("unit_price", SqlType::Numeric),
        ("med_unit_price", SqlType::Numeric),
        ("rec_unit_price", SqlType::Numeric),
        ("strain", SqlType::Text),
        ("strain_type", SqlType::Text),
        ("size", SqlType::Text),
        ("brand_id", SqlType::Text),
        ("brand_name", SqlType::Text),
        ("vendor", SqlType::Text),
        ("producer", SqlType::Text),
        ("batch_name", SqlType::Text),
        ("package_id", SqlType::Text),
        ("expiration_date", SqlType::TimestampTz),
        ("last_modified_date_utc", SqlType::TimestampTz),
        ("is_cannabis", SqlType::Boolean),
        ("lab_results", SqlType::Jsonb),
        ("tags", SqlType::Jsonb),
        ("is_active", SqlType::Boolean),
    ],
};

pub static PRODUCT_DETAILS_TABLE: TableSpec = TableSpec {
    name: "product_details",
    natural_id_column: "product_id",
    columns: &[
        ("id", SqlType::Text),
        ("location_id", SqlType::Text),
        ("product_id", SqlType::Text),
        ("name", SqlType::Text),
        ("description", SqlType::Text),
        ("image", SqlType::Text),
        ("brand_name", SqlType::Text),
        ("category", SqlType::Text),
        ("subcategory", SqlType::Text),
        ("strain_type", SqlType::Text),
        ("effects", SqlType::Jsonb),
        ("potency_thc", SqlType::Jsonb),
        ("potency_cbd", SqlType::Jsonb),
        ("slug", SqlType::Text),
    ],
};

pub static DISCOUNTS_TABLE: TableSpec = TableSpec {
    name: "discounts",
    natural_id_column: "discount_id",
    columns: &[
        ("id", SqlType::Text),
        ("location_id", SqlType::Text),
        ("discount_id", SqlType::Text),
        ("discount_name", SqlType::Text),
        ("discount_code", SqlType::Text),
        ("discount_type", SqlType::Text),
        ("discount_method", SqlType::Text),
        ("discount_amount", SqlType::Numeric),
        ("application_method", SqlType::Text),
        ("external_id", SqlType::Text),
        ("is_active", SqlType::Boolean),
        ("is_available_online", SqlType::Boolean),
        ("is_deleted", SqlType::Boolean),
        ("require_manager_approval", SqlType::Boolean),
        ("valid_from", SqlType::TimestampTz),
        ("valid_until", SqlType::TimestampTz),
        ("threshold_type", SqlType::Text),
        ("threshold_min", SqlType::Numeric),
        ("threshold_max", SqlType::Numeric),
        ("minimum_items_required", SqlType::BigInt),
        ("maximum_items_allowed", SqlType::BigInt),
        ("maximum_usage_count", SqlType::BigInt),
        ("include_non_cannabis", SqlType::Boolean),
        ("first_time_customer_only", SqlType::Boolean),
        ("stack_on_other_discounts", SqlType::Boolean),
        ("applies_to_locations", SqlType::Jsonb),
        ("weekly_recurrence_info", SqlType::Jsonb),
        ("products", SqlType::Jsonb),
        ("product_categories", SqlType::Jsonb),
        ("brands", SqlType::Jsonb),
        ("vendors", SqlType::Jsonb),
        ("strains", SqlType::Jsonb),
        ("tiers", SqlType::Jsonb),
        ("tags", SqlType::Jsonb),
        ("inventory_tags", SqlType::Jsonb),
        ("customer_types", SqlType::Jsonb),
        ("discount_groups", SqlType::Jsonb),
        ("constraints", SqlType::Jsonb),
        ("menu_display", SqlType::Jsonb),
    ],
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("record has no usable natural id `{field}`")]
    MissingNaturalId { field: &'static str },
    #[error("serializing `{column}` as a structured value: {message}")]
    Serialize { column: String, message: String },
    #[error("malformed `{field}`: {message}")]
    Malformed { field: &'static str, message: String },
}

/// The only error allowed to terminate the process.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("location discovery failed: {0}")]
    Discovery(String),
    #[error("no usable locations resolved")]
    NoLocations,
}

/// Outcome of one entity sync for one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub entity: EntityKind,
    pub location_id: String,
    pub synced: usize,
    pub skipped: usize,
    pub errored: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn new(entity: EntityKind, location_id: impl Into<String>) -> Self {
        Self {
            entity,
            location_id: location_id.into(),
            synced: 0,
            skipped: 0,
            errored: 0,
            duration_ms: 0,
            error: None,
        }
    }

    /// A location whose fetch failed outright: nothing synced, the location counts as errored.
    pub fn failed(entity: EntityKind, location_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            errored: 1,
            error: Some(error.to_string()),
            ..Self::new(entity, location_id)
        }
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn processed(&self) -> usize {
        self.synced + self.skipped + self.errored
    }
}

/// Aggregated outcome of one phase across every location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseReport {
    pub entity: EntityKind,
    pub synced: usize,
    pub skipped: usize,
    pub errored: usize,
    pub duration_ms: u64,
    pub results: Vec<SyncResult>,
}

impl PhaseReport {
    pub fn from_results(entity: EntityKind, results: Vec<SyncResult>, elapsed: Duration) -> Self {
        let (synced, skipped, errored) = results.iter().fold((0, 0, 0), |acc, r| {
            (acc.0 + r.synced, acc.1 + r.skipped, acc.2 + r.errored)
        });
        Self {
            entity,
            synced,
            skipped,
            errored,
            duration_ms: elapsed.as_millis().min(u64::MAX as u128) as u64,
            results,
        }
    }

    pub fn empty(entity: EntityKind) -> Self {
        Self::from_results(entity, Vec::new(), Duration::ZERO)
    }

    pub fn failed_locations(&self) -> impl Iterator<Item = &SyncResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

/// Identity of one batch run, carried on log spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchId {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl BatchId {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_set_replaces_in_place() {
        let mut row = NormalizedRow::new();
        row.set("id", ColumnValue::Text("loc_1".into()));
        row.set("name", ColumnValue::Text("a".into()));
        row.set("id", ColumnValue::Text("loc_2".into()));

        let names: Vec<_> = row.columns().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(row.id(), Some("loc_2"));
    }

    #[test]
    fn scalar_conversion_keeps_numbers_typed() {
        assert_eq!(ColumnValue::from_scalar(&json!(3)), ColumnValue::Int(3));
        assert_eq!(ColumnValue::from_scalar(&json!(2.5)), ColumnValue::Float(2.5));
        assert_eq!(ColumnValue::from_scalar(&json!("x")), ColumnValue::Text("x".into()));
        assert_eq!(ColumnValue::from_scalar(&json!(null)), ColumnValue::Null);
        assert_eq!(
            ColumnValue::from_scalar(&json!([1, 2])),
            ColumnValue::Json("[1,2]".into())
        );
    }

    #[test]
    fn blob_serializes_and_keeps_null() {
        let value = ColumnValue::blob("products", &json!({"ids": [1], "isExclusion": false}))
            .expect("blob");
        assert_eq!(value, ColumnValue::Json(r#"{"ids":[1],"isExclusion":false}"#.into()));
        assert!(ColumnValue::blob("products", &json!(null)).expect("null").is_null());
    }

    #[test]
    fn immutable_columns_cover_keys() {
        assert!(DISCOUNTS_TABLE.is_immutable("id"));
        assert!(DISCOUNTS_TABLE.is_immutable("location_id"));
        assert!(DISCOUNTS_TABLE.is_immutable("discount_id"));
        assert!(!DISCOUNTS_TABLE.is_immutable("discount_name"));
        assert_eq!(INVENTORY_TABLE.column_type("lab_results"), Some(SqlType::Jsonb));
    }

    #[test]
    fn phase_report_sums_results() {
        let mut a = SyncResult::new(EntityKind::Inventory, "a");
        a.synced = 3;
        a.skipped = 1;
        let b = SyncResult::failed(EntityKind::Inventory, "b", "connection refused");
        let report = PhaseReport::from_results(EntityKind::Inventory, vec![a, b], Duration::ZERO);
        assert_eq!((report.synced, report.skipped, report.errored), (3, 1, 1));
        assert_eq!(report.failed_locations().count(), 1);
    }

    #[test]
    fn location_debug_redacts_api_key() {
        let loc = LocationConfig::new("loc-1", "Main St", "secret-key");
        let rendered = format!("{loc:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
