//! Field mappers: upstream record shapes into normalized rows.
//!
//! Every mapper works from an explicit allow-list. Upstream fields not on the list are
//! dropped, so new upstream fields never reach the store unannounced. The discount entity
//! has two live upstream schemas; both land on the same canonical column set.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use shelf_core::{
    synthesize_row_id, ColumnValue, MappingError, NormalizedRow, UpstreamRecord, ID_COLUMN,
    LOCATION_ID_COLUMN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMap {
    pub upstream: &'static str,
    pub column: &'static str,
    pub blob: bool,
}

const fn scalar(upstream: &'static str, column: &'static str) -> FieldMap {
    FieldMap {
        upstream,
        column,
        blob: false,
    }
}

const fn blob(upstream: &'static str, column: &'static str) -> FieldMap {
    FieldMap {
        upstream,
        column,
        blob: true,
    }
}

pub const INVENTORY_FIELDS: &[FieldMap] = &[
    scalar("inventoryId", "inventory_id"),
    scalar("productId", "product_id"),
    scalar("sku", "sku"),
    scalar("productName", "product_name"),
    scalar("description", "description"),
    scalar("category", "category"),
    scalar("masterCategory", "master_category"),
    scalar("imageUrl", "image_url"),
    scalar("quantityAvailable", "quantity_available"),
    scalar("quantityUnits", "quantity_units"),
    scalar("unitWeight", "unit_weight"),
    scalar("unitWeightUnit", "unit_weight_unit"),
    scalar("unitPrice", "unit_price"),
    scalar("medUnitPrice", "med_unit_price"),
    scalar("recUnitPrice", "rec_unit_price"),
    scalar("strain", "strain"),
    scalar("strainType", "strain_type"),
    scalar("size", "size"),
    scalar("brandId", "brand_id"),
    scalar("brandName", "brand_name"),
    scalar("vendor", "vendor"),
    scalar("producer", "producer"),
    scalar("batchName", "batch_name"),
    scalar("packageId", "package_id"),
    scalar("expirationDate", "expiration_date"),
    scalar("lastModifiedDateUtc", "last_modified_date_utc"),
    scalar("isCannabis", "is_cannabis"),
    blob("labResults", "lab_results"),
    blob("tags", "tags"),
];

pub const PRODUCT_DETAIL_FIELDS: &[FieldMap] = &[
    scalar("id", "product_id"),
    scalar("name", "name"),
    scalar("description", "description"),
    scalar("image", "image"),
    scalar("category", "category"),
    scalar("subcategory", "subcategory"),
    scalar("strainType", "strain_type"),
    blob("effects", "effects"),
    blob("potencyThc", "potency_thc"),
    blob("potencyCbd", "potency_cbd"),
    scalar("slug", "slug"),
];

pub const DISCOUNT_V1_FIELDS: &[FieldMap] = &[
    scalar("discountId", "discount_id"),
    scalar("discountName", "discount_name"),
    scalar("discountCode", "discount_code"),
    scalar("discountType", "discount_type"),
    scalar("discountMethod", "discount_method"),
    scalar("discountAmount", "discount_amount"),
    scalar("applicationMethod", "application_method"),
    scalar("externalId", "external_id"),
    scalar("isActive", "is_active"),
    scalar("isAvailableOnline", "is_available_online"),
    scalar("isDeleted", "is_deleted"),
    scalar("requireManagerApproval", "require_manager_approval"),
    scalar("validFrom", "valid_from"),
    scalar("validUntil", "valid_until"),
    scalar("thresholdType", "threshold_type"),
    scalar("minimumItemsRequired", "minimum_items_required"),
    scalar("maximumItemsAllowed", "maximum_items_allowed"),
    scalar("maximumUsageCount", "maximum_usage_count"),
    scalar("includeNonCannabis", "include_non_cannabis"),
    scalar("firstTimeCustomerOnly", "first_time_customer_only"),
    scalar("stackOnOtherDiscounts", "stack_on_other_discounts"),
    blob("appliesToLocations", "applies_to_locations"),
    blob("weeklyRecurrenceInfo", "weekly_recurrence_info"),
    blob("products", "products"),
    blob("productCategories", "product_categories"),
    blob("brands", "brands"),
    blob("vendors", "vendors"),
    blob("strains", "strains"),
    blob("tiers", "tiers"),
    blob("tags", "tags"),
    blob("inventoryTags", "inventory_tags"),
    blob("customerTypes", "customer_types"),
    blob("discountGroups", "discount_groups"),
];

/// Top-level v2 fields that already match canonical columns. Nested reward data,
/// restrictions and the recurrence schedule are reshaped separately.
pub const DISCOUNT_V2_FIELDS: &[FieldMap] = &[
    scalar("discountId", "discount_id"),
    scalar("discountName", "discount_name"),
    scalar("discountCode", "discount_code"),
    scalar("discountType", "discount_type"),
    scalar("applicationMethod", "application_method"),
    scalar("externalId", "external_id"),
    scalar("isActive", "is_active"),
    scalar("isDeleted", "is_deleted"),
    scalar("requireManagerApproval", "require_manager_approval"),
    scalar("validFrom", "valid_from"),
    scalar("validUntil", "valid_until"),
    scalar("maximumUsageCount", "maximum_usage_count"),
    scalar("includeNonCannabis", "include_non_cannabis"),
    scalar("firstTimeCustomerOnly", "first_time_customer_only"),
    scalar("stackOnOtherDiscounts", "stack_on_other_discounts"),
    blob("appliesToLocations", "applies_to_locations"),
    blob("constraints", "constraints"),
    blob("menuDisplay", "menu_display"),
];

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const RECURRENCE_TIME_FIELDS: [&str; 2] = ["startTime", "endTime"];

/// v2 restriction kinds and the canonical column each one lands in.
const RESTRICTION_COLUMNS: [(&str, &str); 3] = [
    ("Product", "products"),
    ("Brand", "brands"),
    ("Category", "product_categories"),
];

const ONLINE_APPLICATION_METHODS: [&str; 2] = ["Automatic", "Code"];

fn natural_id(record: &UpstreamRecord, field: &'static str) -> Result<String, MappingError> {
    match record.get(field) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        _ => Err(MappingError::MissingNaturalId { field }),
    }
}

fn apply_allow_list(
    record: &UpstreamRecord,
    fields: &[FieldMap],
    row: &mut NormalizedRow,
) -> Result<(), MappingError> {
    for field in fields {
        let Some(value) = record.get(field.upstream) else {
            continue;
        };
        let mapped = if field.blob {
            ColumnValue::blob(field.column, value)?
        } else {
            ColumnValue::from_scalar(value)
        };
        row.set(field.column, mapped);
    }
    Ok(())
}

fn stamp_keys(row: &mut NormalizedRow, location_id: &str, natural_column: &str, natural: &str) {
    row.set(natural_column, ColumnValue::Text(natural.to_string()));
    row.set(LOCATION_ID_COLUMN, ColumnValue::Text(location_id.to_string()));
    row.set(ID_COLUMN, ColumnValue::Text(synthesize_row_id(location_id, natural)));
}

pub fn map_inventory(record: &UpstreamRecord, location_id: &str) -> Result<NormalizedRow, MappingError> {
    let natural = natural_id(record, "inventoryId")?;
    let mut row = NormalizedRow::new();
    apply_allow_list(record, INVENTORY_FIELDS, &mut row)?;

    // Out-of-stock lines stay in the table but drop out of the published cache.
    let in_stock = record
        .get("quantityAvailable")
        .and_then(JsonValue::as_f64)
        .map_or(true, |qty| qty > 0.0);
    row.set("is_active", ColumnValue::Bool(in_stock));

    stamp_keys(&mut row, location_id, "inventory_id", &natural);
    Ok(row)
}

pub fn map_product_detail(
    record: &UpstreamRecord,
    location_id: &str,
) -> Result<NormalizedRow, MappingError> {
    let natural = natural_id(record, "id")?;
    let mut row = NormalizedRow::new();
    apply_allow_list(record, PRODUCT_DETAIL_FIELDS, &mut row)?;
    if let Some(brand) = record.get("brand").and_then(|b| b.get("name")) {
        row.set("brand_name", ColumnValue::from_scalar(brand));
    }
    stamp_keys(&mut row, location_id, "product_id", &natural);
    Ok(row)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountSchema {
    V1,
    V2,
}

impl DiscountSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountSchema::V1 => "v1",
            DiscountSchema::V2 => "v2",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestrictionV2 {
    #[serde(alias = "ids")]
    pub restriction_ids: Option<Vec<JsonValue>>,
    pub is_exclusion: Option<bool>,
}

impl RestrictionV2 {
    fn canonical(&self) -> JsonValue {
        json!({
            "ids": self.restriction_ids.clone().unwrap_or_default(),
            "isExclusion": self.is_exclusion.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RewardV2 {
    pub discount_amount: Option<JsonValue>,
    pub calculation_method: Option<JsonValue>,
    pub threshold_type: Option<JsonValue>,
    pub threshold_min: Option<JsonValue>,
    pub threshold_max: Option<JsonValue>,
    pub restrictions: Option<BTreeMap<String, RestrictionV2>>,
}

/// A discount record after schema detection.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscountPayload<'a> {
    /// Flat schema: canonical names at the top level.
    V1(&'a UpstreamRecord),
    /// Nested schema: reward, restrictions, menu display and weekday flags.
    V2 {
        record: &'a UpstreamRecord,
        reward: RewardV2,
    },
}

impl<'a> DiscountPayload<'a> {
    /// A record is v2 when it carries a nested `reward` or `menuDisplay` object.
    pub fn decode(record: &'a UpstreamRecord) -> Result<Self, MappingError> {
        let nested = |key: &str| record.get(key).is_some_and(JsonValue::is_object);
        if !nested("reward") && !nested("menuDisplay") {
            return Ok(DiscountPayload::V1(record));
        }
        let reward = match record.get("reward") {
            Some(value) if !value.is_null() => {
                RewardV2::deserialize(value).map_err(|e| MappingError::Malformed {
                    field: "reward",
                    message: e.to_string(),
                })?
            }
            _ => RewardV2::default(),
        };
        Ok(DiscountPayload::V2 { record, reward })
    }

    pub fn schema(&self) -> DiscountSchema {
        match self {
            DiscountPayload::V1(_) => DiscountSchema::V1,
            DiscountPayload::V2 { .. } => DiscountSchema::V2,
        }
    }

    pub fn record(&self) -> &'a UpstreamRecord {
        match self {
            DiscountPayload::V1(record) => record,
            DiscountPayload::V2 { record, .. } => record,
        }
    }

    /// Inclusion policy. `Some(reason)` means the record is skipped, not mapped.
    pub fn exclusion_reason(&self) -> Option<&'static str> {
        match self {
            DiscountPayload::V1(record) => match record.get("products") {
                None | Some(JsonValue::Null) => Some("no product restriction"),
                Some(_) => None,
            },
            DiscountPayload::V2 { record, .. } => match record.get("isActive") {
                Some(JsonValue::Bool(false)) => Some("inactive"),
                _ => None,
            },
        }
    }

    pub fn map(&self, location_id: &str) -> Result<NormalizedRow, MappingError> {
        let record = self.record();
        let natural = natural_id(record, "discountId")?;
        let mut row = NormalizedRow::new();
        match self {
            DiscountPayload::V1(_) => {
                apply_allow_list(record, DISCOUNT_V1_FIELDS, &mut row)?;
            }
            DiscountPayload::V2 { reward, .. } => {
                apply_allow_list(record, DISCOUNT_V2_FIELDS, &mut row)?;
                map_reward(reward, &mut row)?;
                if let Some(schedule) = weekly_recurrence(record) {
                    row.set(
                        "weekly_recurrence_info",
                        ColumnValue::blob("weekly_recurrence_info", &schedule)?,
                    );
                }
                row.set(
                    "is_available_online",
                    ColumnValue::Bool(is_available_online(record)),
                );
            }
        }
        stamp_keys(&mut row, location_id, "discount_id", &natural);
        Ok(row)
    }
}

fn map_reward(reward: &RewardV2, row: &mut NormalizedRow) -> Result<(), MappingError> {
    let scalars = [
        ("discount_amount", &reward.discount_amount),
        ("discount_method", &reward.calculation_method),
        ("threshold_type", &reward.threshold_type),
        ("threshold_min", &reward.threshold_min),
        ("threshold_max", &reward.threshold_max),
    ];
    for (column, value) in scalars {
        if let Some(value) = value {
            row.set(column, ColumnValue::from_scalar(value));
        }
    }

    let Some(restrictions) = &reward.restrictions else {
        return Ok(());
    };
    for (kind, column) in RESTRICTION_COLUMNS {
        if let Some(restriction) = restrictions.get(kind) {
            row.set(column, ColumnValue::blob(column, &restriction.canonical())?);
        }
    }
    Ok(())
}

/// Collects only the weekday flags and time fields actually present on the record.
pub fn weekly_recurrence(record: &UpstreamRecord) -> Option<JsonValue> {
    let mut schedule = Map::new();
    for day in WEEKDAYS {
        if let Some(flag) = record.get(day).and_then(JsonValue::as_bool) {
            schedule.insert(day.to_string(), JsonValue::Bool(flag));
        }
    }
    for field in RECURRENCE_TIME_FIELDS {
        match record.get(field) {
            None | Some(JsonValue::Null) => {}
            Some(value) => {
                schedule.insert(field.to_string(), value.clone());
            }
        }
    }
    if schedule.is_empty() {
        None
    } else {
        Some(JsonValue::Object(schedule))
    }
}

/// No upstream field states online availability; it follows from the application method.
pub fn is_available_online(record: &UpstreamRecord) -> bool {
    record
        .get("applicationMethod")
        .and_then(JsonValue::as_str)
        .is_some_and(|method| ONLINE_APPLICATION_METHODS.contains(&method))
}
