//! Upstream client contracts, HTTP implementations and field mappers.

pub mod mapping;
pub mod sanitize;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use shelf_core::{LocationConfig, UpstreamRecord};
use shelf_storage::{FetchError, HttpAuth, HttpFetcher};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use mapping::{
    is_available_online, map_inventory, map_product_detail, weekly_recurrence, DiscountPayload,
    DiscountSchema,
};
pub use sanitize::sanitize_banner;

pub const CRATE_NAME: &str = "shelf-adapters";

const BANNER_QUERY: &str = r#"
query RetailerBannerQuery($retailerId: ID!) {
  retailer(id: $retailerId) {
    banner {
      html
    }
  }
}
"#;

const MENU_PRODUCTS_QUERY: &str = r#"
query MenuProductsQuery($retailerId: ID!) {
  menu(retailerId: $retailerId) {
    products {
      id
      name
      description
      image
      slug
      category
      subcategory
      strainType
      effects
      brand { name }
      potencyThc { formatted range unit }
      potencyCbd { formatted range unit }
    }
  }
}
"#;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected response shape from {endpoint}: {message}")]
    Shape {
        endpoint: &'static str,
        message: String,
    },
    #[error("{0}")]
    Message(String),
}

impl AdapterError {
    /// The upstream rejected the credential; retrying the same key will not help.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AdapterError::Fetch(err) if err.is_auth_failure())
    }
}

/// POS-side identity of an API credential.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PosIdentity {
    pub location_id: Option<String>,
    pub location_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

#[async_trait]
pub trait PosApi: Send + Sync {
    async fn fetch_inventory(&self, location: &LocationConfig)
        -> Result<Vec<UpstreamRecord>, AdapterError>;

    async fn fetch_discounts(&self, location: &LocationConfig)
        -> Result<Vec<UpstreamRecord>, AdapterError>;

    async fn whoami(&self, api_key: &str) -> Result<PosIdentity, AdapterError>;
}

#[async_trait]
pub trait ContentApi: Send + Sync {
    /// False when no content credential is configured; callers skip instead of failing.
    fn is_configured(&self) -> bool;

    async fn fetch_banner_markup(&self, retailer_id: &str) -> Result<Option<String>, AdapterError>;

    async fn fetch_menu_products(&self, retailer_id: &str)
        -> Result<Vec<UpstreamRecord>, AdapterError>;
}

#[async_trait]
pub trait LocationDirectory: Send + Sync {
    /// Ordered list of usable locations. Entries without a credential or id are already
    /// filtered out.
    async fn resolve_locations(&self) -> Result<Vec<LocationConfig>, AdapterError>;
}

#[async_trait]
pub trait ContentDestination: Send + Sync {
    /// Writes sanitized banner text; `None` clears it.
    async fn write_banner_text(
        &self,
        destination_id: &str,
        text: Option<&str>,
    ) -> Result<(), AdapterError>;
}

/// Normalizes a bulk response into records. Null and empty bodies are zero records.
pub fn records_from_json(
    endpoint: &'static str,
    value: JsonValue,
) -> Result<Vec<UpstreamRecord>, AdapterError> {
    let items = match value {
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("data") {
            Some(JsonValue::Array(items)) => items,
            Some(JsonValue::Null) | None => {
                return Err(AdapterError::Shape {
                    endpoint,
                    message: "expected an array or an object with a `data` array".into(),
                })
            }
            Some(other) => {
                return Err(AdapterError::Shape {
                    endpoint,
                    message: format!("`data` is not an array: {other}"),
                })
            }
        },
        other => {
            return Err(AdapterError::Shape {
                endpoint,
                message: format!("expected an array, got {other}"),
            })
        }
    };

    let total = items.len();
    let records: Vec<UpstreamRecord> = items
        .into_iter()
        .filter_map(|item| match item {
            JsonValue::Object(map) => Some(map),
            _ => None,
        })
        .collect();
    if records.len() != total {
        warn!(endpoint, dropped = total - records.len(), "ignoring non-object entries");
    }
    Ok(records)
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone)]
pub struct PosHttpClient {
    http: Arc<HttpFetcher>,
    base_url: String,
}

impl PosHttpClient {
    pub fn new(http: Arc<HttpFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn fetch_report(
        &self,
        endpoint: &'static str,
        api_key: &str,
    ) -> Result<Vec<UpstreamRecord>, AdapterError> {
        let auth = HttpAuth::Basic {
            username: api_key.to_string(),
        };
        let body = self
            .http
            .get_json(&join_url(&self.base_url, endpoint), &auth)
            .await?;
        let records = records_from_json(endpoint, body)?;
        debug!(endpoint, records = records.len(), "fetched pos report");
        Ok(records)
    }
}

#[async_trait]
impl PosApi for PosHttpClient {
    async fn fetch_inventory(
        &self,
        location: &LocationConfig,
    ) -> Result<Vec<UpstreamRecord>, AdapterError> {
        self.fetch_report("reporting/inventory", &location.api_key).await
    }

    async fn fetch_discounts(
        &self,
        location: &LocationConfig,
    ) -> Result<Vec<UpstreamRecord>, AdapterError> {
        self.fetch_report("reporting/discounts", &location.api_key).await
    }

    async fn whoami(&self, api_key: &str) -> Result<PosIdentity, AdapterError> {
        let auth = HttpAuth::Basic {
            username: api_key.to_string(),
        };
        let body = self
            .http
            .get_json(&join_url(&self.base_url, "whoami"), &auth)
            .await?;
        Ok(PosIdentity {
            location_id: json_id(body.get("locationId")),
            location_name: json_text(body.get("locationName")),
            city: json_text(body.get("city")),
            state: json_text(body.get("state")),
        })
    }
}

fn json_text(value: Option<&JsonValue>) -> Option<String> {
    value
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn json_id(value: Option<&JsonValue>) -> Option<String> {
    match value {
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        other => json_text(other),
    }
}

/// GraphQL client for the content API (banners and menu product detail).
#[derive(Clone)]
pub struct ContentHttpClient {
    http: Arc<HttpFetcher>,
    endpoint: String,
    api_key: Option<String>,
}

impl fmt::Debug for ContentHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHttpClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ContentHttpClient {
    pub fn new(http: Arc<HttpFetcher>, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    async fn query(
        &self,
        operation: &'static str,
        query: &str,
        variables: JsonValue,
    ) -> Result<JsonValue, AdapterError> {
        let Some(api_key) = &self.api_key else {
            return Err(AdapterError::Message(
                "content api key is not configured".into(),
            ));
        };
        let body = json!({ "query": query, "variables": variables });
        let response = self
            .http
            .post_json(&self.endpoint, &HttpAuth::Bearer(api_key.clone()), &body)
            .await?;
        graphql_data(operation, response)
    }
}

/// Extracts `data` from a GraphQL response, turning an `errors` array into a fetch error.
pub fn graphql_data(operation: &'static str, mut response: JsonValue) -> Result<JsonValue, AdapterError> {
    if let Some(errors) = response.get("errors").and_then(JsonValue::as_array) {
        if !errors.is_empty() {
            let message = errors
                .first()
                .and_then(|e| e.get("message"))
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown graphql error");
            return Err(AdapterError::Fetch(FetchError::Upstream(format!(
                "{operation}: {message}"
            ))));
        }
    }
    match response.get_mut("data").map(JsonValue::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(AdapterError::Shape {
            endpoint: operation,
            message: "response has no `data`".into(),
        }),
    }
}

#[async_trait]
impl ContentApi for ContentHttpClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch_banner_markup(&self, retailer_id: &str) -> Result<Option<String>, AdapterError> {
        let data = self
            .query(
                "RetailerBannerQuery",
                BANNER_QUERY,
                json!({ "retailerId": retailer_id }),
            )
            .await?;
        Ok(data
            .pointer("/retailer/banner/html")
            .and_then(JsonValue::as_str)
            .map(str::to_string))
    }

    async fn fetch_menu_products(
        &self,
        retailer_id: &str,
    ) -> Result<Vec<UpstreamRecord>, AdapterError> {
        let mut data = self
            .query(
                "MenuProductsQuery",
                MENU_PRODUCTS_QUERY,
                json!({ "retailerId": retailer_id }),
            )
            .await?;
        let products = data
            .pointer_mut("/menu/products")
            .map(JsonValue::take)
            .unwrap_or(JsonValue::Null);
        records_from_json("MenuProductsQuery", products)
    }
}

/// Wire shape of one entry in the stores directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreRecord {
    pub id: Option<JsonValue>,
    #[serde(rename = "documentId")]
    pub document_id: Option<String>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub is_active: Option<bool>,
    #[serde(rename = "posApiKey", alias = "dutchieApiKey")]
    pub pos_api_key: Option<String>,
    #[serde(rename = "posStoreId", alias = "DutchieStoreID")]
    pub pos_store_id: Option<String>,
    pub tickertape: Option<String>,
}

impl StoreRecord {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed store>")
    }

    /// Why this store cannot be synced, checked before any POS call.
    pub fn rejection_reason(&self) -> Option<&'static str> {
        if self
            .pos_api_key
            .as_deref()
            .map_or(true, |k| k.trim().is_empty())
        {
            return Some("no api key");
        }
        // Only an explicit `true` counts as active.
        if self.is_active != Some(true) {
            return Some("inactive");
        }
        if self
            .pos_store_id
            .as_deref()
            .map_or(true, |id| id.trim().is_empty())
        {
            return Some("no store id");
        }
        None
    }

    /// Content destinations are addressed by document id when present, else numeric id.
    pub fn destination_id(&self) -> Option<String> {
        self.document_id
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| json_id(self.id.as_ref()))
    }

    pub fn into_location(self, identity: PosIdentity) -> Option<LocationConfig> {
        let destination = self.destination_id();
        let name = self
            .name
            .clone()
            .or_else(|| identity.location_name.clone())
            .unwrap_or_default();
        let id = self.pos_store_id?.trim().to_string();
        let api_key = self.pos_api_key?;
        let mut location = LocationConfig::new(id, name, api_key);
        location.city = identity.city;
        location.state = identity.state;
        location.slug = self.slug;
        location.pos_location_id = identity.location_id;
        location.content_destination_id = destination;
        location.banner_text = self.tickertape.filter(|t| !t.trim().is_empty());
        Some(location)
    }
}

/// Stores directory client: location discovery and banner write-back share one service.
pub struct StoreDirectoryClient {
    http: Arc<HttpFetcher>,
    stores_url: String,
    token: Option<String>,
    pos: Arc<dyn PosApi>,
}

impl StoreDirectoryClient {
    pub fn new(
        http: Arc<HttpFetcher>,
        stores_url: impl Into<String>,
        token: Option<String>,
        pos: Arc<dyn PosApi>,
    ) -> Self {
        Self {
            http,
            stores_url: stores_url.into(),
            token: token.filter(|t| !t.trim().is_empty()),
            pos,
        }
    }

    fn auth(&self) -> HttpAuth {
        match &self.token {
            Some(token) => HttpAuth::Bearer(token.clone()),
            None => HttpAuth::None,
        }
    }

    async fn fetch_stores(&self) -> Result<Vec<StoreRecord>, AdapterError> {
        let url = format!(
            "{}?pagination[limit]=100",
            self.stores_url.trim_end_matches('/')
        );
        let body = self.http.get_json(&url, &self.auth()).await?;
        let records = records_from_json("stores", body)?;
        records
            .into_iter()
            .map(|record| {
                serde_json::from_value::<StoreRecord>(JsonValue::Object(record)).map_err(|e| {
                    AdapterError::Shape {
                        endpoint: "stores",
                        message: e.to_string(),
                    }
                })
            })
            .collect()
    }
}

#[async_trait]
impl LocationDirectory for StoreDirectoryClient {
    async fn resolve_locations(&self) -> Result<Vec<LocationConfig>, AdapterError> {
        let stores = self.fetch_stores().await?;
        info!(stores = stores.len(), "fetched store directory");

        let mut locations = Vec::with_capacity(stores.len());
        for store in stores {
            if let Some(reason) = store.rejection_reason() {
                info!(store = store.display_name(), reason, "skipping store");
                continue;
            }
            let api_key = store.pos_api_key.clone().unwrap_or_default();
            let identity = match self.pos.whoami(&api_key).await {
                Ok(identity) if identity.location_id.is_some() => identity,
                Ok(_) => {
                    warn!(store = store.display_name(), "pos did not report a location id; skipping");
                    continue;
                }
                Err(err) => {
                    warn!(
                        store = store.display_name(),
                        auth_rejected = err.is_auth_failure(),
                        error = %err,
                        "pos identity lookup failed; skipping"
                    );
                    continue;
                }
            };
            let name = store.display_name().to_string();
            if let Some(location) = store.into_location(identity) {
                info!(store = %name, location_id = %location.id, "configured location");
                locations.push(location);
            }
        }
        Ok(locations)
    }
}

#[async_trait]
impl ContentDestination for StoreDirectoryClient {
    async fn write_banner_text(
        &self,
        destination_id: &str,
        text: Option<&str>,
    ) -> Result<(), AdapterError> {
        let url = join_url(&self.stores_url, destination_id);
        let body = json!({ "data": { "tickertape": text } });
        let response = self.http.put_json(&url, &self.auth(), &body).await?;
        debug!(destination_id, status = %response.status, "banner written");
        Ok(())
    }
}
