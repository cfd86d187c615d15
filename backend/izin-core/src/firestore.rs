// src/firestore.rs

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::store::{Document, DocumentStore, Fields, StoreError, Value};

pub const FIRESTORE_API_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_DATABASE: &str = "(default)";
const LIST_PAGE_SIZE: u32 = 300;

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
}

// --- Wire format ---
// Firestore's JSON encodes each value as a single-key object naming its type,
// which is serde's externally tagged enum layout.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireValue {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(WireLatLng),
    ArrayValue(WireArray),
    MapValue(WireMap),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireLatLng {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireArray {
    #[serde(default)]
    pub values: Vec<WireValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMap {
    #[serde(default)]
    pub fields: BTreeMap<String, WireValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDocument {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, WireValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<WireDocument>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct PatchBody {
    fields: BTreeMap<String, WireValue>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorPayload {
    error: GoogleErrorInfo,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorInfo {
    message: Option<String>,
    status: Option<String>,
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => WireValue::NullValue(()),
            Value::Bool(b) => WireValue::BooleanValue(*b),
            Value::Integer(i) => WireValue::IntegerValue(i.to_string()),
            Value::Double(d) => WireValue::DoubleValue(*d),
            Value::String(s) => WireValue::StringValue(s.clone()),
            Value::Timestamp(ts) => {
                WireValue::TimestampValue(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
            Value::Array(values) => WireValue::ArrayValue(WireArray {
                values: values.iter().map(WireValue::from).collect(),
            }),
            Value::Map(fields) => WireValue::MapValue(WireMap {
                fields: encode_fields(fields),
            }),
        }
    }
}

impl TryFrom<WireValue> for Value {
    type Error = StoreError;

    fn try_from(wire: WireValue) -> Result<Self, Self::Error> {
        Ok(match wire {
            WireValue::NullValue(()) => Value::Null,
            WireValue::BooleanValue(b) => Value::Bool(b),
            WireValue::IntegerValue(raw) => Value::Integer(
                raw.parse()
                    .map_err(|_| StoreError::Decode(format!("integerValue '{}'", raw)))?,
            ),
            WireValue::DoubleValue(d) => Value::Double(d),
            WireValue::TimestampValue(raw) => Value::Timestamp(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|_| StoreError::Decode(format!("timestampValue '{}'", raw)))?
                    .with_timezone(&Utc),
            ),
            WireValue::StringValue(s) | WireValue::BytesValue(s) | WireValue::ReferenceValue(s) => {
                Value::String(s)
            }
            WireValue::GeoPointValue(point) => {
                let mut fields = Fields::new();
                fields.insert("latitude".to_string(), Value::Double(point.latitude));
                fields.insert("longitude".to_string(), Value::Double(point.longitude));
                Value::Map(fields)
            }
            WireValue::ArrayValue(array) => Value::Array(
                array
                    .values
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            WireValue::MapValue(map) => Value::Map(decode_fields(map.fields)?),
        })
    }
}

pub fn encode_fields(fields: &Fields) -> BTreeMap<String, WireValue> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), WireValue::from(value)))
        .collect()
}

pub fn decode_fields(fields: BTreeMap<String, WireValue>) -> Result<Fields, StoreError> {
    fields
        .into_iter()
        .map(|(name, wire)| Ok((name, Value::try_from(wire)?)))
        .collect()
}

pub fn decode_document(wire: WireDocument) -> Result<Document, StoreError> {
    let id = wire
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    Ok(Document {
        id,
        fields: decode_fields(wire.fields)?,
    })
}

/// Quotes a top-level field name for use in an update mask. Names that are
/// not plain identifiers (numeric student ids, names with dots) need
/// backticks.
pub fn quote_field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

// --- Client ---

#[derive(Clone)]
pub struct FirestoreStore {
    config: Arc<FirestoreConfig>,
    http_client: Client,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig) -> Result<Self, StoreError> {
        let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Url::parse(&config.base_url)?;
        if config.api_key.is_none() && config.access_token.is_none() {
            warn!("Firestore client has neither an API key nor an access token; requests rely on open security rules");
        }
        info!(
            "Firestore client configured for project '{}' (database {})",
            config.project_id, config.database
        );
        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    pub fn documents_url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.base_url)?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable(format!("invalid base URL {}", self.config.base_url)))?
            .pop_if_empty()
            .extend([
                "projects",
                self.config.project_id.as_str(),
                "databases",
                self.config.database.as_str(),
                "documents",
            ])
            .extend(segments);
        if let Some(key) = &self.config.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    fn build_request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http_client
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        match &self.config.access_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn execute(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<Response, StoreError> {
        let request = request_builder.build().map_err(|e| {
            error!("Request build failed for '{}': {}", context_msg, e);
            StoreError::Request(e)
        })?;
        let request_url = request.url().path().to_string();
        debug!("Sending request for '{}' to {}", context_msg, request_url);

        let resp = self.http_client.execute(request).await.map_err(|e| {
            error!(
                "HTTP execution failed before receiving response for '{}' ({}): {}",
                context_msg, request_url, e
            );
            StoreError::Request(e)
        })?;

        let status = resp.status();
        debug!("Response for '{}': Status={}", context_msg, status);
        if status.is_success() {
            return Ok(resp);
        }

        let error_body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("Failed to read error body: {}", e));

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limit exceeded for '{}' ({})", context_msg, request_url);
            return Err(StoreError::RateLimited);
        }

        let message = match serde_json::from_str::<GoogleErrorPayload>(&error_body) {
            Ok(parsed) => match (parsed.error.status, parsed.error.message) {
                (Some(code), Some(msg)) => format!("{}: {}", code, msg),
                (None, Some(msg)) => msg,
                _ => error_body.clone(),
            },
            Err(_) => error_body,
        };
        if status != StatusCode::NOT_FOUND {
            error!(
                "Document store error for '{}': Status={}, Message='{}'",
                context_msg, status, message
            );
        }
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<T, StoreError> {
        let resp = self.execute(request_builder, context_msg).await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice::<T>(&bytes).map_err(|e| {
            error!("JSON deserialization failed for '{}': {}", context_msg, e);
            StoreError::Json(e)
        })
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn list(
        &self,
        collection: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page = 1;

        loop {
            let mut url = self.documents_url(&[collection])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &LIST_PAGE_SIZE.to_string());
                if let Some(field) = order_by {
                    query.append_pair("orderBy", field);
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            debug!("Fetching '{}' page {}", collection, page);
            let response: ListDocumentsResponse = self
                .send_and_deserialize(
                    self.build_request(Method::GET, url),
                    &format!("list {}", collection),
                )
                .await?;

            for wire in response.documents {
                documents.push(decode_document(wire)?);
            }

            match response.next_page_token {
                Some(token) if !token.is_empty() => {
                    page_token = Some(token);
                    page += 1;
                }
                _ => break,
            }
        }

        info!(
            "Fetched {} documents from '{}' in {} page(s)",
            documents.len(),
            collection,
            page
        );
        Ok(documents)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        let url = self.documents_url(&[collection, key])?;
        let context = format!("get {}/{}", collection, key);
        match self
            .send_and_deserialize::<WireDocument>(self.build_request(Method::GET, url), &context)
            .await
        {
            Ok(wire) => Ok(Some(decode_document(wire)?)),
            Err(StoreError::Api { status, .. }) if status == 404 => {
                debug!("No document at {}/{}", collection, key);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn set_merge(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut url = self.documents_url(&[collection, key])?;
        {
            let mut query = url.query_pairs_mut();
            for name in fields.keys() {
                query.append_pair("updateMask.fieldPaths", &quote_field_path(name));
            }
        }
        let body = PatchBody {
            fields: encode_fields(&fields),
        };
        let context = format!("merge {}/{}", collection, key);
        let request = self.build_request(Method::PATCH, url).json(&body);
        self.execute(request, &context).await?;
        debug!("Merged {} field(s) into {}/{}", fields.len(), collection, key);
        Ok(())
    }
}
