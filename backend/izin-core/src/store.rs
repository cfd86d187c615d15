// src/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Top-level (or nested map) fields of a document.
pub type Fields = BTreeMap<String, Value>;

/// A typed document value, mirroring what a hosted document database stores.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Map(Fields),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Value::Map(fields) => Some(fields),
            _ => None,
        }
    }

    /// Ordering key used by `MemoryStore::list`.
    fn sort_key(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => format!("{:020}", i),
            Value::Double(d) => d.to_string(),
            Value::String(s) => s.clone(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
            Value::Array(_) | Value::Map(_) => String::new(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Fields> for Value {
    fn from(fields: Fields) -> Self {
        Value::Map(fields)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// Trimmed string field, empty when absent or not a string.
    pub fn string_field(&self, name: &str) -> String {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("Rate limit exceeded (Status 429)")]
    RateLimited,

    #[error("Document store error: Status={status}, Message='{message}'")]
    Api { status: u16, message: String },

    #[error("Could not decode document value: {0}")]
    Decode(String),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

/// Key-addressed collection-of-documents store.
///
/// `set_merge` replaces only the top-level keys present in `fields` and
/// creates the document if it does not exist. It is not a deep merge.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Lists every document in `collection`, ordered ascending by `order_by`
    /// when given. Documents lacking the order field are omitted.
    async fn list(
        &self,
        collection: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError>;

    async fn set_merge(&self, collection: &str, key: &str, fields: Fields)
        -> Result<(), StoreError>;
}

// --- In-memory store ---

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Fields>>>,
}

#[derive(Debug, Deserialize)]
struct SeedStudent {
    id: String,
    name: String,
    #[serde(default)]
    class: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `collection` from a JSON array of `{id, name, class}` objects.
    pub async fn seed_students(&self, collection: &str, path: &Path) -> Result<usize, StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
            source: e,
            context: format!("Failed to read seed file: {:?}", path),
        })?;
        let students: Vec<SeedStudent> = serde_json::from_str(&raw)?;
        let count = students.len();
        for student in students {
            let mut fields = Fields::new();
            fields.insert("id".to_string(), Value::from(student.id.clone()));
            fields.insert("name".to_string(), Value::from(student.name));
            fields.insert("class".to_string(), Value::from(student.class));
            self.set_merge(collection, &student.id, fields).await?;
        }
        info!("Seeded {} students into '{}' from {:?}", count, collection, path);
        Ok(count)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(
        &self,
        collection: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.lock().await;
        let mut docs: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(field) = order_by {
            docs.retain(|doc| doc.fields.contains_key(field));
            docs.sort_by_cached_key(|doc| {
                doc.fields
                    .get(field)
                    .map(Value::sort_key)
                    .unwrap_or_default()
            });
        }
        debug!("Listed {} documents from '{}'", docs.len(), collection);
        Ok(docs)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(key))
            .map(|fields| Document {
                id: key.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn set_merge(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        let doc = collections
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        for (name, value) in fields {
            doc.insert(name, value);
        }
        Ok(())
    }
}
