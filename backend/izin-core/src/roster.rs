// src/roster.rs
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::model::Student;
use crate::store::{DocumentStore, StoreError};

const DEFAULT_CLASS: &str = "-";
const ORDER_FIELD: &str = "name";

/// Which student field the selection list is keyed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterKey {
    #[default]
    Id,
    Name,
}

impl RosterKey {
    fn normalize(self, raw: &str) -> String {
        match self {
            RosterKey::Id => raw.trim().to_string(),
            RosterKey::Name => raw.trim().to_lowercase(),
        }
    }

    fn identity(self, student: &Student) -> &str {
        match self {
            RosterKey::Id => &student.id,
            RosterKey::Name => &student.name,
        }
    }
}

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("student roster unavailable")]
    Unavailable(#[from] StoreError),

    #[error("student roster has not been loaded yet")]
    NotLoaded,
}

/// Students known for one load, in display order.
#[derive(Debug, Clone)]
pub struct RosterIndex {
    key: RosterKey,
    students: Vec<Student>,
    by_key: HashMap<String, usize>,
}

impl RosterIndex {
    pub fn new(key: RosterKey, students: impl IntoIterator<Item = Student>) -> Self {
        let mut index = Self {
            key,
            students: Vec::new(),
            by_key: HashMap::new(),
        };
        for student in students {
            if key.identity(&student).is_empty() {
                debug!("Skipping student without {:?}: {:?}", key, student);
                continue;
            }
            let lookup = key.normalize(key.identity(&student));
            // Later duplicates win, as with a plain map rebuild.
            match index.by_key.get(&lookup) {
                Some(&pos) => index.students[pos] = student,
                None => {
                    index.by_key.insert(lookup, index.students.len());
                    index.students.push(student);
                }
            }
        }
        index
    }

    pub fn key(&self) -> RosterKey {
        self.key
    }

    pub fn lookup(&self, selection: &str) -> Option<&Student> {
        self.by_key
            .get(&self.key.normalize(selection))
            .map(|&pos| &self.students[pos])
    }

    /// Students whose display name contains `query`, case-insensitively.
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<&Student> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.students
            .iter()
            .filter(|s| s.name.to_lowercase().contains(&needle))
            .take(limit)
            .collect()
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// Reads the whole student collection, ordered by display name.
pub async fn load(
    store: &dyn DocumentStore,
    collection: &str,
    key: RosterKey,
) -> Result<RosterIndex, RosterError> {
    let docs = store.list(collection, Some(ORDER_FIELD)).await?;
    let students = docs.iter().map(|doc| {
        let class = doc.string_field("class");
        Student {
            id: doc.string_field("id"),
            name: doc.string_field("name"),
            class: if class.is_empty() {
                DEFAULT_CLASS.to_string()
            } else {
                class
            },
        }
    });
    let index = RosterIndex::new(key, students);
    info!(
        "Loaded {} students from '{}' ({} documents)",
        index.len(),
        collection,
        docs.len()
    );
    Ok(index)
}

/// Holds the most recent successfully loaded roster.
pub struct RosterCache {
    store: Arc<dyn DocumentStore>,
    collection: String,
    key: RosterKey,
    current: RwLock<Option<Arc<RosterIndex>>>,
}

impl RosterCache {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>, key: RosterKey) -> Self {
        Self {
            store,
            collection: collection.into(),
            key,
            current: RwLock::new(None),
        }
    }

    /// Reloads the roster. On failure the previous index stays in place.
    pub async fn refresh(&self) -> Result<Arc<RosterIndex>, RosterError> {
        match load(self.store.as_ref(), &self.collection, self.key).await {
            Ok(index) => {
                let index = Arc::new(index);
                *self.current.write().await = Some(index.clone());
                Ok(index)
            }
            Err(e) => {
                error!("Roster reload failed, keeping previous roster: {:?}", e);
                Err(e)
            }
        }
    }

    pub async fn snapshot(&self) -> Result<Arc<RosterIndex>, RosterError> {
        self.current.read().await.clone().ok_or(RosterError::NotLoaded)
    }
}
