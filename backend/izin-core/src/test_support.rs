// src/test_support.rs
// Shared fixtures for the unit tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::store::{Document, DocumentStore, Fields, MemoryStore, StoreError, Value};
use crate::validator::LeaveFields;

pub const STUDENTS: &str = "students";
pub const LEAVE: &str = "leaveLedger";
pub const ATTENDANCE: &str = "attendanceLedger";

/// Memory store whose operations can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_list: AtomicBool,
    fail_get: AtomicBool,
    failing_writes: Mutex<HashSet<String>>,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes_to(&self, collection: &str) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert(collection.to_string());
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The entry for `key` inside document `collection/doc`, if any.
    pub async fn entry(&self, collection: &str, doc: &str, key: &str) -> Option<Fields> {
        self.inner
            .get(collection, doc)
            .await
            .unwrap()
            .and_then(|d| d.fields.get(key).and_then(Value::as_map).cloned())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn list(
        &self,
        collection: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("list disabled".to_string()));
        }
        self.inner.list(collection, order_by).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("get disabled".to_string()));
        }
        self.inner.get(collection, key).await
    }

    async fn set_merge(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        if self.failing_writes.lock().unwrap().contains(collection) {
            return Err(StoreError::Unavailable(format!("writes to {} disabled", collection)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_merge(collection, key, fields).await
    }
}

pub async fn seed_student(store: &MemoryStore, id: &str, name: &str, class: &str) {
    let mut fields = Fields::new();
    fields.insert("id".to_string(), Value::from(id));
    fields.insert("name".to_string(), Value::from(name));
    fields.insert("class".to_string(), Value::from(class));
    let doc_id = if id.is_empty() { name } else { id };
    store.set_merge(STUDENTS, doc_id, fields).await.unwrap();
}

/// Ana (123, 5A), Budi (124, 5B) and Citra (125, no class).
pub async fn sample_store() -> FlakyStore {
    let store = FlakyStore::new();
    seed_student(&store.inner, "124", "Budi", "5B").await;
    seed_student(&store.inner, "123", "Ana", "5A").await;
    seed_student(&store.inner, "125", "Citra", "").await;
    store
}

pub fn leave_fields(
    student: &str,
    name: &str,
    class: &str,
    date: &str,
    leave_type: &str,
    note: &str,
) -> LeaveFields {
    LeaveFields {
        student: student.to_string(),
        student_name: name.to_string(),
        class_name: class.to_string(),
        date: date.to_string(),
        leave_type: leave_type.to_string(),
        note: note.to_string(),
    }
}

pub fn ana_sick(date: &str) -> LeaveFields {
    leave_fields("123", "Ana", "5A", date, "sick", "flu")
}
