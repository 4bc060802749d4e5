use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use shared::{
    domain::DocumentId,
    protocol::{CollectionSnapshot, QueryDescriptor, RawDocument},
};

use crate::{DocumentStore, StoreError, WatchEvent, WatchFeed};

/// In-process store used by demos and tests. Every mutation pushes a fresh,
/// fully ordered result set to each watcher of the touched collection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<StoredDocument>>,
    watchers: Vec<Watcher>,
}

struct StoredDocument {
    id: DocumentId,
    fields: Map<String, Value>,
}

struct Watcher {
    query: QueryDescriptor,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document under a generated id and notifies watchers.
    pub async fn add(&self, collection: &str, fields: Map<String, Value>) -> DocumentId {
        let id = DocumentId::new(Uuid::new_v4().to_string());
        let mut inner = self.inner.lock().await;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredDocument {
                id: id.clone(),
                fields,
            });
        inner.notify(collection);
        id
    }

    /// Upserts a document under a caller-chosen id and notifies watchers.
    pub async fn put(&self, collection: &str, id: impl Into<String>, fields: Map<String, Value>) {
        let id = DocumentId::new(id);
        let mut inner = self.inner.lock().await;
        let documents = inner.collections.entry(collection.to_string()).or_default();
        match documents.iter_mut().find(|doc| doc.id == id) {
            Some(doc) => doc.fields = fields,
            None => documents.push(StoredDocument { id, fields }),
        }
        inner.notify(collection);
    }

    /// Live watch registrations, after pruning entries whose feed was dropped.
    pub async fn watcher_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.watchers.retain(|watcher| !watcher.tx.is_closed());
        inner.watchers.len()
    }
}

impl Inner {
    fn notify(&mut self, collection: &str) {
        let collections = &self.collections;
        self.watchers.retain(|watcher| {
            if watcher.query.collection != collection {
                return !watcher.tx.is_closed();
            }
            let snapshot = snapshot_for(collections, &watcher.query);
            watcher.tx.send(WatchEvent::Snapshot(snapshot)).is_ok()
        });
    }
}

fn snapshot_for(
    collections: &HashMap<String, Vec<StoredDocument>>,
    query: &QueryDescriptor,
) -> CollectionSnapshot {
    // Documents without the ordering field have no position in the result
    // set and are left out entirely.
    let mut members: Vec<&StoredDocument> = collections
        .get(&query.collection)
        .map(|documents| {
            documents
                .iter()
                .filter(|doc| doc.fields.contains_key(&query.order_by))
                .collect()
        })
        .unwrap_or_default();
    members.sort_by(|a, b| {
        let a_key = a.fields.get(&query.order_by).unwrap_or(&Value::Null);
        let b_key = b.fields.get(&query.order_by).unwrap_or(&Value::Null);
        compare_values(a_key, b_key)
    });
    CollectionSnapshot::new(
        query.collection.clone(),
        members
            .into_iter()
            .map(|doc| RawDocument {
                id: Some(doc.id.clone()),
                fields: doc.fields.clone(),
            })
            .collect(),
    )
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: by type rank first, then within the type.
/// Paired with a stable sort this keeps insertion order for equal keys.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (a_item, b_item) in a.iter().zip(b.iter()) {
                let ordering = compare_values(a_item, b_item);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut a_entries: Vec<_> = a.iter().collect();
            let mut b_entries: Vec<_> = b.iter().collect();
            a_entries.sort_by(|(a_key, _), (b_key, _)| a_key.cmp(b_key));
            b_entries.sort_by(|(a_key, _), (b_key, _)| a_key.cmp(b_key));
            for ((a_key, a_value), (b_key, b_value)) in a_entries.iter().zip(b_entries.iter()) {
                let ordering = a_key.cmp(b_key);
                if ordering != Ordering::Equal {
                    return ordering;
                }
                let ordering = compare_values(a_value, b_value);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a_entries.len().cmp(&b_entries.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn watch(&self, query: QueryDescriptor) -> Result<WatchFeed, StoreError> {
        query.validate().map_err(StoreError::InvalidQuery)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let initial = snapshot_for(&inner.collections, &query);
        let _ = tx.send(WatchEvent::Snapshot(initial));
        inner.watchers.push(Watcher { query, tx });
        Ok(WatchFeed::new(rx))
    }

    async fn fetch(&self, query: QueryDescriptor) -> Result<CollectionSnapshot, StoreError> {
        query.validate().map_err(StoreError::InvalidQuery)?;
        let inner = self.inner.lock().await;
        Ok(snapshot_for(&inner.collections, &query))
    }

    async fn delete(&self, collection: &str, id: &DocumentId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let removed = match inner.collections.get_mut(collection) {
            Some(documents) => {
                let before = documents.len();
                documents.retain(|doc| &doc.id != id);
                documents.len() != before
            }
            None => false,
        };
        if removed {
            inner.notify(collection);
        }
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let found = inner
            .collections
            .get_mut(collection)
            .and_then(|documents| documents.iter_mut().find(|doc| &doc.id == id));
        let Some(doc) = found else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.clone(),
            });
        };
        for (key, value) in fields {
            doc.fields.insert(key, value);
        }
        inner.notify(collection);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
