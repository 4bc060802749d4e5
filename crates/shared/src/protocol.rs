use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::DocumentId;
use crate::error::ApiError;

/// Identifies one live result set: a collection, fully ordered by one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub collection: String,
    pub order_by: String,
}

impl QueryDescriptor {
    pub fn new(collection: impl Into<String>, order_by: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: order_by.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.collection.trim().is_empty() {
            return Err("collection must not be empty".to_string());
        }
        if self.order_by.trim().is_empty() {
            return Err("order_by must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: Some(DocumentId::new(id)),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// A complete result set for one query. Each snapshot replaces whatever the
/// receiver materialized before it; there are no incremental deltas.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub collection: String,
    pub documents: Vec<RawDocument>,
}

impl CollectionSnapshot {
    pub fn new(collection: impl Into<String>, documents: Vec<RawDocument>) -> Self {
        Self {
            collection: collection.into(),
            documents,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StoreEvent {
    Snapshot(CollectionSnapshot),
    Error(ApiError),
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub fields: Map<String, Value>,
}

impl UpdateRequest {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}
