use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use shared::{
    domain::DocumentId,
    error::ApiError,
    protocol::{CollectionSnapshot, QueryDescriptor},
};

pub mod gateway;
pub mod memory;

pub use gateway::GatewayStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("document {id} not found in collection {collection}")]
    NotFound { collection: String, id: DocumentId },
    #[error("request rejected: {0}")]
    Rejected(ApiError),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

#[derive(Debug)]
pub enum WatchEvent {
    /// A complete replacement result set for the watched query.
    Snapshot(CollectionSnapshot),
    /// The watch failed; no further events follow.
    Failed(StoreError),
}

/// Receiving half of one watch. Dropping the feed releases the watch: an
/// attached reader task is aborted and in-process watcher registrations are
/// pruned once the store notices the closed channel.
#[derive(Debug)]
pub struct WatchFeed {
    events: mpsc::UnboundedReceiver<WatchEvent>,
    reader_task: Option<JoinHandle<()>>,
}

impl WatchFeed {
    pub fn new(events: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self {
            events,
            reader_task: None,
        }
    }

    pub fn with_reader_task(
        events: mpsc::UnboundedReceiver<WatchEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            reader_task: Some(task),
        }
    }

    /// Next event on the feed. `None` means the feed ended without a
    /// terminal error, e.g. the backing store shut down.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }
}

impl Drop for WatchFeed {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// A backend holding ordered document collections. `watch` delivers the
/// current result set immediately and a fresh complete set after every
/// change; mutations are forwarded as-is and never retried here.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn watch(&self, query: QueryDescriptor) -> Result<WatchFeed, StoreError>;
    async fn fetch(&self, query: QueryDescriptor) -> Result<CollectionSnapshot, StoreError>;
    async fn delete(&self, collection: &str, id: &DocumentId) -> Result<(), StoreError>;
    async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError>;
}
