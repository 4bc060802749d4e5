use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use docstore::{DocumentStore, StoreError, WatchEvent};
use serde_json::{Map, Value};
use shared::{
    domain::{DocumentId, Record},
    protocol::{CollectionSnapshot, QueryDescriptor},
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

pub mod view;

/// What a subscriber currently sees for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum ListView<R> {
    Loading,
    Ready(Vec<R>),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Active,
    Errored,
    Closed,
}

const ACTIVE: u8 = 0;
const ERRORED: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug)]
struct StatusCell(AtomicU8);

impl StatusCell {
    fn new() -> Self {
        Self(AtomicU8::new(ACTIVE))
    }

    fn get(&self) -> HandleStatus {
        match self.0.load(Ordering::Acquire) {
            ERRORED => HandleStatus::Errored,
            CLOSED => HandleStatus::Closed,
            _ => HandleStatus::Active,
        }
    }

    /// Leaves `Active` exactly once. Both terminal states are sticky: an
    /// errored handle cannot be closed into a clean state and vice versa.
    fn leave_active(&self, next: u8) -> bool {
        self.0
            .compare_exchange(ACTIVE, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Turns a remote document store into typed, continuously refreshed list
/// views. All mutations go straight to the store; the views only ever move
/// when the store publishes a replacement snapshot.
#[derive(Clone)]
pub struct SyncClient {
    store: Arc<dyn DocumentStore>,
}

impl SyncClient {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Opens a live subscription for `query`. The returned handle starts in
    /// `ListView::Loading` and then mirrors every snapshot the store pushes,
    /// each one a complete replacement of the previous view. Must be called
    /// from within a Tokio runtime.
    pub fn subscribe<R: Record>(&self, query: QueryDescriptor) -> LiveSubscription<R> {
        let (view_tx, view_rx) = watch::channel(ListView::Loading);
        let status = Arc::new(StatusCell::new());
        let bridge = tokio::spawn(run_bridge::<R>(
            Arc::clone(&self.store),
            query,
            view_tx,
            Arc::clone(&status),
        ));
        LiveSubscription {
            view: view_rx,
            status,
            bridge: Some(bridge),
        }
    }

    /// One-shot fetch of the current result set, without a subscription.
    pub async fn load<R: Record>(&self, query: QueryDescriptor) -> Result<Vec<R>, StoreError> {
        let snapshot = self.store.fetch(query).await?;
        Ok(materialize_records(&snapshot))
    }

    pub async fn delete(&self, collection: &str, id: &DocumentId) -> Result<(), StoreError> {
        self.store.delete(collection, id).await
    }

    pub async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.store.update(collection, id, fields).await
    }
}

/// A cancellable handle on one live query. Dropping the handle stops the
/// underlying stream; `close` does the same explicitly.
pub struct LiveSubscription<R> {
    view: watch::Receiver<ListView<R>>,
    status: Arc<StatusCell>,
    bridge: Option<JoinHandle<()>>,
}

impl<R> LiveSubscription<R> {
    pub fn view(&self) -> ListView<R>
    where
        R: Clone,
    {
        self.view.borrow().clone()
    }

    /// Waits for the next published view. Returns `false` once no further
    /// view can arrive.
    pub async fn changed(&mut self) -> bool {
        self.view.changed().await.is_ok()
    }

    pub fn status(&self) -> HandleStatus {
        self.status.get()
    }

    /// A standalone stream of view transitions for callers that run their
    /// own loop. Yields the current view first, then every change.
    pub fn updates(&self) -> WatchStream<ListView<R>>
    where
        R: Clone + Send + Sync + 'static,
    {
        WatchStream::new(self.view.clone())
    }

    /// Stops the subscription. Idempotent; closing an already errored handle
    /// leaves it errored.
    pub fn close(&mut self) {
        self.status.leave_active(CLOSED);
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
    }
}

impl<R> Drop for LiveSubscription<R> {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
    }
}

async fn run_bridge<R: Record>(
    store: Arc<dyn DocumentStore>,
    query: QueryDescriptor,
    view_tx: watch::Sender<ListView<R>>,
    status: Arc<StatusCell>,
) {
    let collection = query.collection.clone();
    let mut feed = match store.watch(query).await {
        Ok(feed) => feed,
        Err(err) => {
            fail(&view_tx, &status, err.to_string());
            return;
        }
    };

    while let Some(event) = feed.next_event().await {
        match event {
            WatchEvent::Snapshot(snapshot) => {
                let records = materialize_records::<R>(&snapshot);
                debug!(
                    collection = %snapshot.collection,
                    count = records.len(),
                    "applied replacement snapshot"
                );
                if view_tx.send(ListView::Ready(records)).is_err() {
                    return;
                }
            }
            WatchEvent::Failed(err) => {
                fail(&view_tx, &status, err.to_string());
                return;
            }
        }
    }

    fail(
        &view_tx,
        &status,
        format!("watch stream for {collection} ended unexpectedly"),
    );
}

/// Errors are terminal: the status flips before the view so that a caller
/// who sees `Failed` never reads the handle as still active.
fn fail<R>(view_tx: &watch::Sender<ListView<R>>, status: &StatusCell, message: String) {
    if !status.leave_active(ERRORED) {
        return;
    }
    warn!(reason = %message, "live subscription failed");
    let _ = view_tx.send(ListView::Failed(message));
}

fn materialize_records<R: Record>(snapshot: &CollectionSnapshot) -> Vec<R> {
    let mut records = Vec::with_capacity(snapshot.documents.len());
    for doc in &snapshot.documents {
        match R::materialize(doc) {
            Some(record) => records.push(record),
            None => {
                let id = doc.id.as_ref().map(DocumentId::as_str).unwrap_or("<none>");
                warn!(
                    collection = %snapshot.collection,
                    id,
                    "dropping document that failed to materialize"
                );
            }
        }
    }
    records
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
