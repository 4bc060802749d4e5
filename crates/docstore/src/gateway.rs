use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;
use url::Url;

use shared::{
    domain::DocumentId,
    error::ApiError,
    protocol::{CollectionSnapshot, QueryDescriptor, StoreEvent, UpdateRequest},
};

use crate::{DocumentStore, StoreError, WatchEvent, WatchFeed};

/// Remote document gateway client: plain HTTP for one-shot reads and
/// mutations, a websocket per watched query for live result sets.
#[derive(Debug)]
pub struct GatewayStore {
    http: Client,
    base_url: String,
}

impl GatewayStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).map_err(|err| {
            StoreError::Transport(format!("invalid gateway url '{base_url}': {err}"))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(StoreError::Transport(format!(
                "gateway url must use http or https, got '{base_url}'"
            )));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    fn documents_url(&self, collection: &str) -> String {
        format!("{}/collections/{collection}/documents", self.base_url)
    }

    fn document_url(&self, collection: &str, id: &DocumentId) -> String {
        format!("{}/collections/{collection}/documents/{id}", self.base_url)
    }

    fn watch_url(&self, query: &QueryDescriptor) -> String {
        let ws_base = if self.base_url.starts_with("https://") {
            self.base_url.replacen("https://", "wss://", 1)
        } else {
            self.base_url.replacen("http://", "ws://", 1)
        };
        format!(
            "{ws_base}/collections/{}/watch?order_by={}",
            query.collection, query.order_by
        )
    }

    async fn rejection(response: reqwest::Response) -> StoreError {
        let status = response.status();
        match response.json::<ApiError>().await {
            Ok(api) => StoreError::Rejected(api),
            Err(_) => StoreError::Transport(format!("gateway returned status {status}")),
        }
    }
}

#[async_trait]
impl DocumentStore for GatewayStore {
    async fn watch(&self, query: QueryDescriptor) -> Result<WatchFeed, StoreError> {
        query.validate().map_err(StoreError::InvalidQuery)?;
        let watch_url = self.watch_url(&query);
        let (ws_stream, _) = connect_async(&watch_url).await.map_err(|err| {
            StoreError::Transport(format!("failed to connect watch stream {watch_url}: {err}"))
        })?;
        let (_, mut ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            while let Some(message) = ws_reader.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<StoreEvent>(&text) {
                        Ok(StoreEvent::Snapshot(snapshot)) => {
                            if tx.send(WatchEvent::Snapshot(snapshot)).is_err() {
                                break;
                            }
                        }
                        Ok(StoreEvent::Error(api)) => {
                            warn!(code = ?api.code, "watch stream reported terminal error");
                            let _ = tx.send(WatchEvent::Failed(StoreError::Transport(api.message)));
                            break;
                        }
                        Err(err) => {
                            let _ = tx.send(WatchEvent::Failed(StoreError::Transport(format!(
                                "invalid store event: {err}"
                            ))));
                            break;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = tx.send(WatchEvent::Failed(StoreError::Transport(format!(
                            "websocket receive failed: {err}"
                        ))));
                        break;
                    }
                }
            }
        });

        Ok(WatchFeed::with_reader_task(rx, reader_task))
    }

    async fn fetch(&self, query: QueryDescriptor) -> Result<CollectionSnapshot, StoreError> {
        query.validate().map_err(StoreError::InvalidQuery)?;
        let response = self
            .http
            .get(self.documents_url(&query.collection))
            .query(&[("order_by", query.order_by.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(response.json().await?)
    }

    async fn delete(&self, collection: &str, id: &DocumentId) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.document_url(collection, id))
            .send()
            .await?;
        // Deleting an already absent document counts as done.
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(Self::rejection(response).await)
    }

    async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let response = self
            .http
            .patch(self.document_url(collection, id))
            .json(&UpdateRequest::new(fields))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.clone(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
