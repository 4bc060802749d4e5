use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode as AxumStatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};

use super::*;
use shared::{
    error::ErrorCode,
    protocol::RawDocument,
};

#[derive(Clone, Default)]
struct GatewayFixture {
    fetch_queries: Arc<Mutex<Vec<String>>>,
    patches: Arc<Mutex<Vec<(String, String, Value)>>>,
    deletes: Arc<Mutex<Vec<(String, String)>>>,
    watch_frames: Arc<Mutex<Vec<StoreEvent>>>,
    garbage_first_frame: Arc<Mutex<bool>>,
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("fields fixture must be a JSON object, got {other:?}"),
    }
}

#[derive(Deserialize)]
struct OrderByQuery {
    order_by: String,
}

async fn handle_fetch(
    State(state): State<GatewayFixture>,
    Path(collection): Path<String>,
    Query(query): Query<OrderByQuery>,
) -> Response {
    state
        .fetch_queries
        .lock()
        .await
        .push(format!("{collection}?order_by={}", query.order_by));
    if query.order_by == "unindexed" {
        return (
            AxumStatusCode::BAD_REQUEST,
            Json(ApiError::invalid_query("cannot order by unindexed")),
        )
            .into_response();
    }
    Json(CollectionSnapshot::new(
        collection,
        vec![RawDocument::new(
            "appt-1",
            fields(json!({ "status": "upcoming", "timestamp": "2025-06-01T09:00:00Z" })),
        )],
    ))
    .into_response()
}

async fn handle_patch(
    State(state): State<GatewayFixture>,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    state.patches.lock().await.push((collection, id.clone(), body));
    if id == "missing" {
        return AxumStatusCode::NOT_FOUND.into_response();
    }
    if id == "locked" {
        return (
            AxumStatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError::new(
                ErrorCode::Validation,
                "appointment can no longer be edited",
            )),
        )
            .into_response();
    }
    AxumStatusCode::NO_CONTENT.into_response()
}

async fn handle_delete(
    State(state): State<GatewayFixture>,
    Path((collection, id)): Path<(String, String)>,
) -> AxumStatusCode {
    state.deletes.lock().await.push((collection, id.clone()));
    if id == "missing" {
        AxumStatusCode::NOT_FOUND
    } else {
        AxumStatusCode::NO_CONTENT
    }
}

async fn handle_watch(State(state): State<GatewayFixture>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_frames(socket, state))
}

async fn stream_frames(mut socket: WebSocket, state: GatewayFixture) {
    if *state.garbage_first_frame.lock().await {
        let _ = socket.send(WsMessage::Text("not a store event".to_string())).await;
        return;
    }
    let frames = state.watch_frames.lock().await.clone();
    for frame in frames {
        let Ok(text) = serde_json::to_string(&frame) else {
            return;
        };
        if socket.send(WsMessage::Text(text)).await.is_err() {
            return;
        }
    }
    let _ = socket.send(WsMessage::Close(None)).await;
}

async fn spawn_gateway(state: GatewayFixture) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new()
        .route("/collections/:collection/documents", get(handle_fetch))
        .route(
            "/collections/:collection/documents/:id",
            patch(handle_patch).delete(handle_delete),
        )
        .route("/collections/:collection/watch", get(handle_watch))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn snapshot_frame(ids: &[&str]) -> StoreEvent {
    StoreEvent::Snapshot(CollectionSnapshot::new(
        "appointments",
        ids.iter()
            .map(|id| RawDocument::new(*id, fields(json!({ "status": "upcoming" }))))
            .collect(),
    ))
}

#[tokio::test]
async fn fetch_parses_the_ordered_result_set() {
    let fixture = GatewayFixture::default();
    let store = GatewayStore::new(spawn_gateway(fixture.clone()).await).expect("store");

    let snapshot = store
        .fetch(QueryDescriptor::new("appointments", "timestamp"))
        .await
        .expect("fetch");

    assert_eq!(snapshot.collection, "appointments");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(
        fixture.fetch_queries.lock().await.clone(),
        vec!["appointments?order_by=timestamp".to_string()]
    );
}

#[tokio::test]
async fn fetch_surfaces_a_gateway_rejection() {
    let store = GatewayStore::new(spawn_gateway(GatewayFixture::default()).await).expect("store");

    let err = store
        .fetch(QueryDescriptor::new("appointments", "unindexed"))
        .await
        .expect_err("must fail");
    match err {
        StoreError::Rejected(api) => {
            assert_eq!(api.code, ErrorCode::InvalidQuery);
            assert_eq!(api.message, "cannot order by unindexed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn watch_streams_snapshots_until_the_error_frame() {
    let fixture = GatewayFixture::default();
    *fixture.watch_frames.lock().await = vec![
        snapshot_frame(&["appt-1"]),
        snapshot_frame(&["appt-1", "appt-2"]),
        StoreEvent::Error(ApiError::new(ErrorCode::Unavailable, "gateway restarting")),
    ];
    let store = GatewayStore::new(spawn_gateway(fixture).await).expect("store");

    let mut feed = store
        .watch(QueryDescriptor::new("appointments", "timestamp"))
        .await
        .expect("watch");

    match feed.next_event().await {
        Some(WatchEvent::Snapshot(snapshot)) => assert_eq!(snapshot.len(), 1),
        other => panic!("expected first snapshot, got {other:?}"),
    }
    match feed.next_event().await {
        Some(WatchEvent::Snapshot(snapshot)) => assert_eq!(snapshot.len(), 2),
        other => panic!("expected second snapshot, got {other:?}"),
    }
    match feed.next_event().await {
        Some(WatchEvent::Failed(StoreError::Transport(message))) => {
            assert_eq!(message, "gateway restarting");
        }
        other => panic!("expected terminal failure, got {other:?}"),
    }
    assert!(feed.next_event().await.is_none());
}

#[tokio::test]
async fn watch_ends_quietly_when_the_server_closes() {
    let fixture = GatewayFixture::default();
    *fixture.watch_frames.lock().await = vec![snapshot_frame(&["appt-1"])];
    let store = GatewayStore::new(spawn_gateway(fixture).await).expect("store");

    let mut feed = store
        .watch(QueryDescriptor::new("appointments", "timestamp"))
        .await
        .expect("watch");

    assert!(matches!(
        feed.next_event().await,
        Some(WatchEvent::Snapshot(_))
    ));
    assert!(feed.next_event().await.is_none());
}

#[tokio::test]
async fn watch_fails_on_an_undecodable_frame() {
    let fixture = GatewayFixture::default();
    *fixture.garbage_first_frame.lock().await = true;
    let store = GatewayStore::new(spawn_gateway(fixture).await).expect("store");

    let mut feed = store
        .watch(QueryDescriptor::new("appointments", "timestamp"))
        .await
        .expect("watch");

    match feed.next_event().await {
        Some(WatchEvent::Failed(StoreError::Transport(message))) => {
            assert!(message.contains("invalid store event"), "got: {message}");
        }
        other => panic!("expected terminal failure, got {other:?}"),
    }
}

#[tokio::test]
async fn update_sends_the_field_mapping_body() {
    let fixture = GatewayFixture::default();
    let store = GatewayStore::new(spawn_gateway(fixture.clone()).await).expect("store");

    store
        .update(
            "appointments",
            &DocumentId::new("appt-1"),
            fields(json!({ "notes": "rescheduled", "appointmentTime": "14:00" })),
        )
        .await
        .expect("update");

    let patches = fixture.patches.lock().await.clone();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].0, "appointments");
    assert_eq!(patches[0].1, "appt-1");
    assert_eq!(
        patches[0].2,
        json!({ "fields": { "notes": "rescheduled", "appointmentTime": "14:00" } })
    );
}

#[tokio::test]
async fn update_maps_missing_document_to_not_found() {
    let store = GatewayStore::new(spawn_gateway(GatewayFixture::default()).await).expect("store");

    let err = store
        .update(
            "appointments",
            &DocumentId::new("missing"),
            fields(json!({ "notes": "x" })),
        )
        .await
        .expect_err("must fail");
    match err {
        StoreError::NotFound { collection, id } => {
            assert_eq!(collection, "appointments");
            assert_eq!(id.as_str(), "missing");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn update_surfaces_a_gateway_rejection() {
    let store = GatewayStore::new(spawn_gateway(GatewayFixture::default()).await).expect("store");

    let err = store
        .update(
            "appointments",
            &DocumentId::new("locked"),
            fields(json!({ "notes": "x" })),
        )
        .await
        .expect_err("must fail");
    match err {
        StoreError::Rejected(api) => {
            assert_eq!(api.code, ErrorCode::Validation);
            assert_eq!(api.message, "appointment can no longer be edited");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn delete_treats_a_missing_document_as_done() {
    let fixture = GatewayFixture::default();
    let store = GatewayStore::new(spawn_gateway(fixture.clone()).await).expect("store");

    store
        .delete("appointments", &DocumentId::new("appt-1"))
        .await
        .expect("delete existing");
    store
        .delete("appointments", &DocumentId::new("missing"))
        .await
        .expect("delete missing");

    assert_eq!(
        fixture.deletes.lock().await.clone(),
        vec![
            ("appointments".to_string(), "appt-1".to_string()),
            ("appointments".to_string(), "missing".to_string()),
        ]
    );
}

#[tokio::test]
async fn blank_query_parts_fail_before_any_request() {
    let fixture = GatewayFixture::default();
    let store = GatewayStore::new(spawn_gateway(fixture.clone()).await).expect("store");

    let err = store
        .fetch(QueryDescriptor::new("appointments", ""))
        .await
        .expect_err("must fail");
    assert!(matches!(err, StoreError::InvalidQuery(_)));
    assert!(fixture.fetch_queries.lock().await.is_empty());
}

#[test]
fn base_url_must_be_http_or_https() {
    let err = GatewayStore::new("ftp://gateway.example").expect_err("must fail");
    assert!(matches!(err, StoreError::Transport(_)));

    let err = GatewayStore::new("not a url").expect_err("must fail");
    assert!(matches!(err, StoreError::Transport(_)));

    assert!(GatewayStore::new("http://127.0.0.1:9000/").is_ok());
}
