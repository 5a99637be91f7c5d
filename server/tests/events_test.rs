//! HTTP-level tests for the event stream.

use std::collections::VecDeque;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use beacon_engine::{InboundMessage, SseDecoder, SseFrame};
use beacon_server::{build_router, AppState, BroadcastEvent, Config};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Reads SSE frames off a response body.
struct FrameReader {
    body: axum::body::BodyDataStream,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
}

impl FrameReader {
    fn new(body: Body) -> Self {
        Self {
            body: body.into_data_stream(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    async fn next(&mut self) -> SseFrame {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return frame;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(2), self.body.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("body error");
            self.pending.extend(self.decoder.feed(&chunk));
        }
    }
}

fn state() -> AppState {
    AppState::new(Config::default())
}

async fn open(state: &AppState, uri: &str, last_event_id: Option<&str>) -> (StatusCode, Body) {
    let mut request = Request::builder().uri(uri);
    if let Some(id) = last_event_id {
        request = request.header("Last-Event-ID", id);
    }
    let response = build_router(state.clone())
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    (response.status(), response.into_body())
}

async fn publish(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn health_reports_connected_clients() {
    let state = state();
    let response = build_router(state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connectedClients"], 0);
}

#[tokio::test]
async fn stream_starts_with_connected_frame() {
    let state = state();
    let (status, body) = open(&state, "/events", None).await;
    assert_eq!(status, StatusCode::OK);

    let mut reader = FrameReader::new(body);
    let frame = reader.next().await;
    assert_eq!(frame.event.as_deref(), Some("connected"));
    assert_eq!(frame.retry, Some(5_000));
    assert!(matches!(
        InboundMessage::parse(&frame).unwrap(),
        InboundMessage::Connected(_)
    ));
    assert_eq!(state.broadcaster.client_count(), 1);
}

#[tokio::test]
async fn subject_stream_only_sees_its_subject() {
    let state = state();
    let (_, body) = open(&state, "/events?subjectID=ORD-1", None).await;
    let mut reader = FrameReader::new(body);
    reader.next().await; // connected

    let (status, other) = publish(
        &state,
        "/subjects/ORD-2/events",
        json!({"eventType": "stage_change", "data": {"stage": "cut"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(other["delivered"], 0);

    let (_, global) = publish(&state, "/events", json!({"eventType": "order_created"})).await;
    assert_eq!(global["delivered"], 0);

    let (_, mine) = publish(
        &state,
        "/subjects/ORD-1/events",
        json!({"eventType": "stage_changed", "data": {"stage": "paint"}}),
    )
    .await;
    assert_eq!(mine["delivered"], 1);

    let frame = reader.next().await;
    assert_eq!(frame.id.as_deref(), Some("3"));
    match InboundMessage::parse(&frame).unwrap() {
        InboundMessage::Event { frame, .. } => {
            assert_eq!(frame.event_type, "stage_change");
            assert_eq!(frame.subject_id.as_deref(), Some("ORD-1"));
            assert_eq!(frame.data, json!({"stage": "paint"}));
        }
        other => panic!("expected event, got {other:?}"),
    }
}

#[tokio::test]
async fn event_type_filter_applies() {
    let state = state();
    let (_, body) = open(&state, "/events?eventTypes=order_created,payment_updated", None).await;
    let mut reader = FrameReader::new(body);
    reader.next().await;

    state
        .broadcaster
        .broadcast(BroadcastEvent::new("stage_change", json!({})))
        .unwrap();
    state
        .broadcaster
        .broadcast(BroadcastEvent::new("new_order", json!({"id": "ORD-3"})))
        .unwrap();

    let frame = reader.next().await;
    assert_eq!(frame.event.as_deref(), Some("order_created"));
}

#[tokio::test]
async fn last_event_id_header_replays_missed_events() {
    let state = state();
    for stage in ["cut", "sew", "pack"] {
        state
            .broadcaster
            .broadcast_to_subject("ORD-1", BroadcastEvent::new("stage_change", json!({ "stage": stage })))
            .unwrap();
    }

    let (_, body) = open(&state, "/events?subjectID=ORD-1", Some("1")).await;
    let mut reader = FrameReader::new(body);
    assert_eq!(reader.next().await.event.as_deref(), Some("connected"));
    assert_eq!(reader.next().await.id.as_deref(), Some("2"));
    assert_eq!(reader.next().await.id.as_deref(), Some("3"));
}

#[tokio::test]
async fn query_last_event_id_wins_over_header() {
    let state = state();
    for _ in 0..2 {
        state
            .broadcaster
            .broadcast(BroadcastEvent::new("order_updated", json!({})))
            .unwrap();
    }

    let (_, body) = open(&state, "/events?lastEventId=1", Some("0")).await;
    let mut reader = FrameReader::new(body);
    reader.next().await;
    assert_eq!(reader.next().await.id.as_deref(), Some("2"));
}

#[tokio::test]
async fn client_limit_returns_service_unavailable() {
    let state = AppState::new(Config {
        max_clients: 0,
        ..Config::default()
    });
    let (status, _) = open(&state, "/events", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn publish_rejects_blank_event_type() {
    let state = state();
    let (status, body) = publish(&state, "/events", json!({"eventType": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn dropped_stream_unregisters_client() {
    let state = state();
    let (_, body) = open(&state, "/events", None).await;
    assert_eq!(state.broadcaster.client_count(), 1);
    drop(body);
    assert_eq!(state.broadcaster.client_count(), 0);
}

#[tokio::test]
async fn clients_endpoint_reports_stats() {
    let state = state();
    let (_, _a) = open(&state, "/events?subjectID=ORD-1", None).await;
    let (_, _b) = open(&state, "/events", None).await;

    let response = build_router(state.clone())
        .oneshot(Request::builder().uri("/events/clients").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let stats: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(stats["clients"], 2);
    assert_eq!(stats["subjects"], 1);
}
