//! Integration tests for the session WebSocket + REST surface.
//!
//! Each test spins up a fake analysis service and the session router on
//! random ports, then drives the real HTTP / WS contract end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use portfolio_poll::api::session_routes;
use portfolio_poll::config::{PollerConfig, SourceConfig};
use portfolio_poll::poller::SessionManager;
use portfolio_poll::source::{HttpResultSource, ResultSource};
use portfolio_poll::subtask::SubtaskName;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Fake analysis service: job `demo` delivers `a`, then `b` with a stop
/// hint; job `down` always fails.
async fn results(
    Path(job): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if job == "down" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "analysis worker crashed"})),
        );
    }

    let body = match params.get("since").map(String::as_str) {
        None => json!({
            "newResults": {"a": {"value": 1}},
            "nextCursor": 1,
            "scheduling": {"recommendation": "aggressive"}
        }),
        Some("1") => json!({
            "newResults": {"b": "{\"value\": 2}"},
            "nextCursor": 2,
            "scheduling": {"recommendation": "stop"}
        }),
        Some(_) => json!({"newResults": {}, "nextCursor": 3}),
    };
    (StatusCode::OK, Json(body))
}

async fn spawn(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Start the fake service and the session server, return the session port.
async fn start_server() -> u16 {
    let upstream = spawn(Router::new().route("/api/analysis/{job}/results", get(results))).await;

    let source_config = SourceConfig {
        base_url: format!("http://127.0.0.1:{upstream}"),
        api_key: None,
        request_timeout: Duration::from_secs(2),
    };
    let poller_config = PollerConfig {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        aggressive_delay: Duration::from_millis(10),
        moderate_delay: Duration::from_millis(20),
        gentle_delay: Duration::from_millis(30),
        ..PollerConfig::default()
    };

    let source: Arc<dyn ResultSource> = Arc::new(HttpResultSource::new(&source_config).unwrap());
    let sessions = SessionManager::with_subtasks(
        source,
        poller_config,
        vec![SubtaskName::from("a"), SubtaskName::from("b")],
    );
    let port = spawn(session_routes(sessions)).await;

    // Give the servers a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Poll the REST snapshot until `done` holds.
async fn wait_for_snapshot(port: u16, done: impl Fn(&Value) -> bool) -> Value {
    let client = reqwest::Client::new();
    loop {
        let snap: Value = client
            .get(format!("http://127.0.0.1:{port}/api/session"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if done(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

// ── REST Tests ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_responds() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;
        let body: Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn idle_snapshot_before_any_job() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;
        let snap = wait_for_snapshot(port, |_| true).await;
        assert_eq!(snap["connection"], "idle");
        assert!(snap["job_id"].is_null());
        assert!(snap["loading_started_at"].is_null());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_start_polls_job_to_completion() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://127.0.0.1:{port}/api/session"))
            .json(&json!({"job_id": "demo"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "started");
        let run_id = body["run_id"].clone();

        let snap = wait_for_snapshot(port, |s| s["progress"] == 100).await;
        assert_eq!(snap["run_id"], run_id);
        assert_eq!(snap["job_id"], "demo");
        assert_eq!(snap["connection"], "idle");
        assert_eq!(snap["results"]["a"]["value"], 1);
        assert_eq!(snap["results"]["b"]["value"], 2);
        assert!(snap["pending"].as_array().unwrap().is_empty());
        assert_eq!(snap["cursor"], "3");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_start_rejects_blank_job() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;
        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/session"))
            .json(&json!({"job_id": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failing_job_surfaces_error_state() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;
        reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/session"))
            .json(&json!({"job_id": "down"}))
            .send()
            .await
            .unwrap();

        let snap = wait_for_snapshot(port, |s| s["connection"] == "error").await;
        assert!(snap["last_error"].as_str().unwrap().contains("500"));
        assert_eq!(snap["pending"].as_array().unwrap().len(), 2);
        assert!(snap["loading_started_at"].is_null());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn delete_session_is_idempotent() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;
        let client = reqwest::Client::new();
        for _ in 0..2 {
            let resp = client
                .delete(format!("http://127.0.0.1:{port}/api/session"))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK);
        }
    })
    .await
    .expect("test timed out");
}

// ── WebSocket Tests ──────────────────────────────────────────────────

#[tokio::test]
async fn ws_connect_receives_snapshot() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .expect("WS connect failed");

        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);

        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["snapshot"]["connection"], "idle");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_start_streams_events_until_completed() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();

        // Consume the initial snapshot.
        let _ = ws.next().await.unwrap().unwrap();

        let action = json!({"type": "start", "job_id": "demo"}).to_string();
        ws.send(Message::Text(action.into())).await.unwrap();

        let mut types = Vec::new();
        let mut merged = Vec::new();
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            let json = parse_ws_json(&msg);
            let kind = json["type"].as_str().unwrap().to_string();
            if kind == "results_merged" {
                merged.push(json["progress"].as_u64().unwrap());
            }
            types.push(kind.clone());
            if kind == "completed" {
                assert_eq!(json["results"], 2);
                break;
            }
        }

        assert_eq!(types[0], "session_started");
        assert!(types.contains(&"poll_scheduled".to_string()));
        assert_eq!(merged, vec![50, 100]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_stop_action_stops_session() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
            .await
            .unwrap();
        let _ = ws.next().await.unwrap().unwrap();

        // Unknown frames are ignored.
        ws.send(Message::Text("{\"type\":\"dance\"}".into()))
            .await
            .unwrap();
        ws.send(Message::Text(json!({"type": "stop"}).to_string().into()))
            .await
            .unwrap();

        // Nothing was running, so the session stays idle and the socket stays open.
        let pong = ws.send(Message::Ping(vec![1, 2, 3].into())).await;
        assert!(pong.is_ok());

        let snap = wait_for_snapshot(port, |_| true).await;
        assert_eq!(snap["connection"], "idle");
    })
    .await
    .expect("test timed out");
}
