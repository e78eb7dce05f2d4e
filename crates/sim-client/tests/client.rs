//! Integration tests for SimClient against an in-process mock backend.
//!
//! Each test binds an axum router to an ephemeral port and points a real
//! client at it.

use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sim_client::{ErrorKind, ExecutionResult, SimClient};

/// Serve `app` on 127.0.0.1 and return its base URL.
async fn spawn_backend(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

async fn execute_handler(Json(body): Json<Value>) -> Json<Value> {
    match body["code"].as_str() {
        Some("MVI A, 05H") => Json(json!({
            "success": true,
            "registers": {"A": "05"},
            "flags": {"Z": true}
        })),
        Some(code) => Json(json!({
            "success": false,
            "error": {
                "type": "parse_error",
                "instruction": code,
                "position": 1,
                "line": code,
                "hint": "Check the mnemonic",
                "message": format!("Invalid instruction {}", code)
            }
        })),
        None => Json(json!({"error": true, "message": "missing code"})),
    }
}

fn mock_backend() -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/execute", post(execute_handler))
        .route(
            "/api/assemble",
            post(|Json(body): Json<Value>| async move {
                let code = body["code"].as_str().unwrap_or_default().to_string();
                Json(json!({
                    "status": "success",
                    "label": ["Address", "Instruction"],
                    "data": [["2000", code]]
                }))
            }),
        )
        .route(
            "/api/reset",
            post(|| async {
                Json(json!({
                    "success": true,
                    "message": "Components reset to default values",
                    "defaultState": {"registers": {"A": "00"}, "flags": {"Z": 0}, "memory": {}}
                }))
            }),
        )
        .route(
            "/api/docs/:instruction",
            get(|Path(instruction): Path<String>| async move {
                Json(json!({
                    "instruction": instruction,
                    "documentation": "Copy register contents.\nNotes:\n    1 byte"
                }))
            }),
        )
        .route(
            "/api/timing/:instruction",
            get(|Path(instruction): Path<String>| async move {
                if instruction == "MOV" {
                    (
                        StatusCode::OK,
                        Json(json!({
                            "instruction": "MOV",
                            "format": "base64",
                            "diagram": "data:image/png;base64,iVBORw0KGgo="
                        })),
                    )
                } else {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({
                            "detail": format!("Timing diagram for instruction '{}' not found", instruction)
                        })),
                    )
                }
            }),
        )
}

#[tokio::test]
async fn test_execute_flat_response() {
    let base = spawn_backend(mock_backend()).await;
    let client = SimClient::new(&base).unwrap();

    let exec = client.execute("MVI A, 05H").await;

    assert!(matches!(exec.result, ExecutionResult::Success { .. }));
    let state = exec.state.expect("processor state forwarded");
    assert_eq!(state.registers.unwrap()["A"], "05");
    assert!(state.flags.unwrap()["Z"]);
}

#[tokio::test]
async fn test_execute_domain_error() {
    let base = spawn_backend(mock_backend()).await;
    let client = SimClient::new(&base).unwrap();

    let exec = client.execute("FOO").await;

    assert!(exec.state.is_none());
    let error = exec.result.as_error().unwrap();
    assert_eq!(error.kind, ErrorKind::Domain);
    assert_eq!(error.message, "Invalid instruction FOO");
    let detail = error.detail.as_ref().unwrap();
    assert_eq!(detail.position.as_deref(), Some("1"));
    assert_eq!(detail.hint.as_deref(), Some("Check the mnemonic"));
}

#[tokio::test]
async fn test_execute_non_json_is_server_error() {
    let app = Router::new().route(
        "/api/execute",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error") }),
    );
    let base = spawn_backend(app).await;
    let client = SimClient::new(&base).unwrap();

    let exec = client.execute("MVI A, 05H").await;

    let error = exec.result.as_error().unwrap();
    assert_eq!(error.kind, ErrorKind::Server);
    let detail = error.detail.as_ref().unwrap();
    assert_eq!(detail.line.as_deref(), Some("MVI A, 05H"));
    assert!(detail.hint.as_ref().unwrap().contains("syntax"));
}

#[tokio::test]
async fn test_execute_timeout_is_network_error() {
    let app = Router::new().route(
        "/api/execute",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"success": true}))
        }),
    );
    let base = spawn_backend(app).await;
    let client = SimClient::new(&base)
        .unwrap()
        .with_timeout(Duration::from_millis(100));

    let exec = client.execute("NOP").await;

    let error = exec.result.as_error().unwrap();
    assert_eq!(error.kind, ErrorKind::Network);
    assert_eq!(error.message, "Request timeout after 100ms");
    assert!(error
        .detail
        .as_ref()
        .unwrap()
        .hint
        .as_ref()
        .unwrap()
        .contains("backend server is running"));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Bind then drop to obtain a port with nothing listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = SimClient::new(&format!("http://{}", addr)).unwrap();

    let exec = client.execute("NOP").await;
    assert_eq!(exec.result.error_kind(), Some(ErrorKind::Network));
    assert!(exec
        .result
        .as_error()
        .unwrap()
        .message
        .starts_with("Failed to connect to backend"));

    let docs = client.get_docs("MOV").await;
    assert_eq!(docs.error_kind(), Some(ErrorKind::Network));

    assert!(!client.health().await);
}

#[tokio::test]
async fn test_docs_and_timing() {
    let base = spawn_backend(mock_backend()).await;
    let client = SimClient::new(&base).unwrap();

    match client.get_docs("MOV").await {
        ExecutionResult::Docs {
            instruction,
            sections,
        } => {
            assert_eq!(instruction, "MOV");
            assert_eq!(sections.description, "Copy register contents.");
            assert_eq!(sections.notes, vec!["1 byte"]);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    assert!(matches!(
        client.get_timing_diagram("MOV").await,
        ExecutionResult::TimingDiagram { .. }
    ));

    // 404 bodies are still parsed
    let missing = client.get_timing_diagram("XYZ").await;
    let error = missing.as_error().unwrap();
    assert_eq!(error.title.as_deref(), Some("Timing Diagram Error"));
    assert!(error.message.contains("XYZ"));
}

#[tokio::test]
async fn test_assemble_and_reset() {
    let base = spawn_backend(mock_backend()).await;
    let client = SimClient::new(&base).unwrap();

    match client.assemble("HLT").await {
        ExecutionResult::AssemblyTable { labels, rows } => {
            assert_eq!(labels, vec!["Address", "Instruction"]);
            assert_eq!(rows, vec![vec!["2000".to_string(), "HLT".to_string()]]);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let reset = client.reset().await;
    assert!(matches!(reset.result, ExecutionResult::Success { .. }));
    assert_eq!(reset.state.unwrap().flags.unwrap()["Z"], false);
}

#[tokio::test]
async fn test_health() {
    let base = spawn_backend(mock_backend()).await;
    let client = SimClient::new(&base).unwrap();
    assert!(client.health().await);
}
