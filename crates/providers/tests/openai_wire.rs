//! Wire tests against a local OpenAI-compatible stub server.

use std::sync::{Arc, Mutex};

use axum::{Json, Router, extract::State, http::HeaderMap, http::StatusCode, routing::post};
use parlor_core::error::ProviderError;
use parlor_core::message::Message;
use parlor_core::provider::{ModelHandle, Provider, ToolDefinition};
use parlor_providers::OpenAiCompatProvider;
use serde_json::{Value, json};

#[derive(Default)]
struct Seen {
    bodies: Vec<Value>,
    auth: Vec<String>,
}

type Shared = Arc<Mutex<Seen>>;

async fn chat(State(seen): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut seen = seen.lock().unwrap();
    seen.auth.push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    );
    seen.bodies.push(body.clone());

    if body["model"] == "busy-model" {
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": "slow down" })));
    }
    if body["model"] == "broken-model" {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" })));
    }

    (
        StatusCode::OK,
        Json(json!({
            "model": "stub-model",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "RAG_handbook", "arguments": "{\"query\":\"vacation\"}" }
                    }]
                }
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        })),
    )
}

async fn embeddings(Json(body): Json<Value>) -> Json<Value> {
    let data: Vec<Value> = body["input"]
        .as_array()
        .map(|inputs| {
            inputs
                .iter()
                .enumerate()
                .map(|(i, _)| json!({ "embedding": [i as f32, 1.0] }))
                .collect()
        })
        .unwrap_or_default();
    Json(json!({ "model": body["model"], "data": data }))
}

async fn spawn_stub() -> (String, Shared) {
    let seen: Shared = Arc::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .route("/v1/embeddings", post(embeddings))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1/"), seen)
}

fn handle(base_url: &str, model: &str) -> ModelHandle {
    let provider = OpenAiCompatProvider::new("stub", base_url, "sk-test").unwrap();
    ModelHandle::new(Arc::new(provider), model)
        .with_temperature(0.2)
        .with_max_tokens(256)
        .with_embedding_model("embed-small")
}

#[tokio::test]
async fn completion_sends_tools_and_parses_tool_calls() {
    let (base_url, seen) = spawn_stub().await;
    let model = handle(&base_url, "chat-model");

    let request = model.request(
        vec![Message::system("Be brief."), Message::user("How much vacation?")],
        vec![ToolDefinition {
            name: "RAG_handbook".into(),
            description: "RAG over 'handbook'.".into(),
            parameters: json!({ "type": "object" }),
        }],
    );
    let response = model.provider.complete(request).await.unwrap();

    assert_eq!(response.model, "stub-model");
    assert_eq!(response.message.content, "");
    assert_eq!(response.message.tool_calls.len(), 1);
    assert_eq!(response.message.tool_calls[0].name, "RAG_handbook");
    assert_eq!(response.usage.unwrap().total_tokens, 15);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.auth, vec!["Bearer sk-test".to_string()]);
    let body = &seen.bodies[0];
    assert_eq!(body["model"], "chat-model");
    assert_eq!(body["max_tokens"], 256);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["tools"][0]["function"]["name"], "RAG_handbook");
}

#[tokio::test]
async fn error_statuses_are_mapped() {
    let (base_url, _) = spawn_stub().await;

    let busy = handle(&base_url, "busy-model");
    let err = busy
        .provider
        .complete(busy.request(vec![Message::user("hi")], vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));

    let broken = handle(&base_url, "broken-model");
    let err = broken
        .provider
        .complete(broken.request(vec![Message::user("hi")], vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::ApiError { status_code: 500, .. }));
}

#[tokio::test]
async fn embeddings_keep_input_order() {
    let (base_url, _) = spawn_stub().await;
    let model = handle(&base_url, "chat-model");

    let vectors = model
        .embed(vec!["query".into(), "chunk a".into(), "chunk b".into()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0]]);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let provider = OpenAiCompatProvider::new("down", "http://127.0.0.1:1/v1", "sk").unwrap();
    let model = ModelHandle::new(Arc::new(provider), "m");
    let err = model
        .provider
        .complete(model.request(vec![Message::user("hi")], vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Network(_)));
}
