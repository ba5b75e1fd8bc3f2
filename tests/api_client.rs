use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mermaid_fix::api::{ApiClient, ChatMessage, CompletionRequest, CompletionService};
use mermaid_fix::config::AiConfig;
use mermaid_fix::error::ApiError;
use mermaid_fix::mermaid::{collect_stream, RepairRequest, Repairer};
use mermaid_fix::notify::{NotificationKind, RecordingNotifier};

fn config(provider: &str, server: &MockServer, key: &str) -> AiConfig {
    AiConfig {
        provider: provider.to_string(),
        model: "test-model".to_string(),
        api_url: server.uri(),
        api_key: key.to_string(),
        models: vec![],
    }
}

fn client(config: &AiConfig) -> ApiClient {
    ApiClient::new(config, Duration::from_secs(5)).unwrap()
}

fn request(model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system("You repair Mermaid diagrams."),
            ChatMessage::user("graph TD; A--B;"),
        ],
        temperature: 0.1,
        stream: true,
    }
}

/// One `chat.completion.chunk` event with the fields OpenAI always sends.
fn openai_chunk(delta: serde_json::Value, finish_reason: Option<&str>) -> String {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "gpt-test",
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
    })
    .to_string()
}

fn sse(events: &[&str]) -> ResponseTemplate {
    let body: String = events.iter().map(|e| format!("data: {}\n\n", e)).collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_raw(body, "text/event-stream")
}

#[tokio::test]
async fn openai_stream_is_collected_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-test", "stream": true })))
        .respond_with(sse(&[
            &openai_chunk(json!({ "role": "assistant" }), None),
            &openai_chunk(json!({ "content": "graph TD;" }), None),
            &openai_chunk(json!({ "content": " A-->B;" }), None),
            &openai_chunk(json!({}), Some("stop")),
            "[DONE]",
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&config("openai", &server, "sk-test"));
    let stream = client.stream_completion(request("gpt-test")).await.unwrap();
    let text = collect_stream(stream).await.unwrap();

    assert_eq!(text, "graph TD; A-->B;");
}

#[tokio::test]
async fn claude_events_are_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "claude-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-test",
            "system": "You repair Mermaid diagrams.",
            "stream": true
        })))
        .respond_with(sse(&[
            r#"{"type":"message_start","message":{"id":"msg_1"}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"flowchart LR\n"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"  A --> B"}}"#,
            r#"{"type":"message_stop"}"#,
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&config("claude", &server, "claude-key"));
    let stream = client.stream_completion(request("claude-test")).await.unwrap();

    assert_eq!(collect_stream(stream).await.unwrap(), "flowchart LR\n  A --> B");
}

#[tokio::test]
async fn error_status_fails_the_openai_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = client(&config("openai", &server, "sk-test"));
    let stream = client.stream_completion(request("gpt-test")).await.unwrap();
    let err = collect_stream(stream).await.unwrap_err();

    assert_matches!(err, ApiError::OpenAI(_));
    assert!(err.to_string().contains("500"), "unexpected error: {}", err);
}

#[tokio::test]
async fn claude_error_status_is_reported_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded_error"))
        .mount(&server)
        .await;

    let client = client(&config("claude", &server, "claude-key"));
    let err = client.stream_completion(request("claude-test")).await.err().unwrap();

    assert_matches!(
        err,
        ApiError::Status { status: 529, ref body, .. } if body == "overloaded_error"
    );
}

#[tokio::test]
async fn error_event_inside_the_stream_fails_collection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse(&[
            &openai_chunk(json!({ "content": "graph" }), None),
            r#"{"error":{"message":"overloaded"}}"#,
        ]))
        .mount(&server)
        .await;

    let client = client(&config("ollama", &server, ""));
    let stream = client.stream_completion(request("llama3")).await.unwrap();

    assert!(collect_stream(stream).await.is_err());
}

#[tokio::test]
async fn openai_stream_cut_before_done_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse(&[
            &openai_chunk(json!({ "content": "graph TD;" }), None),
            &openai_chunk(json!({ "content": " A--" }), None),
        ]))
        .mount(&server)
        .await;

    let client = client(&config("openai", &server, "sk-test"));
    let stream = client.stream_completion(request("gpt-test")).await.unwrap();

    assert!(collect_stream(stream).await.is_err());
}

#[tokio::test]
async fn claude_stream_cut_before_message_stop_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse(&[
            r#"{"type":"message_start","message":{"id":"msg_1"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"flowchart LR\n  A --"}}"#,
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&config("claude", &server, "claude-key"));
    let stream = client.stream_completion(request("claude-test")).await.unwrap();

    assert_matches!(
        collect_stream(stream).await,
        Err(ApiError::Stream(msg)) if msg == "stream ended before completion"
    );
}

#[tokio::test]
async fn truncated_answer_during_repair_keeps_the_original() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse(&[&openai_chunk(json!({ "content": "graph TD; A" }), None)]))
        .mount(&server)
        .await;

    let notifier = Arc::new(RecordingNotifier::new());
    let service = Arc::new(client(&config("openai", &server, "sk-test")));
    let repairer = Repairer::new(service, notifier.clone());

    let original = "graph TD; A--B;";
    let repaired = repairer
        .repair(&RepairRequest::new(original, "Parse error on line 1"), "m1", None)
        .await;

    assert_eq!(repaired, original);
    assert!(notifier.of_kind(NotificationKind::Success).is_empty());
    assert_eq!(notifier.of_kind(NotificationKind::Error).len(), 1);
}

#[tokio::test]
#[serial]
async fn hosted_provider_without_key_is_rejected_before_sending() {
    std::env::remove_var("OPENAI_API_KEY");
    std::env::remove_var("MERMAID_FIX_API_KEY");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&config("openai", &server, ""));
    let err = client.stream_completion(request("gpt-test")).await.err().unwrap();

    assert_matches!(err, ApiError::MissingApiKey(provider) if provider == "OpenAI");
}

#[tokio::test]
async fn http_failure_during_repair_keeps_the_original() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "m1", "stream": true })))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = Arc::new(RecordingNotifier::new());
    let service = Arc::new(client(&config("openai", &server, "sk-test")));
    let repairer = Repairer::new(service, notifier.clone());

    let original = "graph TD; A--B;";
    let repaired = repairer
        .repair(&RepairRequest::new(original, "Parse error on line 1"), "m1", None)
        .await;

    assert_eq!(repaired, original);
    let errors = notifier.of_kind(NotificationKind::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("503"));
}
