mod common;

use common::*;
use reddit_intel::config::LlmSettings;
use reddit_intel::llm_adapter::{complete_with_retry, OpenAiCompatibleGateway};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer, model: &str, api_key: Option<&str>) -> ProviderConfig {
    let settings = LlmSettings {
        provider: "openai-compatible".to_string(),
        base_url: Some(format!("{}/v1", server.uri())),
        model: Some(model.to_string()),
        api_key: api_key.map(str::to_string),
        timeout_seconds: 5,
        ..Default::default()
    };
    ProviderConfig::resolve(&settings, None).unwrap()
}

fn prompt() -> Prompt {
    Prompt {
        system: "You are an analyst.".to_string(),
        user: "Analyze this.".to_string(),
    }
}

fn chat_reply(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "model": "served-model",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
    })
}

#[tokio::test]
async fn test_completion_returns_text_and_usage() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("{\"opportunities\": []}")))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = OpenAiCompatibleGateway::new();
    let completion = gateway
        .complete(&prompt(), &provider(&server, "glm-4.7-flash", None))
        .await
        .unwrap();

    assert_eq!(completion.text, "{\"opportunities\": []}");
    assert_eq!(completion.usage.prompt_tokens, 120);
    assert_eq!(completion.usage.completion_tokens, 30);
    assert_eq!(completion.usage.total_tokens, 150);
    assert_eq!(completion.model, "served-model");
}

#[tokio::test]
async fn test_bearer_header_only_with_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = OpenAiCompatibleGateway::new();
    gateway
        .complete(&prompt(), &provider(&server, "gpt-4o-mini", Some("sk-test")))
        .await
        .unwrap();

    let keyless = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("ok")))
        .mount(&keyless)
        .await;
    gateway
        .complete(&prompt(), &provider(&keyless, "llama3.1", None))
        .await
        .unwrap();

    let requests = keyless.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_server_error_is_transient_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model is loading"))
        .mount(&server)
        .await;

    let err = OpenAiCompatibleGateway::new()
        .complete(&prompt(), &provider(&server, "default", None))
        .await
        .unwrap_err();
    match err {
        GatewayError::Transient(msg) => assert!(msg.contains("model is loading"), "{msg}"),
        other => panic!("expected transient, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = OpenAiCompatibleGateway::new()
        .complete(&prompt(), &provider(&server, "default", None))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transient(_)));
}

#[tokio::test]
async fn test_client_error_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"message": "Unsupported parameter: 'max_tokens'"}})),
        )
        .mount(&server)
        .await;

    let err = OpenAiCompatibleGateway::new()
        .complete(&prompt(), &provider(&server, "default", None))
        .await
        .unwrap_err();
    match err {
        GatewayError::Fatal(msg) => assert!(msg.contains("Unsupported parameter")),
        other => panic!("expected fatal, got {other:?}"),
    }
}

#[tokio::test]
async fn test_undecodable_success_body_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy login</html>"))
        .mount(&server)
        .await;

    let err = OpenAiCompatibleGateway::new()
        .complete(&prompt(), &provider(&server, "default", None))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Fatal(_)));
}

#[tokio::test]
async fn test_unreachable_backend_is_transient() {
    let settings = LlmSettings {
        provider: "vllm".to_string(),
        base_url: Some("http://127.0.0.1:1/v1".to_string()),
        timeout_seconds: 2,
        ..Default::default()
    };
    let config = ProviderConfig::resolve(&settings, None).unwrap();
    let err = OpenAiCompatibleGateway::new()
        .complete(&prompt(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transient(_)));
}

#[tokio::test]
async fn test_reasoning_model_request_omits_temperature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("ok")))
        .mount(&server)
        .await;

    let gateway = OpenAiCompatibleGateway::new();
    gateway
        .complete(&prompt(), &provider(&server, "openai/o3-mini", Some("k")))
        .await
        .unwrap();
    gateway
        .complete(&prompt(), &provider(&server, "gpt-4o-mini", Some("k")))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let reasoning: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(reasoning.get("temperature").is_none());
    assert!(reasoning.get("max_tokens").is_none());
    assert_eq!(reasoning["max_completion_tokens"], 8000);
    assert_eq!(reasoning["messages"][0]["role"], "system");

    let legacy: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert!(legacy.get("temperature").is_some());
    assert_eq!(legacy["max_tokens"], 8000);
}

#[tokio::test]
async fn test_reasoning_content_is_kept_apart_from_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "NO_INSIGHTS", "reasoning_content": "thinking..."}}]
        })))
        .mount(&server)
        .await;

    let completion = OpenAiCompatibleGateway::new()
        .complete(&prompt(), &provider(&server, "glm-4.7-flash", None))
        .await
        .unwrap();
    assert_eq!(completion.text, "NO_INSIGHTS");
    assert_eq!(completion.reasoning.as_deref(), Some("thinking..."));
    assert_eq!(completion.usage.total_tokens, 0);
    assert_eq!(completion.model, "glm-4.7-flash");
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_transient_errors() {
    let gateway = ScriptedGateway::new(vec![
        Err(GatewayError::Transient("HTTP 503".to_string())),
        Err(GatewayError::Transient("HTTP 503".to_string())),
        Ok(completion("{}", 1, 1)),
    ]);
    let config = ProviderConfig::resolve(&LlmSettings::default(), None).unwrap();

    let result = complete_with_retry(&gateway, &prompt(), &config, 3).await;
    assert!(result.is_ok());
    assert_eq!(gateway.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_and_never_retries_fatal() {
    let config = ProviderConfig::resolve(&LlmSettings::default(), None).unwrap();

    let flaky = ScriptedGateway::new(vec![
        Err(GatewayError::Transient("down".to_string())),
        Err(GatewayError::Transient("down".to_string())),
        Err(GatewayError::Transient("down".to_string())),
    ]);
    let err = complete_with_retry(&flaky, &prompt(), &config, 2).await.unwrap_err();
    assert!(matches!(err, GatewayError::Transient(_)));
    assert_eq!(flaky.call_count(), 3);

    let broken = ScriptedGateway::new(vec![Err(GatewayError::Fatal("HTTP 401".to_string()))]);
    let err = complete_with_retry(&broken, &prompt(), &config, 5).await.unwrap_err();
    assert!(matches!(err, GatewayError::Fatal(_)));
    assert_eq!(broken.call_count(), 1);
}
