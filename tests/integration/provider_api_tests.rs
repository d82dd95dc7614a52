/*!
 * LLM provider clients against a fake HTTP API
 */

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use robaws_intake::database::models::IntakeSource;
use robaws_intake::providers::anthropic::Anthropic;
use robaws_intake::providers::openai::OpenAI;
use robaws_intake::providers::{CompletionRequest, ImageInput, Provider};
use robaws_intake::robaws::mock::MockRobaws;
use robaws_intake::{ExtractionData, IntakeStatus, ProviderError};

use crate::common::{acme_client, controller_with, create_temp_dir, test_config, INQUIRY_TEXT};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_openAI_complete_shouldSendBearerAndJsonMode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"contact\":{}}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAI::new("sk-test", server.uri(), "gpt-4o-mini", TIMEOUT);
    let response = provider
        .complete(CompletionRequest::new("Extract").json_mode())
        .await
        .unwrap();

    assert_eq!(response.text, "{\"contact\":{}}");
    assert_eq!(response.prompt_tokens, Some(120));
    assert_eq!(response.completion_tokens, Some(8));
}

#[tokio::test]
async fn test_openAI_complete_errorStatuses_shouldMapToProviderErrors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let provider = OpenAI::new("sk-wrong", server.uri(), "gpt-4o-mini", TIMEOUT);

    let first = provider.complete(CompletionRequest::new("x")).await.unwrap_err();
    assert!(matches!(first, ProviderError::AuthenticationError(ref body) if body == "bad key"));
    assert!(!first.is_retryable());

    let second = provider.complete(CompletionRequest::new("x")).await.unwrap_err();
    assert!(matches!(second, ProviderError::ApiError { status_code: 503, .. }));
    assert!(second.is_retryable());
}

#[tokio::test]
async fn test_anthropic_complete_shouldSendHeadersAndImages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ak-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "text", "text": "{\"vehicle\":"},
                {"type": "text", "text": "{\"make\":\"Nissan\"}}"}
            ],
            "usage": {"input_tokens": 900, "output_tokens": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Anthropic::new("ak-test", server.uri(), "claude-3-5-haiku-latest", TIMEOUT);
    let request = CompletionRequest::new("Read the photo")
        .images(vec![ImageInput::from_bytes("image/png", b"\x89PNG")]);
    let response = provider.complete(request).await.unwrap();

    assert_eq!(response.text, "{\"vehicle\":{\"make\":\"Nissan\"}}");
    assert_eq!(response.prompt_tokens, Some(900));

    let received = &server.received_requests().await.unwrap()[0];
    let body: serde_json::Value = serde_json::from_slice(&received.body).unwrap();
    let parts = body["messages"][0]["content"].as_array().unwrap();
    assert!(parts.iter().any(|p| p["type"] == "image"));
}

#[tokio::test]
async fn test_anthropic_rateLimited_shouldBeRetryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let provider = Anthropic::new("ak-test", server.uri(), "claude-3-5-haiku-latest", TIMEOUT);
    let err = provider.complete(CompletionRequest::new("x")).await.unwrap_err();

    assert!(matches!(err, ProviderError::RateLimitExceeded(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_pipeline_withOpenAIOverHttp_shouldMergeLlmFields() {
    let server = MockServer::start().await;
    let llm_json = json!({
        "contact": {"company": "Acme Trading BV"},
        "vehicle": {"condition": "used", "description": "Double cab pickup"},
        "shipment": {"pol": "Antwerp", "pod": "Lagos", "destination": "Abuja"}
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": llm_json.to_string()}}],
            "usage": {"prompt_tokens": 400, "completion_tokens": 60}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = create_temp_dir().unwrap();
    let mut config = test_config(dir.path());
    config.extraction.use_llm = true;
    let provider: Arc<dyn Provider> = Arc::new(OpenAI::new("sk-test", server.uri(), "gpt-4o-mini", TIMEOUT));
    let mock = MockRobaws::with_clients(vec![acme_client()]);
    let controller = controller_with(config, Arc::new(mock.clone()), Some(provider)).unwrap();

    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();
    assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Exported);

    let extraction = controller.show(&intake.id).await.unwrap().extraction.unwrap();
    assert_eq!(extraction.provider.as_deref(), Some("openai"));
    assert_eq!(extraction.model.as_deref(), Some("gpt-4o-mini"));
    let data: ExtractionData = serde_json::from_str(&extraction.data).unwrap();
    assert_eq!(data.shipment.destination.as_deref(), Some("Abuja"));
    assert_eq!(mock.offers()[0].1.extra_fields["FDEST"].string_value, "Abuja");
}
