//! Completion module for Inkwell — chat-completion provider access
//!
//! Provides a `CompletionClient` trait with an implementation for any
//! OpenAI-compatible `/chat/completions` endpoint. Structured output is
//! requested by forcing a single tool call whose arguments follow a JSON
//! schema; free-text output returns the assistant message verbatim.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::config::CompletionConfig;
use crate::models::Message;

// ============================================================================
// CompletionClient trait
// ============================================================================

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion over `transcript`. With a `schema`, the result is
    /// `Completion::Structured` and carries every field the schema requires.
    async fn complete(
        &self,
        transcript: &[Message],
        schema: Option<&StructuredOutput>,
    ) -> Result<Completion, CompletionError>;

    /// Client name for logging.
    fn name(&self) -> &str;
}

/// A named JSON schema the model must fill in.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutput {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl StructuredOutput {
    pub fn required_fields(&self) -> Vec<&str> {
        self.parameters["required"]
            .as_array()
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Check that `arguments` is an object carrying every required field.
    pub fn validate(&self, arguments: &Value) -> Result<(), CompletionError> {
        let object = arguments.as_object().ok_or_else(|| {
            CompletionError::InvalidArguments(format!("expected a JSON object, got {}", arguments))
        })?;
        for field in self.required_fields() {
            if !object.contains_key(field) {
                return Err(CompletionError::MissingField(field.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Structured(Value),
}

impl Completion {
    pub fn into_text(self) -> Result<String, CompletionError> {
        match self {
            Completion::Text(text) => Ok(text),
            Completion::Structured(_) => Err(CompletionError::InvalidArguments(
                "expected free text, got structured output".to_string(),
            )),
        }
    }

    pub fn into_structured(self) -> Result<Value, CompletionError> {
        match self {
            Completion::Structured(value) => Ok(value),
            Completion::Text(_) => Err(CompletionError::InvalidArguments(
                "expected structured output, got free text".to_string(),
            )),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Completion response contained no usable message")]
    EmptyResponse,

    #[error("Completion is missing required field '{0}'")]
    MissingField(String),

    #[error("Completion arguments are invalid: {0}")]
    InvalidArguments(String),

    #[error("Completion does not contain a ```html fenced block")]
    MissingHtmlBlock,

    #[error("All {attempts} completion attempts failed")]
    RetryExhausted { attempts: usize },
}

impl CompletionError {
    /// Network failures and rate-limit / server-side statuses are worth
    /// another attempt; anything about the content of a reply is not.
    pub fn is_transient(&self) -> bool {
        match self {
            CompletionError::Http(e) => !e.is_decode(),
            CompletionError::Api { code, .. } => {
                matches!(*code, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// The model answered, but not in the shape we asked for.
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            CompletionError::EmptyResponse
                | CompletionError::MissingField(_)
                | CompletionError::InvalidArguments(_)
                | CompletionError::MissingHtmlBlock
        )
    }
}

// ============================================================================
// OpenAI wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice<'a>>,
}

#[derive(Debug, Serialize)]
struct Tool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolChoiceFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ToolChoiceFunction<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiClient
// ============================================================================

/// Chat-completion client for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    config: CompletionConfig,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        let api_key = config.resolved_api_key();
        if api_key.is_empty() {
            return Err(CompletionError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn complete_once(
        &self,
        transcript: &[Message],
        schema: Option<&StructuredOutput>,
    ) -> Result<Completion, CompletionError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let request = ChatRequest {
            model: &self.config.model,
            messages: transcript,
            tools: schema.map(|s| {
                vec![Tool {
                    kind: "function",
                    function: FunctionSpec {
                        name: &s.name,
                        description: &s.description,
                        parameters: &s.parameters,
                    },
                }]
            }),
            tool_choice: schema.map(|s| ToolChoice {
                kind: "function",
                function: ToolChoiceFunction { name: &s.name },
            }),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Completion API error");

            return Err(CompletionError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let chat: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            CompletionError::InvalidArguments(format!("unparseable completion body: {}", e))
        })?;
        let message = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(CompletionError::EmptyResponse)?;

        match schema {
            Some(schema) => {
                let call = message
                    .tool_calls
                    .iter()
                    .find(|c| c.function.name == schema.name)
                    .or_else(|| message.tool_calls.first())
                    .ok_or(CompletionError::EmptyResponse)?;
                let arguments: Value = serde_json::from_str(&call.function.arguments)
                    .map_err(|e| CompletionError::InvalidArguments(e.to_string()))?;
                schema.validate(&arguments)?;
                Ok(Completion::Structured(arguments))
            }
            None => match message.content {
                Some(text) if !text.trim().is_empty() => Ok(Completion::Text(text)),
                _ => Err(CompletionError::EmptyResponse),
            },
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        transcript: &[Message],
        schema: Option<&StructuredOutput>,
    ) -> Result<Completion, CompletionError> {
        let attempts = self.config.max_attempts.max(1);
        let retry_strategy =
            FixedInterval::from_millis(self.config.retry_delay_ms).take(attempts - 1);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.complete_once(transcript, schema),
            |e: &CompletionError| {
                let retry = e.is_transient();
                if retry {
                    tracing::warn!(error = %e, "Transient completion failure, retrying");
                }
                retry
            },
        )
        .await;

        match result {
            Ok(completion) => Ok(completion),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    attempts,
                    error = %e,
                    "All completion attempts failed"
                );
                Err(CompletionError::RetryExhausted { attempts })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str, base_url: String) -> CompletionConfig {
        CompletionConfig {
            base_url,
            model: "gpt-4o-mini".to_string(),
            api_key: Some(api_key.to_string()),
            max_attempts: 3,
            retry_delay_ms: 10,
            timeout_seconds: 5,
        }
    }

    fn transcript() -> Vec<Message> {
        vec![Message::system("You are a storyteller."), Message::user("Begin.")]
    }

    fn beat_schema() -> StructuredOutput {
        StructuredOutput {
            name: "play_story".to_string(),
            description: "Emit a beat".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "choice_A": { "type": "string" },
                    "choice_B": { "type": "string" },
                    "is_over": { "type": "boolean" }
                },
                "required": ["content", "choice_A", "choice_B", "is_over"]
            }),
        }
    }

    fn text_response(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    fn tool_response(arguments: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "play_story",
                            "arguments": arguments.to_string()
                        }
                    }]
                }
            }]
        })
    }

    #[tokio::test]
    async fn test_text_completion_returns_content() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key", mock_server.uri()))
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "You are a storyteller." },
                    { "role": "user", "content": "Begin." }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("hello")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.complete(&transcript(), None).await;
        assert_eq!(result.unwrap(), Completion::Text("hello".to_string()));
    }

    #[tokio::test]
    async fn test_structured_completion_forces_tool_call() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key", mock_server.uri())).unwrap();
        let arguments = serde_json::json!({
            "content": "The moon rises.",
            "choice_A": "Howl",
            "choice_B": "Hide",
            "is_over": false
        });

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "tool_choice": { "type": "function", "function": { "name": "play_story" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_response(arguments.clone())))
            .mount(&mock_server)
            .await;

        let schema = beat_schema();
        let result = client.complete(&transcript(), Some(&schema)).await.unwrap();
        assert_eq!(result, Completion::Structured(arguments));
    }

    #[tokio::test]
    async fn test_missing_field_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_response(
                serde_json::json!({ "content": "x", "choice_A": "y", "is_over": false }),
            )))
            .expect(1)
            .mount(&mock_server)
            .await;

        let schema = beat_schema();
        match client.complete(&transcript(), Some(&schema)).await {
            Err(CompletionError::MissingField(field)) => assert_eq!(field, "choice_B"),
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_exhausts_three_attempts() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "Internal server error", "type": "server_error" }
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        match client.complete(&transcript(), None).await {
            Err(CompletionError::RetryExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("ok")))
            .mount(&mock_server)
            .await;

        let result = client.complete(&transcript(), None).await;
        assert_eq!(result.unwrap(), Completion::Text("ok".to_string()));
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "bad model" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete(&transcript(), None).await {
            Err(CompletionError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "bad model");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway page</html>"))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete(&transcript(), None).await {
            Err(e @ CompletionError::InvalidArguments(_)) => {
                assert!(e.is_schema_violation());
                assert!(!e.is_transient());
            }
            other => panic!("Expected InvalidArguments, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        std::env::remove_var("OPENAI_API_KEY");
        let config = test_config("", "http://localhost".to_string());
        match OpenAiClient::new(config) {
            Err(CompletionError::MissingApiKey) => {}
            other => panic!("Expected MissingApiKey, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(CompletionError::Api { code: 429, message: String::new() }.is_transient());
        assert!(CompletionError::Api { code: 503, message: String::new() }.is_transient());
        assert!(!CompletionError::Api { code: 401, message: String::new() }.is_transient());
        assert!(!CompletionError::MissingHtmlBlock.is_transient());
        assert!(CompletionError::MissingHtmlBlock.is_schema_violation());
        assert!(CompletionError::MissingField("content".into()).is_schema_violation());
        assert!(!CompletionError::RetryExhausted { attempts: 3 }.is_schema_violation());
    }
}
