//! Chat-completions transport.
//!
//! [`ChatBackend`] is the seam the generator talks through. [`OpenAiChat`]
//! speaks the OpenAI-compatible `POST /chat/completions` protocol, which
//! OpenRouter and Ollama's `/v1` endpoint both serve.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use opencraft_shared::{GeneratorConfig, OpenCraftError, Result, api_key_from_env};

/// User-Agent string for provider requests.
pub(crate) const USER_AGENT: &str = concat!("OpenCraft/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body echoed back into an error message.
const ERROR_BODY_PREVIEW: usize = 200;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Anything that can answer a conversation with a single reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the conversation and return the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiChat {
    /// Build a client from the `[generator]` config section. The API key is
    /// read from the configured env var; a missing key sends no auth header.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OpenCraftError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key_from_env(&config.api_key_env),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    #[instrument(skip_all, fields(model = %self.model, turns = messages.len()))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OpenCraftError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let preview: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(OpenCraftError::Network(format!(
                "{}: HTTP {status}: {preview}",
                self.endpoint
            )));
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            OpenCraftError::Network(format!("{}: invalid completion body: {e}", self.endpoint))
        })?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        debug!(chars = reply.len(), "completion received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> GeneratorConfig {
        GeneratorConfig {
            base_url: format!("{}/v1/", server.uri()),
            model: "test-model".into(),
            api_key_env: "OC_TEST_CHAT_KEY_UNSET_4242".into(),
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[tokio::test]
    async fn complete_returns_first_choice() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "Combine Fire and Water."}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "{\"name\":\"Steam\",\"emoji\":\"💨\"}"}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let chat = OpenAiChat::from_config(&config_for(&server)).unwrap();
        let reply = chat
            .complete(&[ChatMessage::user("Combine Fire and Water.")])
            .await
            .unwrap();
        assert!(reply.contains("Steam"));
    }

    #[tokio::test]
    async fn http_error_becomes_network_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let chat = OpenAiChat::from_config(&config_for(&server)).unwrap();
        let err = chat
            .complete(&[ChatMessage::user("Combine Fire and Water.")])
            .await
            .unwrap_err();
        assert!(matches!(err, OpenCraftError::Network(_)));
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn empty_choices_yield_empty_reply() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let chat = OpenAiChat::from_config(&config_for(&server)).unwrap();
        let reply = chat.complete(&[ChatMessage::user("x")]).await.unwrap();
        assert!(reply.is_empty());
    }
}
