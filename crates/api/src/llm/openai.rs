//! OpenAI chat completions provider

use async_trait::async_trait;
use metamind_shared::ToolType;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{error_message, templates, LlmError, LlmProvider};

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1500;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiProvider {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        http_client: Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, tool: ToolType, idea: &str) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey("OpenAI"));
        }

        let user_prompt = templates::user_prompt(tool, idea);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: templates::system_prompt(tool),
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn provider(base_url: &str) -> OpenAiProvider {
        OpenAiProvider::new(Client::new(), "sk-test", base_url, "gpt-4o-mini")
    }

    #[tokio::test]
    async fn test_generate_sends_chat_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 1500,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{ "message": { "role": "assistant", "content": "## Build a todo app" } }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let text = provider(&server.url())
            .generate(ToolType::Cursor, "a todo app")
            .await
            .unwrap();

        assert_eq!(text, "## Build a todo app");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_carries_provider_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(json!({ "error": { "message": "Rate limit reached" } }).to_string())
            .create_async()
            .await;

        let err = provider(&server.url())
            .generate(ToolType::V0, "idea")
            .await
            .unwrap_err();
        match err {
            LlmError::Status { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let err = provider(&server.url())
            .generate(ToolType::V0, "idea")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let provider = OpenAiProvider::new(Client::new(), "", "http://127.0.0.1:9", "gpt-4o-mini");
        assert!(matches!(
            provider.generate(ToolType::V0, "idea").await,
            Err(LlmError::MissingApiKey("OpenAI"))
        ));
    }
}
