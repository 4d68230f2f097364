//! Google Gemini `generateContent` provider

use async_trait::async_trait;
use metamind_shared::ToolType;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{error_message, templates, LlmError, LlmProvider};

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

pub struct GeminiProvider {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiProvider {
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
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, tool: ToolType, idea: &str) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey("Gemini"));
        }

        // Gemini gets the system and user prompts as one turn
        let prompt = format!(
            "{}\n\n{}",
            templates::system_prompt(tool),
            templates::user_prompt(tool, idea)
        );
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt) }],
            }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let response = self
            .http_client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
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

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_generate_joins_parts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
            .match_header("x-goog-api-key", "g-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "candidates": [{
                        "content": { "role": "model", "parts": [{ "text": "## Design " }, { "text": "system" }] }
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = GeminiProvider::new(Client::new(), "g-test", server.url(), "gemini-2.0-flash");
        let text = provider.generate(ToolType::Lovable, "a portfolio").await.unwrap();

        assert_eq!(text, "## Design system");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_blocked_response_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
            .with_status(200)
            .with_body(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#)
            .create_async()
            .await;

        let provider = GeminiProvider::new(Client::new(), "g-test", server.url(), "gemini-2.0-flash");
        assert!(matches!(
            provider.generate(ToolType::V0, "idea").await,
            Err(LlmError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
            .with_status(400)
            .with_body(json!({ "error": { "code": 400, "message": "API key not valid" } }).to_string())
            .create_async()
            .await;

        let provider = GeminiProvider::new(Client::new(), "bad", server.url(), "gemini-2.0-flash");
        match provider.generate(ToolType::V0, "idea").await {
            Err(LlmError::Status { status: 400, message }) => assert_eq!(message, "API key not valid"),
            other => panic!("expected Status, got {:?}", other),
        }
    }
}
