//! Model collaborator client: Gemini `generateContent` over REST.
//!
//! This layer only marshals the full ordered turn history and unmarshals the
//! text result; all reasoning belongs to the remote service.

use serde_json::{Value, json};

use super::config::GeminiConfig;
use super::prompts;
use crate::chat::{ModelClient, Turn};

#[derive(Debug, Clone)]
pub enum ModelError {
    MissingApiKey,
    Request { message: String },
    Upstream { status: u16, detail: String },
    EmptyResponse,
}

impl ModelError {
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    pub fn upstream(status: u16, detail: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "Gemini API key is not configured"),
            Self::Request { message } => write!(f, "Model request failed: {}", message),
            Self::Upstream { status, detail } => {
                write!(f, "Model upstream error (status {}): {}", status, detail)
            }
            Self::EmptyResponse => write!(f, "Model returned no text"),
        }
    }
}

impl std::error::Error for ModelError {}

#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }
}

/// Wire body for `generateContent`: every turn of the history (text and
/// inline attachments alike) plus the fixed system instruction.
fn build_request(history: &[Turn]) -> Value {
    let contents: Vec<Value> = history
        .iter()
        .map(|turn| json!({ "role": turn.role, "parts": turn.parts }))
        .collect();

    json!({
        "contents": contents,
        "systemInstruction": {
            "parts": [{ "text": prompts::SYSTEM_INSTRUCTION }]
        }
    })
}

fn extract_text(body: &Value) -> Result<String, ModelError> {
    let parts = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or(ModelError::EmptyResponse)?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(ModelError::EmptyResponse);
    }
    Ok(text)
}

impl ModelClient for GeminiClient {
    async fn generate(&self, history: &[Turn]) -> Result<String, ModelError> {
        if self.config.api_key.is_empty() {
            return Err(ModelError::MissingApiKey);
        }

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&build_request(history))
            .send()
            .await
            .map_err(|e| ModelError::request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::upstream(status.as_u16(), detail));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ModelError::request(e.to_string()))?;
        extract_text(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Part, Role, Turn};

    #[test]
    fn request_carries_full_history_and_system_instruction() {
        let history = vec![
            Turn::user_text("What is a lien?", 1),
            Turn::model_text("A lien is...", 2),
            Turn {
                role: Role::User,
                parts: vec![Part::inline_data("image/png", "QUJD")],
                timestamp: 3,
            },
        ];

        let body = build_request(&history);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert!(
            body["systemInstruction"]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Lawlens")
        );
    }

    #[test]
    fn extract_text_joins_candidate_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "there" }] }
            }]
        });
        assert_eq!(extract_text(&body).unwrap(), "Hello there");
    }

    #[test]
    fn extract_text_rejects_an_empty_candidate() {
        let body = json!({ "candidates": [] });
        assert!(matches!(
            extract_text(&body),
            Err(ModelError::EmptyResponse)
        ));
    }
}
