//! Speech collaborator client: Google Cloud `text:synthesize` over REST.
//!
//! Invoked only from the `/api/tts` proxy, never from the send pipeline.

use serde_json::{Value, json};

use super::config::TtsConfig;

#[derive(Debug, Clone)]
pub enum TtsError {
    MissingApiKey,
    Request { message: String },
    Upstream { status: u16, detail: String },
    EmptyResponse,
}

impl TtsError {
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

impl std::fmt::Display for TtsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "TTS API key is not configured"),
            Self::Request { message } => write!(f, "TTS request failed: {}", message),
            Self::Upstream { status, detail } => {
                write!(f, "TTS upstream error (status {}): {}", status, detail)
            }
            Self::EmptyResponse => write!(f, "TTS returned no audio"),
        }
    }
}

impl std::error::Error for TtsError {}

#[derive(Clone)]
pub struct TtsClient {
    config: TtsConfig,
    http: reqwest::Client,
}

impl TtsClient {
    pub fn new(config: TtsConfig) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    /// Synthesize `text` to MP3 audio, returned as the raw base64 string the
    /// upstream produces (passed through to the caller unchanged).
    pub async fn synthesize(&self, text: &str) -> Result<String, TtsError> {
        if self.config.api_key.is_empty() {
            return Err(TtsError::MissingApiKey);
        }

        let url = format!("{}/text:synthesize", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&build_request(text))
            .send()
            .await
            .map_err(|e| TtsError::request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TtsError::upstream(status.as_u16(), detail));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TtsError::request(e.to_string()))?;
        extract_audio(&body)
    }
}

fn build_request(text: &str) -> Value {
    json!({
        "input": { "text": text },
        "voice": { "languageCode": "en-US", "ssmlGender": "NEUTRAL" },
        "audioConfig": { "audioEncoding": "MP3" }
    })
}

fn extract_audio(body: &Value) -> Result<String, TtsError> {
    body.get("audioContent")
        .and_then(|a| a.as_str())
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .ok_or(TtsError::EmptyResponse)
}
