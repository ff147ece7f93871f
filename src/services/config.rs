//! Shared configuration loading for the model, speech, store, and server.
//!
//! Service credentials live only in the environment; nothing here is ever
//! echoed back over the HTTP surface.

use std::path::PathBuf;

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro-latest";
const DEFAULT_TTS_BASE_URL: &str = "https://texttospeech.googleapis.com/v1";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_DB_PATH: &str = "savedata/chats.db";

/// Gemini model endpoint configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Google Cloud text-to-speech endpoint configuration.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Local libsql fallback path; ignored when `TURSO_DATABASE_URL` is set.
    pub db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini: GeminiConfig,
    pub tts: TtsConfig,
    pub server: ServerConfig,
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Load configuration from `.env`/environment.
///
/// Reads:
/// - `GEMINI_API_KEY` (fallback: `API_KEY`), `GEMINI_BASE_URL`, `GEMINI_MODEL`
/// - `TTS_API_KEY` (fallback: `GOOGLE_TTS_API_KEY`, then the Gemini key)
/// - `LAWLENS_BIND_ADDR`, `LAWLENS_DB_PATH`
/// - `TURSO_DATABASE_URL` / `TURSO_AUTH_TOKEN` are read by the store itself.
pub fn load_config() -> AppConfig {
    let _ = dotenvy::dotenv();

    let gemini_api_key = std::env::var("GEMINI_API_KEY")
        .or_else(|_| std::env::var("API_KEY"))
        .unwrap_or_default();

    let gemini = GeminiConfig {
        base_url: normalize_base_url(
            &std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string()),
        ),
        api_key: gemini_api_key.clone(),
        model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string()),
    };

    let tts = TtsConfig {
        base_url: normalize_base_url(
            &std::env::var("TTS_BASE_URL").unwrap_or_else(|_| DEFAULT_TTS_BASE_URL.to_string()),
        ),
        api_key: std::env::var("TTS_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_TTS_API_KEY"))
            .unwrap_or(gemini_api_key),
    };

    let server = ServerConfig {
        bind_addr: std::env::var("LAWLENS_BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
        db_path: std::env::var("LAWLENS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH)),
    };

    AppConfig { gemini, tts, server }
}
