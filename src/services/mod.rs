pub mod config;
pub mod files;
pub mod gemini;
pub mod prompts;
pub mod tts;
