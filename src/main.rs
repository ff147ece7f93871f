use lawlens::server::{AppState, router};
use lawlens::services::config::load_config;
use lawlens::services::gemini::GeminiClient;
use lawlens::services::tts::TtsClient;

use lawlens::chat::SessionStore;
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config();

    if let Some(parent) = config.server.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SessionStore::open(&config.server.db_path).await?;

    let gemini = GeminiClient::new(config.gemini.clone());
    let tts = TtsClient::new(config.tts.clone());
    let app = router(AppState::new(store, gemini, tts));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(
        "listening on {} (model {})",
        config.server.bind_addr, config.gemini.model
    );
    axum::serve(listener, app).await?;
    Ok(())
}
