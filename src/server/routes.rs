//! Proxy and session HTTP surface.
//!
//! Two proxy endpoints (`/api/chat`, `/api/tts`) keep service credentials
//! server-side, and a per-user session surface exposes the lifecycle
//! operations. Each user gets one lazily created [`ChatManager`], bootstrapped
//! under the managers lock so concurrent first requests cannot seed duplicate
//! default sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::chat::{ChatManager, ChatSession, ModelClient, Part, Role, SessionStore, Turn};
use crate::services::files;
use crate::services::gemini::GeminiClient;
use crate::services::tts::TtsClient;

use super::error::ApiError;

/// Resident per-user managers are capped; past this, an idle one is evicted
/// before a new user's manager is created. Evicted state is rebuilt from the
/// store on the user's next request.
const MAX_RESIDENT_MANAGERS: usize = 256;

#[derive(Clone)]
pub struct AppState {
    store: SessionStore,
    gemini: GeminiClient,
    tts: TtsClient,
    managers: Arc<Mutex<HashMap<String, Arc<ChatManager<GeminiClient>>>>>,
}

impl AppState {
    pub fn new(store: SessionStore, gemini: GeminiClient, tts: TtsClient) -> Self {
        Self {
            store,
            gemini,
            tts,
            managers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get or create the bootstrapped manager for a user. The map lock is held
    /// across bootstrap so two racing first requests see one default session.
    async fn manager_for(&self, user_id: &str) -> Result<Arc<ChatManager<GeminiClient>>, ApiError> {
        if user_id.trim().is_empty() {
            return Err(ApiError::bad_request("user id must not be empty"));
        }

        let mut managers = self.managers.lock().await;
        if let Some(manager) = managers.get(user_id) {
            return Ok(Arc::clone(manager));
        }

        if managers.len() >= MAX_RESIDENT_MANAGERS {
            evict_idle_manager(&mut managers);
        }

        let manager = Arc::new(ChatManager::new(
            user_id,
            self.store.clone(),
            self.gemini.clone(),
        ));
        manager.bootstrap().await?;
        managers.insert(user_id.to_string(), Arc::clone(&manager));
        info!("session manager ready for user {}", user_id);
        Ok(manager)
    }
}

/// Drop one manager with no unsynced sessions. Dirty managers are never
/// evicted: their caches hold turns the store does not have yet.
fn evict_idle_manager(managers: &mut HashMap<String, Arc<ChatManager<GeminiClient>>>) {
    let Some(user_id) = managers
        .iter()
        .find(|(_, manager)| !manager.has_dirty_sessions())
        .map(|(user_id, _)| user_id.clone())
    else {
        return;
    };
    info!("evicting idle session manager for user {}", user_id);
    managers.remove(&user_id);
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_proxy))
        .route("/api/tts", post(tts_proxy))
        .route(
            "/api/users/{user_id}/chats",
            get(list_chats).post(create_chat),
        )
        .route(
            "/api/users/{user_id}/chats/{chat_id}",
            delete(delete_chat),
        )
        .route(
            "/api/users/{user_id}/chats/{chat_id}/select",
            post(select_chat),
        )
        .route(
            "/api/users/{user_id}/chats/{chat_id}/rename",
            post(rename_chat),
        )
        .route(
            "/api/users/{user_id}/chats/{chat_id}/messages",
            post(send_message),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `POST /api/chat` `{ history: [...] }` -> `{ text }`.
async fn chat_proxy(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let history = body
        .get("history")
        .filter(|h| h.is_array())
        .cloned()
        .ok_or_else(|| ApiError::bad_request("history must be an array"))?;
    let history: Vec<Turn> = serde_json::from_value(history)
        .map_err(|e| ApiError::bad_request(format!("malformed history: {}", e)))?;

    let text = state.gemini.generate(&history).await?;
    Ok(Json(json!({ "text": text })))
}

#[derive(Debug, Deserialize)]
struct TtsRequest {
    #[serde(default)]
    text: String,
}

/// `POST /api/tts` `{ text }` -> `{ audioContent }` (base64 MP3).
async fn tts_proxy(
    State(state): State<AppState>,
    Json(body): Json<TtsRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.text.trim().is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }

    let audio = state.tts.synthesize(&body.text).await?;
    Ok(Json(json!({ "audioContent": audio })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatListResponse {
    chats: HashMap<String, ChatSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_chat_id: Option<String>,
}

async fn list_chats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ChatListResponse>, ApiError> {
    let manager = state.manager_for(&user_id).await?;
    Ok(Json(ChatListResponse {
        chats: manager.chats().as_ref().clone(),
        active_chat_id: manager.active_chat_id(),
    }))
}

async fn create_chat(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    let manager = state.manager_for(&user_id).await?;
    let session = manager.new_chat().await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn select_chat(
    State(state): State<AppState>,
    Path((user_id, chat_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let manager = state.manager_for(&user_id).await?;
    manager.select_chat(&chat_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    #[serde(default)]
    title: String,
}

async fn rename_chat(
    State(state): State<AppState>,
    Path((user_id, chat_id)): Path<(String, String)>,
    Json(body): Json<RenameRequest>,
) -> Result<StatusCode, ApiError> {
    let manager = state.manager_for(&user_id).await?;
    manager.rename_chat(&chat_id, &body.title).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    active_chat_id: Option<String>,
}

/// Deleting the active session elects a successor; the response reports which
/// session is active afterwards.
async fn delete_chat(
    State(state): State<AppState>,
    Path((user_id, chat_id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let manager = state.manager_for(&user_id).await?;
    manager.delete_chat(&chat_id).await?;
    Ok(Json(DeleteResponse {
        active_chat_id: manager.active_chat_id(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentUpload {
    file_name: String,
    mime_type: String,
    /// Raw file bytes, base64-encoded for transport.
    data: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    #[serde(default)]
    parts: Vec<Part>,
    #[serde(default)]
    attachments: Vec<AttachmentUpload>,
    timestamp: Option<u64>,
}

/// Append a user turn to an explicit session and run the full turn pipeline.
/// The turn is pinned to the path's chat id; the select only moves the
/// active-session pointer. Attachments are validated and encoded into parts
/// before anything mutates.
async fn send_message(
    State(state): State<AppState>,
    Path((user_id, chat_id)): Path<(String, String)>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    let mut parts = body.parts;
    for attachment in &body.attachments {
        let bytes = BASE64
            .decode(attachment.data.as_bytes())
            .map_err(|e| ApiError::bad_request(format!("invalid attachment encoding: {}", e)))?;
        parts.push(files::file_to_part(
            &attachment.file_name,
            &attachment.mime_type,
            &bytes,
        )?);
    }
    if parts.is_empty() {
        return Err(ApiError::bad_request("message has no content"));
    }

    let manager = state.manager_for(&user_id).await?;
    manager.select_chat(&chat_id)?;

    let turn = Turn {
        role: Role::User,
        parts,
        timestamp: body.timestamp.unwrap_or_else(now_ms),
    };

    // The target is pinned to the path's chat id; a concurrent select from
    // the same user cannot reroute this turn.
    match manager.send_message_to(&chat_id, turn).await? {
        Some(session) => Ok(Json(session).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{DEFAULT_CHAT_TITLE, MODEL_ERROR_REPLY};
    use crate::services::config::{GeminiConfig, TtsConfig};
    use axum::body::Body;
    use axum::http::{Request, header};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open_local(&dir.path().join("chats.db"))
            .await
            .unwrap();
        let gemini = GeminiClient::new(GeminiConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: String::new(),
            model: "test-model".into(),
        });
        let tts = TtsClient::new(TtsConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: String::new(),
        });
        (AppState::new(store, gemini, tts), dir)
    }

    async fn test_router() -> (Router, TempDir) {
        let (state, dir) = test_state().await;
        (router(state), dir)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn chat_proxy_rejects_non_array_history() {
        let (app, _dir) = test_router().await;
        let response = app
            .oneshot(post_json("/api/chat", json!({ "history": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("history"));
    }

    #[tokio::test]
    async fn chat_proxy_without_key_is_an_internal_error() {
        let (app, _dir) = test_router().await;
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "history": [{ "role": "user", "parts": [{ "text": "hi" }] }] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn chat_proxy_is_post_only() {
        let (app, _dir) = test_router().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/chat")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn tts_rejects_empty_text() {
        let (app, _dir) = test_router().await;
        let response = app
            .oneshot(post_json("/api/tts", json!({ "text": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn first_list_bootstraps_a_default_chat() {
        let (app, _dir) = test_router().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/users/u1/chats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let chats = body["chats"].as_object().unwrap();
        assert_eq!(chats.len(), 1);
        let (id, chat) = chats.iter().next().unwrap();
        assert_eq!(chat["title"], DEFAULT_CHAT_TITLE);
        assert_eq!(body["activeChatId"], *id);
    }

    #[tokio::test]
    async fn create_then_select_and_rename() {
        let (app, _dir) = test_router().await;

        let response = app
            .clone()
            .oneshot(post_json("/api/users/u1/chats", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let chat_id = created["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/users/u1/chats/{}/select", chat_id),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/users/u1/chats/{}/rename", chat_id),
                json!({ "title": "Lease review" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/users/u1/chats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["chats"][&chat_id]["title"], "Lease review");
        assert_eq!(body["activeChatId"], chat_id);
    }

    #[tokio::test]
    async fn selecting_an_unknown_chat_is_404() {
        let (app, _dir) = test_router().await;
        let response = app
            .oneshot(post_json("/api/users/u1/chats/chat_missing/select", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn renaming_to_blank_is_400() {
        let (app, _dir) = test_router().await;
        let response = app
            .clone()
            .oneshot(post_json("/api/users/u1/chats", json!({})))
            .await
            .unwrap();
        let created = body_json(response).await;
        let chat_id = created["id"].as_str().unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/api/users/u1/chats/{}/rename", chat_id),
                json!({ "title": "   " }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deleting_the_active_chat_reports_the_successor() {
        let (app, _dir) = test_router().await;

        // Bootstrap (one default chat) plus an explicitly created one.
        let response = app
            .clone()
            .oneshot(post_json("/api/users/u1/chats", json!({})))
            .await
            .unwrap();
        let created = body_json(response).await;
        let new_id = created["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/users/u1/chats/{}", new_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let successor = body["activeChatId"].as_str().unwrap();
        assert_ne!(successor, new_id);
    }

    #[tokio::test]
    async fn send_without_key_stores_the_fallback_reply() {
        let (app, _dir) = test_router().await;

        let response = app
            .clone()
            .oneshot(post_json("/api/users/u1/chats", json!({})))
            .await
            .unwrap();
        let created = body_json(response).await;
        let chat_id = created["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(post_json(
                &format!("/api/users/u1/chats/{}/messages", chat_id),
                json!({ "parts": [{ "text": "What is a lien?" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let session = body_json(response).await;
        let messages = session["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "model");
        assert_eq!(messages[1]["parts"][0]["text"], MODEL_ERROR_REPLY);
        assert_eq!(session["title"], "What is a lien?");
    }

    #[tokio::test]
    async fn send_is_not_rerouted_by_an_interleaved_select() {
        let (app, _dir) = test_router().await;

        let response = app
            .clone()
            .oneshot(post_json("/api/users/u1/chats", json!({})))
            .await
            .unwrap();
        let target = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post_json("/api/users/u1/chats", json!({})))
            .await
            .unwrap();
        let other = body_json(response).await["id"].as_str().unwrap().to_string();

        // Another request moves the active pointer before the send runs.
        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/users/u1/chats/{}/select", other),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/users/u1/chats/{}/messages", target),
                json!({ "parts": [{ "text": "Hello" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session = body_json(response).await;
        assert_eq!(session["id"], target);
        assert_eq!(session["messages"].as_array().unwrap().len(), 2);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/users/u1/chats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["chats"][&other]["messages"].as_array().unwrap().len(), 0);
        assert_eq!(body["chats"][&target]["title"], "Hello");
    }

    #[tokio::test]
    async fn unsupported_attachment_type_is_400() {
        let (app, _dir) = test_router().await;

        let response = app
            .clone()
            .oneshot(post_json("/api/users/u1/chats", json!({})))
            .await
            .unwrap();
        let created = body_json(response).await;
        let chat_id = created["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(post_json(
                &format!("/api/users/u1/chats/{}/messages", chat_id),
                json!({
                    "attachments": [{
                        "fileName": "notes.txt",
                        "mimeType": "text/plain",
                        "data": "aGVsbG8=",
                    }]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn image_attachment_lands_as_an_inline_part() {
        let (app, _dir) = test_router().await;

        let response = app
            .clone()
            .oneshot(post_json("/api/users/u1/chats", json!({})))
            .await
            .unwrap();
        let created = body_json(response).await;
        let chat_id = created["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(post_json(
                &format!("/api/users/u1/chats/{}/messages", chat_id),
                json!({
                    "parts": [{ "text": "What does this clause say?" }],
                    "attachments": [{
                        "fileName": "scan.png",
                        "mimeType": "image/png",
                        "data": "QUJD",
                    }]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let session = body_json(response).await;
        let user_parts = session["messages"][0]["parts"].as_array().unwrap();
        assert_eq!(user_parts.len(), 2);
        assert_eq!(user_parts[1]["inlineData"]["mimeType"], "image/png");
    }

    #[tokio::test]
    async fn evicted_manager_is_rebuilt_from_the_store() {
        let (state, _dir) = test_state().await;

        let manager = state.manager_for("u1").await.unwrap();
        let chat_id = manager.active_chat_id().unwrap();
        manager.rename_chat(&chat_id, "Lease review").await.unwrap();

        {
            let mut managers = state.managers.lock().await;
            evict_idle_manager(&mut managers);
            assert!(managers.is_empty());
        }

        let rebuilt = state.manager_for("u1").await.unwrap();
        assert_eq!(rebuilt.chats().len(), 1);
        assert_eq!(rebuilt.get_chat(&chat_id).unwrap().title, "Lease review");
    }

    #[tokio::test]
    async fn managers_with_unsynced_sessions_are_never_evicted() {
        let (state, _dir) = test_state().await;

        let manager = state.manager_for("u1").await.unwrap();
        let chat_id = manager.active_chat_id().unwrap();

        // Pull the row out from under the manager so the send's persist
        // fails and the session stays ahead of the store.
        state.store.delete_chat("u1", &chat_id).await.unwrap();
        manager
            .send_message_to(&chat_id, Turn::user_text("Hello", 1))
            .await
            .unwrap();
        assert!(manager.has_dirty_sessions());

        let mut managers = state.managers.lock().await;
        evict_idle_manager(&mut managers);
        assert!(managers.contains_key("u1"));
    }

    #[tokio::test]
    async fn blank_user_id_is_rejected() {
        let (app, _dir) = test_router().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/users/%20/chats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
