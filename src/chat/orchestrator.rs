//! The message-turn send pipeline.
//!
//! Per send: append the user turn optimistically (deriving a title on the
//! first turn), write through to the store, invoke the model with the full
//! ordered history, then append and persist the model turn. Any model-side
//! failure is converted into a fixed apology turn so a session never ends on
//! an unanswered user turn. At most one send runs per session at a time.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;

use super::ChatError;
use super::manager::ChatManager;
use super::store::now_ms;
use super::title;
use super::types::{ChatSession, ChatUpdate, Turn};
use crate::services::gemini::ModelError;

/// Fixed user-facing reply substituted when the model call fails.
pub const MODEL_ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// The remote model collaborator: takes the full ordered turn history,
/// returns the reply text. All reasoning lives behind this seam.
pub trait ModelClient: Send + Sync {
    fn generate(
        &self,
        history: &[Turn],
    ) -> impl Future<Output = Result<String, ModelError>> + Send;
}

/// Marks a chat id busy for the duration of one send.
struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<String>>,
    chat_id: String,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a Mutex<HashSet<String>>, chat_id: &str) -> Result<Self, ChatError> {
        let mut set = busy
            .lock()
            .map_err(|_| ChatError::internal("Busy registry lock poisoned"))?;
        if !set.insert(chat_id.to_string()) {
            return Err(ChatError::session_busy("A send is already in flight for this chat"));
        }
        Ok(Self {
            busy,
            chat_id: chat_id.to_string(),
        })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.busy.lock() {
            set.remove(&self.chat_id);
        }
    }
}

impl<M: ModelClient> ChatManager<M> {
    /// Send one user turn into the active session.
    ///
    /// Returns `Ok(None)` (a deliberate no-op) when there is no signed-in
    /// user or no active session.
    pub async fn send_message(&self, turn: Turn) -> Result<Option<ChatSession>, ChatError> {
        let Some(chat_id) = self.cache.active_chat_id() else {
            return Ok(None);
        };
        self.send_message_to(&chat_id, turn).await
    }

    /// Send one user turn into a named session.
    ///
    /// The target is fixed by `chat_id`, so a concurrent selection change
    /// cannot reroute the turn. Store-write failures are logged and the
    /// session marked dirty; the optimistic local state is kept so the
    /// conversation stays coherent, and the next send re-persists it.
    pub async fn send_message_to(
        &self,
        chat_id: &str,
        turn: Turn,
    ) -> Result<Option<ChatSession>, ChatError> {
        if self.user_id().trim().is_empty() {
            return Ok(None);
        }
        let _busy = BusyGuard::acquire(&self.busy, chat_id)?;
        let Some(mut session) = self.cache.get(chat_id) else {
            return Ok(None);
        };

        if self.is_dirty(chat_id) {
            self.retry_dirty_persist(chat_id, &session).await;
        }

        let is_first = session.messages.is_empty();
        session.messages.push(turn);
        let derived_title = if is_first {
            title::derive_title(&session.messages[0])
        } else {
            None
        };
        if let Some(t) = derived_title.as_deref() {
            session.title = t.to_string();
        }
        self.cache.insert(session.clone());

        self.persist_messages(chat_id, &session, derived_title).await;

        let reply = match self.model.generate(&session.messages).await {
            Ok(text) => text,
            Err(err) => {
                log::error!("Model call for {} failed: {}", chat_id, err);
                MODEL_ERROR_REPLY.to_string()
            }
        };

        session.messages.push(Turn::model_text(reply, now_ms()));
        self.cache.insert(session.clone());

        self.persist_messages(chat_id, &session, None).await;

        Ok(Some(session))
    }

    async fn persist_messages(
        &self,
        chat_id: &str,
        session: &ChatSession,
        title: Option<String>,
    ) {
        let update = ChatUpdate {
            title,
            messages: Some(session.messages.clone()),
        };
        match self.store.update_chat(self.user_id(), chat_id, update).await {
            Ok(()) => self.clear_dirty(chat_id),
            Err(err) => {
                log::error!("Persisting messages for {} failed: {}", chat_id, err);
                self.mark_dirty(chat_id);
            }
        }
    }

    /// Re-persist the full sequence of a session whose last write failed,
    /// before accepting a new turn.
    async fn retry_dirty_persist(&self, chat_id: &str, session: &ChatSession) {
        let update = ChatUpdate {
            title: Some(session.title.clone()),
            messages: Some(session.messages.clone()),
        };
        match self.store.update_chat(self.user_id(), chat_id, update).await {
            Ok(()) => {
                log::info!("Recovered dirty session {}", chat_id);
                self.clear_dirty(chat_id);
            }
            Err(err) => log::warn!("Dirty session re-persist for {} failed: {}", chat_id, err),
        }
    }
}
