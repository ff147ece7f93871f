//! Session lifecycle: bootstrap, selection, rename, delete.
//!
//! One `ChatManager` exists per signed-in user and owns that user's cache.
//! Lifecycle writes go store-first, then cache, so the durable state never
//! trails a cache claim of success; the reverse staleness (store ahead of
//! cache after a failed cache-side step) cannot occur because cache updates
//! are infallible.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::ChatError;
use super::cache::SessionCache;
use super::store::SessionStore;
use super::types::{ChatSession, ChatUpdate, NewChat};

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

pub struct ChatManager<M> {
    user_id: String,
    pub(super) store: SessionStore,
    pub(super) cache: SessionCache,
    pub(super) model: M,
    /// Chat ids with a send currently in flight.
    pub(super) busy: Mutex<HashSet<String>>,
    /// Chat ids whose optimistic cache state is ahead of the store after a
    /// failed write; re-persisted on the next send.
    dirty: Mutex<HashSet<String>>,
    /// Serializes bootstrap so a double sign-in cannot create two default
    /// sessions.
    init_lock: tokio::sync::Mutex<()>,
}

impl<M> ChatManager<M> {
    pub fn new(user_id: impl Into<String>, store: SessionStore, model: M) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            cache: SessionCache::new(),
            model,
            busy: Mutex::new(HashSet::new()),
            dirty: Mutex::new(HashSet::new()),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn chats(&self) -> Arc<HashMap<String, ChatSession>> {
        self.cache.snapshot()
    }

    pub fn active_chat_id(&self) -> Option<String> {
        self.cache.active_chat_id()
    }

    pub fn get_chat(&self, chat_id: &str) -> Option<ChatSession> {
        self.cache.get(chat_id)
    }

    /// Load all sessions for this user and pick the newest as active. When
    /// none exist, create exactly one default session.
    pub async fn bootstrap(&self) -> Result<(), ChatError> {
        let _init = self.init_lock.lock().await;

        let chats = self.store.list_chats(&self.user_id).await?;
        if chats.is_empty() {
            let session = self.create_default_chat().await?;
            let mut fresh = HashMap::new();
            fresh.insert(session.id.clone(), session.clone());
            self.cache.replace_all(fresh);
            self.cache.select(&session.id);
            return Ok(());
        }

        let newest = newest_chat_id(&chats);
        self.cache.replace_all(chats);
        match newest {
            Some(id) => self.cache.select(&id),
            None => self.cache.clear_active(),
        }
        Ok(())
    }

    async fn create_default_chat(&self) -> Result<ChatSession, ChatError> {
        let id = self
            .store
            .create_chat(
                &self.user_id,
                NewChat {
                    title: DEFAULT_CHAT_TITLE.to_string(),
                    messages: Vec::new(),
                },
            )
            .await?;

        // The creation timestamp is store-assigned and only visible on the
        // next read, so the local projection carries `None` until then.
        Ok(ChatSession {
            id,
            title: DEFAULT_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            created_at_ms: None,
        })
    }

    /// Explicit "new chat": create in the store, cache it, make it active.
    pub async fn new_chat(&self) -> Result<ChatSession, ChatError> {
        let session = self.create_default_chat().await?;
        self.cache.insert(session.clone());
        self.cache.select(&session.id);
        Ok(session)
    }

    /// Pure pointer change; no I/O.
    pub fn select_chat(&self, chat_id: &str) -> Result<(), ChatError> {
        if !self.cache.contains(chat_id) {
            return Err(ChatError::not_found("Chat not found"));
        }
        self.cache.select(chat_id);
        Ok(())
    }

    /// Best effort: store first, then cache. A store failure surfaces here
    /// and leaves the cache stale until the next reload.
    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<(), ChatError> {
        let title = title.lines().next().unwrap_or(title).trim();
        if title.is_empty() {
            return Err(ChatError::invalid_input("Title is empty"));
        }

        self.store
            .update_chat(
                &self.user_id,
                chat_id,
                ChatUpdate {
                    title: Some(title.to_string()),
                    messages: None,
                },
            )
            .await?;

        if let Some(mut session) = self.cache.get(chat_id) {
            session.title = title.to_string();
            self.cache.insert(session);
        }
        Ok(())
    }

    /// Delete store-first, then cache. Deleting the active session elects
    /// the newest remaining one, or creates a fresh default when none remain.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), ChatError> {
        self.store.delete_chat(&self.user_id, chat_id).await?;
        self.cache.remove(chat_id);
        self.clear_dirty(chat_id);

        if self.cache.active_chat_id().as_deref() == Some(chat_id) {
            let remaining = self.cache.snapshot();
            match newest_chat_id(&remaining) {
                Some(next) => self.cache.select(&next),
                None => {
                    let session = self.create_default_chat().await?;
                    self.cache.insert(session.clone());
                    self.cache.select(&session.id);
                }
            }
        }
        Ok(())
    }

    pub(super) fn mark_dirty(&self, chat_id: &str) {
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.insert(chat_id.to_string());
        }
    }

    pub(super) fn clear_dirty(&self, chat_id: &str) {
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.remove(chat_id);
        }
    }

    pub fn is_dirty(&self, chat_id: &str) -> bool {
        self.dirty
            .lock()
            .map(|dirty| dirty.contains(chat_id))
            .unwrap_or(false)
    }

    /// True while any session's optimistic state is ahead of the store.
    /// A poisoned lock reports dirty, so callers never discard unsynced state.
    pub fn has_dirty_sessions(&self) -> bool {
        self.dirty.lock().map(|dirty| !dirty.is_empty()).unwrap_or(true)
    }
}

fn newest_chat_id(chats: &HashMap<String, ChatSession>) -> Option<String> {
    chats
        .values()
        .max_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|s| s.id.clone())
}
