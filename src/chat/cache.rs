//! In-memory projection of one user's sessions.
//!
//! Every mutation clones the map and swaps it wholesale, so readers always
//! hold an immutable snapshot and no partial mutation of a session is ever
//! observable. The store remains the durable authority; this view can be
//! rebuilt from it at any time.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};

use super::types::ChatSession;

#[derive(Default)]
pub struct SessionCache {
    chats: ArcSwap<HashMap<String, ChatSession>>,
    active_chat_id: ArcSwapOption<String>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable snapshot of the current mapping.
    pub fn snapshot(&self) -> Arc<HashMap<String, ChatSession>> {
        self.chats.load_full()
    }

    pub fn get(&self, chat_id: &str) -> Option<ChatSession> {
        self.chats.load().get(chat_id).cloned()
    }

    pub fn active_chat_id(&self) -> Option<String> {
        self.active_chat_id.load_full().map(|id| (*id).clone())
    }

    pub fn contains(&self, chat_id: &str) -> bool {
        self.chats.load().contains_key(chat_id)
    }

    /// Point the active-session cursor at `chat_id`. Pure pointer change.
    pub fn select(&self, chat_id: &str) {
        self.active_chat_id
            .store(Some(Arc::new(chat_id.to_string())));
    }

    pub fn clear_active(&self) {
        self.active_chat_id.store(None);
    }

    /// Insert or replace one session (wholesale map replacement).
    pub fn insert(&self, session: ChatSession) {
        self.chats.rcu(|chats| {
            let mut next = HashMap::clone(chats);
            next.insert(session.id.clone(), session.clone());
            next
        });
    }

    /// Remove one session. The active cursor is left untouched; callers
    /// decide on a replacement.
    pub fn remove(&self, chat_id: &str) -> Option<ChatSession> {
        let removed = self.get(chat_id);
        if removed.is_some() {
            self.chats.rcu(|chats| {
                let mut next = HashMap::clone(chats);
                next.remove(chat_id);
                next
            });
        }
        removed
    }

    /// Replace the whole mapping, e.g. after a (re)load from the store.
    pub fn replace_all(&self, chats: HashMap<String, ChatSession>) {
        self.chats.store(Arc::new(chats));
    }
}
