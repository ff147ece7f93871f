//! Chat-session synchronization: durable store, in-memory cache, lifecycle,
//! and the message-turn send pipeline.

mod cache;
mod error;
mod manager;
mod orchestrator;
mod store;
mod title;
mod types;

pub use cache::SessionCache;
pub use error::ChatError;
pub use manager::{ChatManager, DEFAULT_CHAT_TITLE};
pub use orchestrator::{MODEL_ERROR_REPLY, ModelClient};
pub use store::SessionStore;
pub use title::derive_title;
pub use types::{ChatSession, ChatUpdate, InlineData, NewChat, Part, Role, Turn};
