//! Durable chat-session storage backed by libSQL (Turso).
//!
//! The store is the sole authority for durable state; the in-memory cache in
//! [`crate::chat::cache`] is a rebuildable view. Supports both:
//! - Remote Turso/libSQL databases via `TURSO_DATABASE_URL` / `LIBSQL_DATABASE_URL` (+ token).
//! - Local file fallback at a caller-supplied path.
//!
//! Each session is one row keyed by `(user_id, id)`; the ordered message
//! sequence is stored as a single JSON document column so partial updates
//! replace the whole sequence, never individual turns.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{future::Future, time::Duration};

use libsql::{Builder, Database, params};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use super::ChatError;
use super::types::{ChatSession, ChatUpdate, NewChat, Turn};

const CHATS_DB_BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_POOLED_CONNECTIONS: usize = 8;
const MAX_REMOTE_CONNECTIONS: usize = 8;
const MAX_LOCAL_CONNECTIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbMode {
    Remote,
    Local,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    db: Database,
    db_mode: DbMode,
    /// Serialize *writes* for local file databases to reduce SQLITE_BUSY contention.
    /// For remote Turso/libSQL, this is disabled to avoid serializing network latency.
    write_gate: Option<Arc<Semaphore>>,
    /// Bound the number of concurrent connections (important for remote and local).
    conn_gate: Arc<Semaphore>,
    conn_pool: Mutex<Vec<libsql::Connection>>,
}

/// A pooled libSQL connection (returned to the pool on drop).
struct PooledConnection {
    conn: Option<libsql::Connection>,
    store: SessionStore,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = libsql::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("PooledConnection must hold a connection")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        let Ok(mut pool) = self.store.inner.conn_pool.lock() else {
            return;
        };
        if pool.len() >= MAX_POOLED_CONNECTIONS {
            return;
        }
        pool.push(conn);
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn new_chat_id() -> String {
    format!("chat_{}", Uuid::new_v4())
}

async fn retry_db_locked<T, Fut, F>(mut op: F) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut delay = Duration::from_millis(25);
    for attempt in 0..5 {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt >= 4 || !matches!(err, ChatError::Locked { .. }) {
                    return Err(err);
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_millis(400));
            }
        }
    }
    Err(ChatError::locked("Chat DB retry exhausted"))
}

async fn open_database(local_path: &Path) -> Result<(Database, DbMode), ChatError> {
    let url = std::env::var("TURSO_DATABASE_URL")
        .or_else(|_| std::env::var("LIBSQL_DATABASE_URL"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let token = std::env::var("TURSO_AUTH_TOKEN")
        .or_else(|_| std::env::var("LIBSQL_AUTH_TOKEN"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    if let (Some(url), Some(token)) = (url, token) {
        log::info!("Chat DB: using remote Turso/libSQL");
        let db = Builder::new_remote(url, token)
            .build()
            .await
            .map_err(ChatError::from)?;
        return Ok((db, DbMode::Remote));
    }

    let path_str = local_path.to_string_lossy().to_string();
    log::warn!(
        "Chat DB: TURSO env missing, falling back to local file {}",
        path_str
    );
    let db = Builder::new_local(path_str)
        .build()
        .await
        .map_err(ChatError::from)?;
    Ok((db, DbMode::Local))
}

impl SessionStore {
    /// Open the store, preferring a remote Turso/libSQL database from the
    /// environment and falling back to a local file at `local_path`.
    pub async fn open(local_path: &Path) -> Result<Self, ChatError> {
        let (db, db_mode) = open_database(local_path).await?;
        Self::from_database(db, db_mode).await
    }

    /// Open a local-file store directly, bypassing the env lookup. Used by
    /// tests and single-machine deployments.
    pub async fn open_local(path: &Path) -> Result<Self, ChatError> {
        let db = Builder::new_local(path.to_string_lossy().to_string())
            .build()
            .await
            .map_err(ChatError::from)?;
        Self::from_database(db, DbMode::Local).await
    }

    async fn from_database(db: Database, db_mode: DbMode) -> Result<Self, ChatError> {
        let (conn_limit, write_gate) = match db_mode {
            DbMode::Remote => (MAX_REMOTE_CONNECTIONS, None),
            DbMode::Local => (MAX_LOCAL_CONNECTIONS, Some(Arc::new(Semaphore::new(1)))),
        };
        let store = Self {
            inner: Arc::new(SessionStoreInner {
                db,
                db_mode,
                write_gate,
                conn_gate: Arc::new(Semaphore::new(conn_limit)),
                conn_pool: Mutex::new(Vec::new()),
            }),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn connect(&self) -> Result<PooledConnection, ChatError> {
        let permit = self
            .inner
            .conn_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChatError::internal("Chat DB connection gate closed"))?;

        if let Ok(mut pool) = self.inner.conn_pool.lock() {
            if let Some(conn) = pool.pop() {
                return Ok(PooledConnection {
                    conn: Some(conn),
                    store: self.clone(),
                    _permit: permit,
                });
            }
        }

        let conn = self.inner.db.connect()?;

        // Best-effort per-connection pragmas.
        // - Local mode: reduce SQLITE_BUSY.
        // - Remote mode: pragmas may be ignored; that's OK.
        if self.inner.db_mode == DbMode::Local {
            let _ = conn.busy_timeout(CHATS_DB_BUSY_TIMEOUT);
            let _ = conn.query("PRAGMA journal_mode = WAL;", ()).await;
            let _ = conn.query("PRAGMA synchronous = NORMAL;", ()).await;
        }

        Ok(PooledConnection {
            conn: Some(conn),
            store: self.clone(),
            _permit: permit,
        })
    }

    async fn write_permit(&self) -> Result<Option<OwnedSemaphorePermit>, ChatError> {
        let Some(gate) = self.inner.write_gate.as_ref() else {
            return Ok(None);
        };
        gate.clone()
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|_| ChatError::internal("Chat DB write gate closed"))
    }

    async fn migrate(&self) -> Result<(), ChatError> {
        let conn = self.connect().await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chats (\n  user_id TEXT NOT NULL,\n  id TEXT NOT NULL,\n  title TEXT NOT NULL,\n  messages TEXT NOT NULL,\n  created_at_ms INTEGER NOT NULL,\n  PRIMARY KEY (user_id, id)\n);",
            (),
        )
        .await?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chats_user_created ON chats(user_id, created_at_ms);",
            (),
        )
        .await?;

        Ok(())
    }

    /// Materialize all sessions for one user, keyed by chat id.
    pub async fn list_chats(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, ChatSession>, ChatError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, title, messages, created_at_ms\n   FROM chats\n  WHERE user_id = ?1\n  ORDER BY created_at_ms DESC;",
                params![user_id],
            )
            .await?;

        let mut out = HashMap::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let messages_json: String = row.get(2)?;
            let created_at_ms: i64 = row.get(3)?;

            let messages: Vec<Turn> = serde_json::from_str(&messages_json)
                .map_err(|e| ChatError::internal(format!("Corrupt message document: {e}")))?;

            out.insert(
                id.clone(),
                ChatSession {
                    id,
                    title,
                    messages,
                    created_at_ms: Some(created_at_ms.max(0) as u64),
                },
            );
        }

        Ok(out)
    }

    /// Insert a new session and return its store-assigned id. The creation
    /// timestamp is assigned here, server-side.
    pub async fn create_chat(&self, user_id: &str, chat: NewChat) -> Result<String, ChatError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ChatError::invalid_input("userId is required"));
        }

        let id = new_chat_id();
        let now = now_ms() as i64;
        let messages_json = serde_json::to_string(&chat.messages)
            .map_err(|e| ChatError::internal(format!("Failed to encode messages: {e}")))?;

        retry_db_locked(|| async {
            let _write = self.write_permit().await?;
            let conn = self.connect().await?;
            conn.execute(
                "INSERT INTO chats (user_id, id, title, messages, created_at_ms)\nVALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    user_id,
                    id.as_str(),
                    chat.title.as_str(),
                    messages_json.as_str(),
                    now
                ],
            )
            .await?;
            Ok(())
        })
        .await?;

        Ok(id)
    }

    /// Apply a partial-field update. At least one field must be present.
    pub async fn update_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        update: ChatUpdate,
    ) -> Result<(), ChatError> {
        let messages_json = match update.messages.as_ref() {
            Some(messages) => Some(
                serde_json::to_string(messages)
                    .map_err(|e| ChatError::internal(format!("Failed to encode messages: {e}")))?,
            ),
            None => None,
        };

        retry_db_locked(|| async {
            let _write = self.write_permit().await?;
            let conn = self.connect().await?;

            let affected = match (update.title.as_deref(), messages_json.as_deref()) {
                (Some(title), Some(messages)) => {
                    conn.execute(
                        "UPDATE chats SET title = ?3, messages = ?4 WHERE user_id = ?1 AND id = ?2;",
                        params![user_id, chat_id, title, messages],
                    )
                    .await?
                }
                (Some(title), None) => {
                    conn.execute(
                        "UPDATE chats SET title = ?3 WHERE user_id = ?1 AND id = ?2;",
                        params![user_id, chat_id, title],
                    )
                    .await?
                }
                (None, Some(messages)) => {
                    conn.execute(
                        "UPDATE chats SET messages = ?3 WHERE user_id = ?1 AND id = ?2;",
                        params![user_id, chat_id, messages],
                    )
                    .await?
                }
                (None, None) => {
                    return Err(ChatError::invalid_input("Update has no fields"));
                }
            };

            if affected == 0 {
                return Err(ChatError::not_found("Chat not found"));
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_chat(&self, user_id: &str, chat_id: &str) -> Result<(), ChatError> {
        retry_db_locked(|| async {
            let _write = self.write_permit().await?;
            let conn = self.connect().await?;
            let affected = conn
                .execute(
                    "DELETE FROM chats WHERE user_id = ?1 AND id = ?2;",
                    params![user_id, chat_id],
                )
                .await?;
            if affected == 0 {
                return Err(ChatError::not_found("Chat not found"));
            }
            Ok(())
        })
        .await
    }
}
