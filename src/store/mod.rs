//! Durable-store boundary.
//!
//! [`ChatStore`] is the single capability interface for users, chats, and
//! messages. Two interchangeable implementations exist — in-memory and
//! SQLite — selected once at startup by configuration, never branched on
//! per call. The realtime core never touches this trait; HTTP handlers call
//! it through `spawn_blocking` and then request fanout.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "private" => Some(ChatKind::Private),
            "group" => Some(ChatKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LastMessage {
    pub text: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub id: String,
    pub kind: ChatKind,
    pub name: Option<String>,
    pub participants: Vec<String>,
    pub admins: Vec<String>,
    pub created_by: String,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatRecord {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_for: Vec<String>,
    pub read_by: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
}

/// Capability interface over the durable store. All methods are synchronous;
/// async callers wrap them in `tokio::task::spawn_blocking`.
pub trait ChatStore: Send + Sync {
    // Users
    fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord>;
    fn user_by_id(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;
    /// Case-insensitive username lookup.
    fn user_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>>;
    fn list_users(&self, exclude: &str, limit: usize) -> StoreResult<Vec<UserRecord>>;
    fn search_users(&self, query: &str, exclude: &str, limit: usize)
        -> StoreResult<Vec<UserRecord>>;
    fn touch_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    // Token revocation
    fn blacklist_token(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    fn is_token_blacklisted(&self, token_hash: &str) -> StoreResult<bool>;

    // Chats
    fn create_chat(
        &self,
        kind: ChatKind,
        name: Option<&str>,
        participants: &[String],
        created_by: &str,
    ) -> StoreResult<ChatRecord>;
    fn chat_by_id(&self, chat_id: &str) -> StoreResult<Option<ChatRecord>>;
    fn private_chat_between(&self, a: &str, b: &str) -> StoreResult<Option<ChatRecord>>;
    /// Most recently updated first.
    fn chats_for_user(&self, user_id: &str) -> StoreResult<Vec<ChatRecord>>;
    fn set_last_message(&self, chat_id: &str, last: &LastMessage) -> StoreResult<()>;

    // Messages
    fn insert_message(&self, message: NewMessage) -> StoreResult<MessageRecord>;
    fn message_by_id(&self, message_id: &str) -> StoreResult<Option<MessageRecord>>;
    fn apply_edit(&self, message_id: &str, text: &str, at: DateTime<Utc>)
        -> StoreResult<MessageRecord>;
    /// Tombstone for everyone; the text is replaced at read time.
    fn mark_deleted(&self, message_id: &str) -> StoreResult<()>;
    /// Hide from one user only.
    fn mark_deleted_for(&self, message_id: &str, user_id: &str) -> StoreResult<()>;
    /// Mark messages in a chat as read by `reader` (optionally restricted to
    /// specific ids); the reader's own messages are untouched. Returns the
    /// number of newly marked messages.
    fn mark_read(
        &self,
        chat_id: &str,
        reader: &str,
        message_ids: Option<&[String]>,
    ) -> StoreResult<u64>;
    /// Page newest-first, strictly before `before` when given.
    fn messages_for_chat(
        &self,
        chat_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<MessageRecord>>;
}

pub type SharedStore = Arc<dyn ChatStore>;

/// Build the configured store backend.
pub fn init_store(storage: &str, data_dir: &str) -> Result<SharedStore, Box<dyn std::error::Error>> {
    match storage {
        "memory" => {
            tracing::info!("Using in-memory store");
            Ok(Arc::new(memory::MemoryStore::new()))
        }
        "sqlite" => {
            let store = sqlite::SqliteStore::open(data_dir)?;
            Ok(Arc::new(store))
        }
        other => Err(format!("unknown storage backend '{other}' (expected sqlite or memory)").into()),
    }
}
