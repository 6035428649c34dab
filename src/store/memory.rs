//! In-memory store for development and tests.
//!
//! Same contract as the SQLite backend, held in dashmaps. Nothing survives a
//! restart; that is the point.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::store::{
    ChatKind, ChatRecord, ChatStore, LastMessage, MessageRecord, NewMessage, StoreError,
    StoreResult, UserRecord,
};

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, UserRecord>,
    blacklist: DashMap<String, DateTime<Utc>>,
    chats: DashMap<String, ChatRecord>,
    messages: DashMap<String, MessageRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatStore for MemoryStore {
    fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord> {
        let taken = self
            .users
            .iter()
            .any(|entry| entry.username.eq_ignore_ascii_case(username));
        if taken {
            return Err(StoreError::Conflict("username already exists".to_string()));
        }

        let now = Utc::now();
        let user = UserRecord {
            id: Uuid::now_v7().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            last_seen: now,
        };
        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    fn user_by_id(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    fn user_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.username.eq_ignore_ascii_case(username))
            .map(|entry| entry.clone()))
    }

    fn list_users(&self, exclude: &str, limit: usize) -> StoreResult<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = self
            .users
            .iter()
            .filter(|entry| entry.id != exclude)
            .map(|entry| entry.clone())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users.truncate(limit);
        Ok(users)
    }

    fn search_users(
        &self,
        query: &str,
        exclude: &str,
        limit: usize,
    ) -> StoreResult<Vec<UserRecord>> {
        let needle = query.to_lowercase();
        let mut users: Vec<UserRecord> = self
            .users
            .iter()
            .filter(|entry| entry.id != exclude && entry.username.to_lowercase().contains(&needle))
            .map(|entry| entry.clone())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users.truncate(limit);
        Ok(users)
    }

    fn touch_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        match self.users.get_mut(user_id) {
            Some(mut user) => {
                user.last_seen = at;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn blacklist_token(
        &self,
        token_hash: &str,
        _user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.blacklist.insert(token_hash.to_string(), expires_at);
        Ok(())
    }

    fn is_token_blacklisted(&self, token_hash: &str) -> StoreResult<bool> {
        Ok(self.blacklist.contains_key(token_hash))
    }

    fn create_chat(
        &self,
        kind: ChatKind,
        name: Option<&str>,
        participants: &[String],
        created_by: &str,
    ) -> StoreResult<ChatRecord> {
        let now = Utc::now();
        let chat = ChatRecord {
            id: Uuid::now_v7().to_string(),
            kind,
            name: name.map(str::to_string),
            participants: participants.to_vec(),
            admins: match kind {
                ChatKind::Group => vec![created_by.to_string()],
                ChatKind::Private => Vec::new(),
            },
            created_by: created_by.to_string(),
            last_message: None,
            created_at: now,
            updated_at: now,
        };
        self.chats.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    fn chat_by_id(&self, chat_id: &str) -> StoreResult<Option<ChatRecord>> {
        Ok(self.chats.get(chat_id).map(|c| c.clone()))
    }

    fn private_chat_between(&self, a: &str, b: &str) -> StoreResult<Option<ChatRecord>> {
        Ok(self
            .chats
            .iter()
            .find(|chat| {
                chat.kind == ChatKind::Private
                    && chat.has_participant(a)
                    && chat.has_participant(b)
            })
            .map(|chat| chat.clone()))
    }

    fn chats_for_user(&self, user_id: &str) -> StoreResult<Vec<ChatRecord>> {
        let mut chats: Vec<ChatRecord> = self
            .chats
            .iter()
            .filter(|chat| chat.has_participant(user_id))
            .map(|chat| chat.clone())
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    fn set_last_message(&self, chat_id: &str, last: &LastMessage) -> StoreResult<()> {
        match self.chats.get_mut(chat_id) {
            Some(mut chat) => {
                chat.last_message = Some(last.clone());
                chat.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn insert_message(&self, message: NewMessage) -> StoreResult<MessageRecord> {
        let record = MessageRecord {
            id: Uuid::now_v7().to_string(),
            chat_id: message.chat_id,
            sender_id: message.sender_id.clone(),
            text: message.text,
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_for: Vec::new(),
            read_by: vec![message.sender_id],
            created_at: Utc::now(),
        };
        self.messages.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn message_by_id(&self, message_id: &str) -> StoreResult<Option<MessageRecord>> {
        Ok(self.messages.get(message_id).map(|m| m.clone()))
    }

    fn apply_edit(
        &self,
        message_id: &str,
        text: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<MessageRecord> {
        match self.messages.get_mut(message_id) {
            Some(mut message) => {
                message.text = text.to_string();
                message.edited = true;
                message.edited_at = Some(at);
                Ok(message.clone())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn mark_deleted(&self, message_id: &str) -> StoreResult<()> {
        match self.messages.get_mut(message_id) {
            Some(mut message) => {
                message.deleted = true;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn mark_deleted_for(&self, message_id: &str, user_id: &str) -> StoreResult<()> {
        match self.messages.get_mut(message_id) {
            Some(mut message) => {
                if !message.deleted_for.iter().any(|u| u == user_id) {
                    message.deleted_for.push(user_id.to_string());
                }
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn mark_read(
        &self,
        chat_id: &str,
        reader: &str,
        message_ids: Option<&[String]>,
    ) -> StoreResult<u64> {
        let mut marked = 0;
        for mut message in self.messages.iter_mut() {
            if message.chat_id != chat_id || message.sender_id == reader {
                continue;
            }
            if let Some(ids) = message_ids {
                if !ids.iter().any(|id| id == &message.id) {
                    continue;
                }
            }
            if !message.read_by.iter().any(|u| u == reader) {
                message.read_by.push(reader.to_string());
                marked += 1;
            }
        }
        Ok(marked)
    }

    fn messages_for_chat(
        &self,
        chat_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<MessageRecord>> {
        let mut messages: Vec<MessageRecord> = self
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .filter(|m| before.is_none_or(|cutoff| m.created_at < cutoff))
            .map(|m| m.clone())
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        Ok(messages)
    }
}
