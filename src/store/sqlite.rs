//! SQLite store backend.
//!
//! rusqlite is synchronous — the connection sits behind `Arc<Mutex>` and
//! async callers go through `tokio::task::spawn_blocking`. Timestamps are
//! stored as fixed-width RFC 3339 text so lexicographic comparison matches
//! chronological order.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::store::{
    migrations, ChatKind, ChatRecord, ChatStore, LastMessage, MessageRecord, NewMessage,
    StoreError, StoreResult, UserRecord,
};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database under `data_dir`, enable WAL mode, and
    /// run migrations.
    pub fn open(data_dir: &str) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = Path::new(data_dir).join("courier.db");
        let mut conn = Connection::open(&db_path)?;

        // WAL for better concurrent read performance.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::migrations().to_latest(&mut conn)?;

        tracing::info!("Database initialized at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("database lock poisoned".to_string()))
    }

    fn load_participants(
        conn: &Connection,
        chat_id: &str,
    ) -> StoreResult<(Vec<String>, Vec<String>)> {
        let mut stmt =
            conn.prepare("SELECT user_id, is_admin FROM chat_participants WHERE chat_id = ?1")?;
        let rows = stmt.query_map([chat_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
        })?;

        let mut participants = Vec::new();
        let mut admins = Vec::new();
        for row in rows {
            let (user_id, is_admin) = row?;
            if is_admin {
                admins.push(user_id.clone());
            }
            participants.push(user_id);
        }
        Ok((participants, admins))
    }

    fn load_chat(conn: &Connection, chat_id: &str) -> StoreResult<Option<ChatRecord>> {
        let row: Option<ChatRow> = conn
            .query_row(
                "SELECT id, kind, name, created_by, last_message_text, last_message_sender,
                        last_message_at, created_at, updated_at
                 FROM chats WHERE id = ?1",
                [chat_id],
                |row| {
                    Ok(ChatRow {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        name: row.get(2)?,
                        created_by: row.get(3)?,
                        last_message_text: row.get(4)?,
                        last_message_sender: row.get(5)?,
                        last_message_at: row.get(6)?,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                    })
                },
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };
        let (participants, admins) = Self::load_participants(conn, &row.id)?;
        Ok(Some(row.into_record(participants, admins)?))
    }
}

/// Raw chats row; converted after the statement is done.
struct ChatRow {
    id: String,
    kind: String,
    name: Option<String>,
    created_by: String,
    last_message_text: Option<String>,
    last_message_sender: Option<String>,
    last_message_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ChatRow {
    fn into_record(
        self,
        participants: Vec<String>,
        admins: Vec<String>,
    ) -> StoreResult<ChatRecord> {
        let last_message = match (
            self.last_message_text,
            self.last_message_sender,
            self.last_message_at,
        ) {
            (Some(text), Some(sender_id), Some(at)) => Some(LastMessage {
                text,
                sender_id,
                created_at: parse_ts(&at)?,
            }),
            _ => None,
        };

        Ok(ChatRecord {
            kind: ChatKind::from_str(&self.kind)
                .ok_or_else(|| StoreError::Backend(format!("unknown chat kind '{}'", self.kind)))?,
            id: self.id,
            name: self.name,
            participants,
            admins,
            created_by: self.created_by,
            last_message,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

struct MessageRow {
    id: String,
    chat_id: String,
    sender_id: String,
    text: String,
    edited: bool,
    edited_at: Option<String>,
    deleted: bool,
    deleted_for: String,
    read_by: String,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            sender_id: row.get(2)?,
            text: row.get(3)?,
            edited: row.get::<_, i64>(4)? != 0,
            edited_at: row.get(5)?,
            deleted: row.get::<_, i64>(6)? != 0,
            deleted_for: row.get(7)?,
            read_by: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_record(self) -> StoreResult<MessageRecord> {
        Ok(MessageRecord {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            text: self.text,
            edited: self.edited,
            edited_at: self.edited_at.as_deref().map(parse_ts).transpose()?,
            deleted: self.deleted,
            deleted_for: parse_id_list(&self.deleted_for),
            read_by: parse_id_list(&self.read_by),
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, text, edited, edited_at, deleted, deleted_for, read_by, created_at";

impl ChatStore for SqliteStore {
    fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord> {
        let conn = self.lock()?;
        let now = Utc::now();
        let user = UserRecord {
            id: Uuid::now_v7().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            last_seen: now,
        };

        let inserted = conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![user.id, user.username, user.password_hash, ts(&now), ts(&now)],
        );
        match inserted {
            Ok(_) => Ok(user),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict("username already exists".to_string()))
            }
            Err(other) => Err(other.into()),
        }
    }

    fn user_by_id(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        let conn = self.lock()?;
        query_user(
            &conn,
            "SELECT id, username, password_hash, created_at, last_seen FROM users WHERE id = ?1",
            [user_id],
        )
    }

    fn user_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let conn = self.lock()?;
        query_user(
            &conn,
            "SELECT id, username, password_hash, created_at, last_seen
             FROM users WHERE username = ?1 COLLATE NOCASE",
            [username],
        )
    }

    fn list_users(&self, exclude: &str, limit: usize) -> StoreResult<Vec<UserRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, created_at, last_seen
             FROM users WHERE id != ?1 ORDER BY username LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![exclude, limit as i64], user_row)?;
        collect_users(rows)
    }

    fn search_users(
        &self,
        query: &str,
        exclude: &str,
        limit: usize,
    ) -> StoreResult<Vec<UserRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, created_at, last_seen
             FROM users
             WHERE id != ?1 AND username LIKE '%' || ?2 || '%'
             ORDER BY username LIMIT ?3",
        )?;
        let rows = stmt.query_map(rusqlite::params![exclude, query, limit as i64], user_row)?;
        collect_users(rows)
    }

    fn touch_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            rusqlite::params![ts(&at), user_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn blacklist_token(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO token_blacklist (token_hash, user_id, expires_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![token_hash, user_id, ts(&expires_at)],
        )?;
        Ok(())
    }

    fn is_token_blacklisted(&self, token_hash: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM token_blacklist WHERE token_hash = ?1",
            [token_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_chat(
        &self,
        kind: ChatKind,
        name: Option<&str>,
        participants: &[String],
        created_by: &str,
    ) -> StoreResult<ChatRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let now = Utc::now();
        let chat_id = Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO chats (id, kind, name, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![chat_id, kind.as_str(), name, created_by, ts(&now), ts(&now)],
        )?;

        let mut admins = Vec::new();
        for user_id in participants {
            let is_admin = kind == ChatKind::Group && user_id == created_by;
            if is_admin {
                admins.push(user_id.clone());
            }
            tx.execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, is_admin)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![chat_id, user_id, is_admin as i64],
            )?;
        }
        tx.commit()?;

        Ok(ChatRecord {
            id: chat_id,
            kind,
            name: name.map(str::to_string),
            participants: participants.to_vec(),
            admins,
            created_by: created_by.to_string(),
            last_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn chat_by_id(&self, chat_id: &str) -> StoreResult<Option<ChatRecord>> {
        let conn = self.lock()?;
        Self::load_chat(&conn, chat_id)
    }

    fn private_chat_between(&self, a: &str, b: &str) -> StoreResult<Option<ChatRecord>> {
        let conn = self.lock()?;
        let chat_id: Option<String> = conn
            .query_row(
                "SELECT c.id FROM chats c
                 JOIN chat_participants p1 ON p1.chat_id = c.id AND p1.user_id = ?1
                 JOIN chat_participants p2 ON p2.chat_id = c.id AND p2.user_id = ?2
                 WHERE c.kind = 'private' LIMIT 1",
                rusqlite::params![a, b],
                |row| row.get(0),
            )
            .optional()?;

        match chat_id {
            Some(id) => Self::load_chat(&conn, &id),
            None => Ok(None),
        }
    }

    fn chats_for_user(&self, user_id: &str) -> StoreResult<Vec<ChatRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.id FROM chats c
             JOIN chat_participants p ON p.chat_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.updated_at DESC",
        )?;
        let ids: Vec<String> = stmt
            .query_map([user_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let mut chats = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chat) = Self::load_chat(&conn, &id)? {
                chats.push(chat);
            }
        }
        Ok(chats)
    }

    fn set_last_message(&self, chat_id: &str, last: &LastMessage) -> StoreResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE chats
             SET last_message_text = ?1, last_message_sender = ?2, last_message_at = ?3,
                 updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![
                last.text,
                last.sender_id,
                ts(&last.created_at),
                ts(&Utc::now()),
                chat_id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn insert_message(&self, message: NewMessage) -> StoreResult<MessageRecord> {
        let conn = self.lock()?;
        let now = Utc::now();
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
            created_at: now,
        };

        conn.execute(
            "INSERT INTO messages (id, chat_id, sender_id, text, read_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.id,
                record.chat_id,
                record.sender_id,
                record.text,
                id_list_json(&record.read_by),
                ts(&now)
            ],
        )?;
        Ok(record)
    }

    fn message_by_id(&self, message_id: &str) -> StoreResult<Option<MessageRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [message_id],
                MessageRow::from_row,
            )
            .optional()?;
        row.map(MessageRow::into_record).transpose()
    }

    fn apply_edit(
        &self,
        message_id: &str,
        text: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<MessageRecord> {
        {
            let conn = self.lock()?;
            let updated = conn.execute(
                "UPDATE messages SET text = ?1, edited = 1, edited_at = ?2 WHERE id = ?3",
                rusqlite::params![text, ts(&at), message_id],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound);
            }
        }
        self.message_by_id(message_id)?.ok_or(StoreError::NotFound)
    }

    fn mark_deleted(&self, message_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE messages SET deleted = 1 WHERE id = ?1",
            [message_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn mark_deleted_for(&self, message_id: &str, user_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT deleted_for FROM messages WHERE id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(StoreError::NotFound);
        };

        let mut hidden = parse_id_list(&raw);
        if !hidden.iter().any(|u| u == user_id) {
            hidden.push(user_id.to_string());
            conn.execute(
                "UPDATE messages SET deleted_for = ?1 WHERE id = ?2",
                rusqlite::params![id_list_json(&hidden), message_id],
            )?;
        }
        Ok(())
    }

    fn mark_read(
        &self,
        chat_id: &str,
        reader: &str,
        message_ids: Option<&[String]>,
    ) -> StoreResult<u64> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, read_by FROM messages WHERE chat_id = ?1 AND sender_id != ?2",
        )?;
        let candidates: Vec<(String, String)> = stmt
            .query_map(rusqlite::params![chat_id, reader], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut marked = 0;
        for (id, raw) in candidates {
            if let Some(ids) = message_ids {
                if !ids.iter().any(|wanted| wanted == &id) {
                    continue;
                }
            }
            let mut readers = parse_id_list(&raw);
            if !readers.iter().any(|u| u == reader) {
                readers.push(reader.to_string());
                conn.execute(
                    "UPDATE messages SET read_by = ?1 WHERE id = ?2",
                    rusqlite::params![id_list_json(&readers), id],
                )?;
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
        let conn = self.lock()?;
        let cutoff = before.as_ref().map(ts);
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = ?1 AND (?2 IS NULL OR created_at < ?2)
             ORDER BY created_at DESC LIMIT ?3",
        ))?;
        let rows: Vec<MessageRow> = stmt
            .query_map(
                rusqlite::params![chat_id, cutoff, limit as i64],
                MessageRow::from_row,
            )?
            .collect::<Result<_, _>>()?;

        rows.into_iter().map(MessageRow::into_record).collect()
    }
}

/// Fixed-width RFC 3339 so string order == time order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp '{raw}': {e}")))
}

fn id_list_json(ids: &[String]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

fn parse_id_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

type UserRow = (String, String, String, String, String);

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn user_from_raw(raw: UserRow) -> StoreResult<UserRecord> {
    let (id, username, password_hash, created_at, last_seen) = raw;
    Ok(UserRecord {
        id,
        username,
        password_hash,
        created_at: parse_ts(&created_at)?,
        last_seen: parse_ts(&last_seen)?,
    })
}

fn query_user<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StoreResult<Option<UserRecord>> {
    let raw = conn.query_row(sql, params, user_row).optional()?;
    raw.map(user_from_raw).transpose()
}

fn collect_users(
    rows: impl Iterator<Item = rusqlite::Result<UserRow>>,
) -> StoreResult<Vec<UserRecord>> {
    let mut users = Vec::new();
    for row in rows {
        users.push(user_from_raw(row?)?);
    }
    Ok(users)
}
