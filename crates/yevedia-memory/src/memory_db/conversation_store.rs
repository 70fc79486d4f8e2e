use crate::memory_db::schema::*;
use crate::utils::{format_timestamp, parse_timestamp};
use rusqlite::{params, Connection, Row};
use chrono::Utc;
use tracing::{debug, info, warn};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

const CONVERSATION_COLUMNS: &str = "id, session_id, title, created_at, updated_at";

/// Chat sessions and their append-only message history
pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    fn touch_conversation_with_conn(conn: &Connection, conversation_id: i64, now: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now, conversation_id],
        )
    }

    /// Start a conversation. Several conversations may share a session id.
    pub fn create(&self, session_id: &str, title: Option<&str>) -> anyhow::Result<Conversation> {
        let now = Utc::now();
        let now_str = format_timestamp(&now);
        let title = title.unwrap_or(DEFAULT_CONVERSATION_TITLE).to_string();

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO conversations (session_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![session_id, &title, now_str],
        )?;
        let id = conn.last_insert_rowid();

        info!("Created conversation {} for session {}", id, session_id);
        Ok(Conversation {
            id,
            session_id: session_id.to_string(),
            title: Some(title),
            created_at: now,
            updated_at: now,
        })
    }

    /// Append a message and bump the conversation's `updated_at` in one
    /// transaction. Fails if the conversation does not exist.
    pub fn add_message(&self, conversation_id: i64, role: Role, content: &str) -> anyhow::Result<StoredMessage> {
        let mut conn = self.get_conn()?;
        let now = Utc::now();
        let now_str = format_timestamp(&now);

        let tx = conn.transaction()?;
        if Self::touch_conversation_with_conn(&tx, conversation_id, &now_str)? == 0 {
            return Err(anyhow::anyhow!("Conversation {} not found", conversation_id));
        }
        tx.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role.as_str(), content, &now_str],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!("Stored {} message {} in conversation {}", role, id, conversation_id);
        Ok(StoredMessage {
            id,
            conversation_id,
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Messages in the order they were written
    pub fn get_messages(&self, conversation_id: i64) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query([conversation_id])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_stored_message(row)?);
        }
        Ok(messages)
    }

    pub fn get(&self, conversation_id: i64) -> anyhow::Result<Option<Conversation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations WHERE id = ?1",
            CONVERSATION_COLUMNS
        ))?;
        let mut rows = stmt.query([conversation_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_conversation(row)?)),
            None => Ok(None),
        }
    }

    /// Most recently active first
    pub fn get_all(&self) -> anyhow::Result<Vec<Conversation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations ORDER BY updated_at DESC, id DESC",
            CONVERSATION_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;
        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            conversations.push(Self::row_to_conversation(row)?);
        }
        Ok(conversations)
    }

    pub fn get_by_session(&self, session_id: &str) -> anyhow::Result<Vec<Conversation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations WHERE session_id = ?1 ORDER BY created_at ASC, id ASC",
            CONVERSATION_COLUMNS
        ))?;
        let mut rows = stmt.query([session_id])?;
        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            conversations.push(Self::row_to_conversation(row)?);
        }
        Ok(conversations)
    }

    fn row_to_conversation(row: &Row) -> anyhow::Result<Conversation> {
        let created_at = parse_timestamp(&row.get::<_, String>(3)?)
            .unwrap_or_else(|| { warn!("Failed parse conversation created_at"); Utc::now() });
        let updated_at = parse_timestamp(&row.get::<_, String>(4)?)
            .unwrap_or_else(|| { warn!("Failed parse conversation updated_at"); Utc::now() });

        Ok(Conversation {
            id: row.get(0)?,
            session_id: row.get(1)?,
            title: row.get(2)?,
            created_at,
            updated_at,
        })
    }

    fn row_to_stored_message(row: &Row) -> anyhow::Result<StoredMessage> {
        let role: Role = row.get::<_, String>(2)?.parse()?;
        let created_at = parse_timestamp(&row.get::<_, String>(4)?)
            .unwrap_or_else(|| { warn!("Failed parse message timestamp"); Utc::now() });

        Ok(StoredMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role,
            content: row.get(3)?,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    #[test]
    fn test_create_uses_default_title() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let conv = db.conversations.create("session-1", None).unwrap();
        assert_eq!(conv.title.as_deref(), Some(DEFAULT_CONVERSATION_TITLE));

        let fetched = db.conversations.get(conv.id).unwrap().unwrap();
        assert_eq!(fetched.session_id, "session-1");
    }

    #[test]
    fn test_messages_are_ordered_by_creation() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let conv = db.conversations.create("s", Some("Rust questions")).unwrap();
        db.conversations.add_message(conv.id, Role::System, "be brief").unwrap();
        db.conversations.add_message(conv.id, Role::User, "what is a trait?").unwrap();
        db.conversations.add_message(conv.id, Role::Assistant, "an interface").unwrap();

        let messages = db.conversations.get_messages(conv.id).unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(messages[1].content, "what is a trait?");
    }

    #[test]
    fn test_add_message_to_unknown_conversation_fails() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        assert!(db.conversations.add_message(42, Role::User, "hello").is_err());
        assert_eq!(db.get_stats().unwrap().total_messages, 0);
    }

    #[test]
    fn test_add_message_bumps_conversation_order() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let first = db.conversations.create("s", Some("first")).unwrap();
        let second = db.conversations.create("s", Some("second")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        db.conversations.add_message(first.id, Role::User, "ping").unwrap();

        let all = db.conversations.get_all().unwrap();
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[1].id, second.id);
    }

    #[test]
    fn test_session_may_own_several_conversations() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.conversations.create("shared", None).unwrap();
        db.conversations.create("shared", None).unwrap();
        db.conversations.create("other", None).unwrap();

        assert_eq!(db.conversations.get_by_session("shared").unwrap().len(), 2);
    }
}
