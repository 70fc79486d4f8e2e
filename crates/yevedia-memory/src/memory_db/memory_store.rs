//! Long-term memory storage: the facts the assistant should always remember
use crate::memory_db::schema::*;
use crate::utils::{format_timestamp, parse_timestamp, TextUtils};
use rusqlite::{params, OptionalExtension, Row, ToSql};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const MEMORY_COLUMNS: &str =
    "id, title, content, category, priority, created_at, updated_at, is_active";

pub struct MemoryStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemoryStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn add(&self, title: &str, content: &str, category: &str, priority: i64) -> anyhow::Result<Memory> {
        let conn = self.get_conn()?;
        let now = Utc::now();
        let now_str = format_timestamp(&now);

        conn.execute(
            "INSERT INTO memories (title, content, category, priority, created_at, updated_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)",
            params![title, content, category, priority, now_str],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Stored memory {} in category {}", id, category);
        Ok(Memory {
            id,
            title: title.to_string(),
            content: content.to_string(),
            category: category.to_string(),
            priority,
            created_at: now,
            updated_at: now,
            is_active: true,
        })
    }

    /// Same as [`add`](Self::add) with title and content base64-encoded,
    /// for callers that cannot safely pass arbitrary text through a shell.
    pub fn add_base64(
        &self,
        title_b64: &str,
        content_b64: &str,
        category: &str,
        priority: i64,
    ) -> anyhow::Result<Memory> {
        let title = TextUtils::decode_base64_utf8(title_b64)?;
        let content = TextUtils::decode_base64_utf8(content_b64)?;
        self.add(&title, &content, category, priority)
    }

    pub fn get(&self, id: i64) -> anyhow::Result<Option<Memory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS))?;
        let mut rows = stmt.query([id])?;

        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_memory(row)?)),
            None => Ok(None),
        }
    }

    /// Most important first, newest first within a priority
    pub fn get_all(&self, active_only: bool) -> anyhow::Result<Vec<Memory>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM memories WHERE is_active = 1
                 ORDER BY priority DESC, created_at DESC, id DESC",
                MEMORY_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM memories ORDER BY priority DESC, created_at DESC, id DESC",
                MEMORY_COLUMNS
            )
        };
        self.query_memories(&sql, &[])
    }

    pub fn get_by_category(&self, category: &str) -> anyhow::Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {} FROM memories WHERE category = ?1 AND is_active = 1
             ORDER BY priority DESC, created_at DESC, id DESC",
            MEMORY_COLUMNS
        );
        self.query_memories(&sql, &[&category])
    }

    /// Apply the set fields of `update` and refresh `updated_at`.
    /// Returns false when no memory has that id.
    pub fn update(&self, id: i64, update: &MemoryUpdate) -> anyhow::Result<bool> {
        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(title) = &update.title {
            assignments.push("title = ?");
            values.push(Box::new(title.clone()));
        }
        if let Some(content) = &update.content {
            assignments.push("content = ?");
            values.push(Box::new(content.clone()));
        }
        if let Some(category) = &update.category {
            assignments.push("category = ?");
            values.push(Box::new(category.clone()));
        }
        if let Some(priority) = update.priority {
            assignments.push("priority = ?");
            values.push(Box::new(priority));
        }
        assignments.push("updated_at = ?");
        values.push(Box::new(format_timestamp(&Utc::now())));
        values.push(Box::new(id));

        let sql = format!("UPDATE memories SET {} WHERE id = ?", assignments.join(", "));
        let conn = self.get_conn()?;
        let param_refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let changed = conn.execute(&sql, rusqlite::params_from_iter(param_refs))?;

        debug!("Updated memory {} ({} row(s))", id, changed);
        Ok(changed > 0)
    }

    /// Soft delete clears the active flag; hard delete removes the row.
    pub fn delete(&self, id: i64, soft: bool) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let changed = if soft {
            conn.execute(
                "UPDATE memories SET is_active = 0, updated_at = ?1 WHERE id = ?2",
                params![format_timestamp(&Utc::now()), id],
            )?
        } else {
            conn.execute("DELETE FROM memories WHERE id = ?1", [id])?
        };

        info!("Deleted memory {} (soft: {})", id, soft);
        Ok(changed > 0)
    }

    /// Deactivate every memory. Rows stay readable with `active_only = false`.
    pub fn clear_all(&self) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let cleared = conn.execute(
            "UPDATE memories SET is_active = 0, updated_at = ?1 WHERE is_active = 1",
            [format_timestamp(&Utc::now())],
        )?;
        info!("Cleared {} memories", cleared);
        Ok(cleared)
    }

    /// Active memories whose title or content contains `text`
    pub fn search(&self, text: &str) -> anyhow::Result<Vec<Memory>> {
        let pattern = TextUtils::like_contains_pattern(text);
        let sql = format!(
            "SELECT {} FROM memories
             WHERE is_active = 1
             AND (title LIKE ?1 ESCAPE '\\' OR content LIKE ?1 ESCAPE '\\')
             ORDER BY priority DESC, created_at DESC, id DESC",
            MEMORY_COLUMNS
        );
        self.query_memories(&sql, &[&pattern])
    }

    /// Render active memories as prompt context, grouped by the known
    /// categories. Empty when there is nothing to remember.
    pub fn build_context(&self) -> anyhow::Result<String> {
        let memories = self.get_all(true)?;
        if memories.is_empty() {
            return Ok(String::new());
        }

        let mut context = String::from("Context and important information to remember:\n\n");
        for (key, heading) in KNOWN_CATEGORIES {
            let in_category: Vec<&Memory> = memories.iter().filter(|m| m.category == key).collect();
            if in_category.is_empty() {
                continue;
            }
            context.push_str(heading);
            context.push_str(":\n");
            for memory in in_category {
                context.push_str(&format!("  - {}: {}\n", memory.title, memory.content));
            }
            context.push('\n');
        }
        context.push_str("Use this information to personalize your answers.\n\n");

        Ok(context)
    }

    pub fn stats(&self) -> anyhow::Result<MemoryStats> {
        let conn = self.get_conn()?;

        let total_memories: i64 =
            conn.query_row("SELECT COUNT(*) FROM memories WHERE is_active = 1", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) FROM memories WHERE is_active = 1 GROUP BY category",
        )?;
        let by_category = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        let total_conversations: i64 =
            conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        let total_messages: i64 =
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;

        Ok(MemoryStats { total_memories, by_category, total_conversations, total_messages })
    }

    pub fn exists(&self, id: i64) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row("SELECT 1 FROM memories WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn query_memories(&self, sql: &str, params: &[&dyn ToSql]) -> anyhow::Result<Vec<Memory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut memories = Vec::new();
        while let Some(row) = rows.next()? {
            memories.push(Self::row_to_memory(row)?);
        }
        Ok(memories)
    }

    fn row_to_memory(row: &Row) -> anyhow::Result<Memory> {
        let created_at = parse_timestamp(&row.get::<_, String>(5)?)
            .unwrap_or_else(|| { warn!("Failed parse memory created_at"); Utc::now() });
        let updated_at = parse_timestamp(&row.get::<_, String>(6)?)
            .unwrap_or_else(|| { warn!("Failed parse memory updated_at"); Utc::now() });

        Ok(Memory {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            category: row.get(3)?,
            priority: row.get(4)?,
            created_at,
            updated_at,
            is_active: row.get(7)?,
        })
    }
}
