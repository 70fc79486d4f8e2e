//! Uploaded document storage
use crate::memory_db::schema::*;
use crate::utils::{format_timestamp, parse_timestamp, TextUtils};
use rusqlite::{params, OptionalExtension, Row};
use chrono::Utc;
use tracing::{debug, info, warn};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub const DEFAULT_DOCUMENT_TYPE: &str = "text/plain";

pub struct DocumentStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl DocumentStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// `size` is whatever the uploader reported; it is not derived from `content`.
    pub fn add(&self, name: &str, content: &str, doc_type: &str, size: i64) -> anyhow::Result<Document> {
        let conn = self.get_conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO documents (name, content, type, size, created_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![name, content, doc_type, size, format_timestamp(&now)],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Stored document {} ({}, {} bytes)", id, doc_type, size);
        Ok(Document {
            id,
            name: name.to_string(),
            content: content.to_string(),
            doc_type: doc_type.to_string(),
            size,
            created_at: now,
            is_active: true,
        })
    }

    pub fn add_base64(&self, name: &str, content_b64: &str, doc_type: &str, size: i64) -> anyhow::Result<Document> {
        let content = TextUtils::decode_base64_utf8(content_b64)?;
        self.add(name, &content, doc_type, size)
    }

    /// Newest first
    pub fn get_all(&self, active_only: bool) -> anyhow::Result<Vec<Document>> {
        let conn = self.get_conn()?;
        let sql = if active_only {
            "SELECT id, name, content, type, size, created_at, is_active FROM documents
             WHERE is_active = 1 ORDER BY created_at DESC, id DESC"
        } else {
            "SELECT id, name, content, type, size, created_at, is_active FROM documents
             ORDER BY created_at DESC, id DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(Self::row_to_document(row)?);
        }
        Ok(documents)
    }

    /// Content of an active document; inactive or unknown ids give `None`
    pub fn get_content(&self, id: i64) -> anyhow::Result<Option<String>> {
        let conn = self.get_conn()?;
        let content = conn
            .query_row(
                "SELECT content FROM documents WHERE id = ?1 AND is_active = 1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }

    pub fn delete(&self, id: i64) -> anyhow::Result<bool> {
        self.toggle(id, false)
    }

    pub fn clear_all(&self) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let cleared = conn.execute("UPDATE documents SET is_active = 0 WHERE is_active = 1", [])?;
        info!("Cleared {} documents", cleared);
        Ok(cleared)
    }

    pub fn toggle(&self, id: i64, active: bool) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE documents SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        info!("Document {} active: {}", id, active);
        Ok(changed > 0)
    }

    fn row_to_document(row: &Row) -> anyhow::Result<Document> {
        let created_at = parse_timestamp(&row.get::<_, String>(5)?)
            .unwrap_or_else(|| { warn!("Failed parse document created_at"); Utc::now() });

        Ok(Document {
            id: row.get(0)?,
            name: row.get(1)?,
            content: row.get(2)?,
            doc_type: row.get(3)?,
            size: row.get(4)?,
            created_at,
            is_active: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    #[test]
    fn test_add_and_read_content() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let doc = db.documents.add("notes.txt", "hello", DEFAULT_DOCUMENT_TYPE, 5).unwrap();
        assert_eq!(db.documents.get_content(doc.id).unwrap().as_deref(), Some("hello"));
        assert_eq!(db.documents.get_content(doc.id + 1).unwrap(), None);
    }

    #[test]
    fn test_add_base64_rejects_garbage() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let doc = db.documents.add_base64("a.md", "IyBUaXRsZQ==", "text/markdown", 7).unwrap();
        assert_eq!(doc.content, "# Title");
        assert!(db.documents.add_base64("b.md", "***", "text/markdown", 3).is_err());
    }

    #[test]
    fn test_toggle_and_soft_delete() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let doc = db.documents.add("a", "x", DEFAULT_DOCUMENT_TYPE, 1).unwrap();

        assert!(db.documents.delete(doc.id).unwrap());
        assert_eq!(db.documents.get_content(doc.id).unwrap(), None);
        assert!(db.documents.get_all(true).unwrap().is_empty());
        assert_eq!(db.documents.get_all(false).unwrap().len(), 1);

        assert!(db.documents.toggle(doc.id, true).unwrap());
        assert_eq!(db.documents.get_content(doc.id).unwrap().as_deref(), Some("x"));
        assert!(!db.documents.toggle(999, true).unwrap());
    }

    #[test]
    fn test_clear_all() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.documents.add("a", "x", DEFAULT_DOCUMENT_TYPE, 1).unwrap();
        db.documents.add("b", "y", DEFAULT_DOCUMENT_TYPE, 1).unwrap();
        assert_eq!(db.documents.clear_all().unwrap(), 2);
        assert!(db.documents.get_all(true).unwrap().is_empty());
    }
}
