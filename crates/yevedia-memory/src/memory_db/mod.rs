//! Memory database module - SQLite-based storage for memories, conversations,
//! documents and the web search cache
pub mod schema;
pub mod migration;
pub mod memory_store;
pub mod conversation_store;
pub mod document_store;
pub mod search_cache_store;
pub use schema::*;
pub use migration::MigrationManager;
pub use memory_store::MemoryStore;
pub use conversation_store::ConversationStore;
pub use document_store::DocumentStore;
pub use search_cache_store::{SearchCacheStore, DEFAULT_MAX_AGE_HOURS};
use std::path::Path;
use std::sync::Arc;
use anyhow::Context;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{info, warn};

pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Owner of the connection pool and the per-table stores built on it.
///
/// Construct once at startup and share by reference or `Arc`.
pub struct MemoryDatabase {
    pub memories: MemoryStore,
    pub conversations: ConversationStore,
    pub documents: DocumentStore,
    pub search_cache: SearchCacheStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
    on_disk: bool,
}

impl MemoryDatabase {
    /// Open (or create) the database file and apply pending migrations.
    /// Failing to reach the file is a hard error.
    pub fn new(db_path: &Path, pool_size: u32) -> anyhow::Result<Self> {
        info!("Opening memory database at: {}", db_path.display());
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        info!("Memory database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool), true))
    }

    /// Private in-memory database. Every pooled connection to `:memory:`
    /// would be a separate database, so the pool holds exactly one.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool), false))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>, on_disk: bool) -> Self {
        Self {
            memories: MemoryStore::new(Arc::clone(&pool)),
            conversations: ConversationStore::new(Arc::clone(&pool)),
            documents: DocumentStore::new(Arc::clone(&pool)),
            search_cache: SearchCacheStore::new(Arc::clone(&pool)),
            pool,
            on_disk,
        }
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }

    pub fn schema_version(&self) -> anyhow::Result<i32> {
        let mut conn = self.pool.get()?;
        Ok(MigrationManager::new(&mut conn).get_current_version()?)
    }

    /// ANALYZE, incremental vacuum and an integrity check
    pub fn run_maintenance(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.get()?;
        Ok(migration::run_maintenance(&mut conn)?)
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if !self.on_disk {
            return;
        }
        if let Ok(conn) = self.pool.get() {
            if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                warn!("WAL checkpoint on close failed: {}", e);
            }
        }
    }
}
