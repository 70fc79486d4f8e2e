// yevedia/crates/yevedia-memory/src/lib.rs

pub mod config;
pub mod memory_db;
pub mod search_cache;
pub mod telemetry;
pub mod utils;
pub mod web_knowledge;

#[cfg(feature = "cli")]
pub mod cli;

// Public API exports
pub use config::Config;
pub use memory_db::{
    CacheStats, CachedSearch, Conversation, DatabaseStats, Document, Memory, MemoryDatabase, MemoryUpdate, Role,
    SearchResults, StoredMessage,
};
pub use search_cache::{SearchCache, SearchOrigin, SearchOutcome, SearchProvider, SearchResponse};
pub use utils::TextUtils;
pub use web_knowledge::{KnowledgeRecord, KnowledgeStore};

/// Canonical form of a search query shared by the search cache and the
/// knowledge store
pub fn normalize_query(query: &str) -> String {
    TextUtils::normalize_query(query)
}
