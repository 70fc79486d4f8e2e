//! Row types for the memory database
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A web search result list, kept opaque so any search backend's shape fits
pub type SearchResults = Vec<serde_json::Value>;

/// Memory categories understood by [`crate::memory_db::MemoryStore::build_context`],
/// in the order they appear in the prompt context. Other values are stored as-is.
pub const KNOWN_CATEGORIES: [(&str, &str); 4] = [
    ("identity", "Identity"),
    ("preferences", "Preferences"),
    ("knowledge", "Knowledge"),
    ("instructions", "Instructions"),
];

pub const DEFAULT_CATEGORY: &str = "knowledge";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: String,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Partial update for a memory; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub priority: Option<i64>,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.category.is_none() && self.priority.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub session_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(anyhow::anyhow!("Unknown message role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: i64,
    pub name: String,
    pub content: String,
    pub doc_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// One row of the web search cache table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: i64,
    pub query: String,
    pub query_normalized: String,
    pub results: SearchResults,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub hit_count: i64,
}

/// A cache hit as handed back to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSearch {
    pub query: String,
    pub results: SearchResults,
    /// Original source label with a ` (cache)` suffix
    pub source: String,
    pub cached_at: DateTime<Utc>,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheWriteReceipt {
    pub id: i64,
    pub query: String,
    pub results_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopQuery {
    pub query: String,
    pub hit_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_cached: i64,
    pub total_hits: i64,
    pub top_queries: Vec<TopQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: i64,
    pub by_category: BTreeMap<String, i64>,
    pub total_conversations: i64,
    pub total_messages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_memories: i64,
    pub total_conversations: i64,
    pub total_messages: i64,
    pub total_documents: i64,
    pub total_cache_entries: i64,
    pub database_size_bytes: i64,
}
