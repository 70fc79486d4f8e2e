//! Single entry point for cached web search.
//!
//! Consults the relational cache first, then the durable knowledge store, and
//! only then the injected [`SearchProvider`]. Fresh results are written through
//! to both stores. Both stores key on the same normalized query, so a query
//! that hits one can always be found in the other after a write-through.
use crate::memory_db::{CacheWriteReceipt, CachedSearch, MemoryDatabase, SearchResults};
use crate::utils::TextUtils;
use crate::web_knowledge::{KnowledgeHit, KnowledgeSaveReceipt, KnowledgeStore, KnowledgeSummary, KNOWLEDGE_SOURCE_SUFFIX};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Results from a live search backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: SearchResults,
    pub source: String,
}

/// The web search backend. Implementations own their HTTP client and any
/// rate limiting; this crate only caches what they return.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<SearchOutcome>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchOrigin {
    Cache,
    Knowledge,
    Fresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: SearchResults,
    pub source: String,
    pub origin: SearchOrigin,
    /// When the served results were first stored; `None` for fresh results
    pub stored_at: Option<DateTime<Utc>>,
    /// Relational cache hits or knowledge file accesses, depending on origin
    pub hit_count: Option<u64>,
    pub filename: Option<String>,
}

pub struct SearchCache {
    database: Arc<MemoryDatabase>,
    knowledge: Arc<KnowledgeStore>,
    provider: Arc<dyn SearchProvider>,
}

impl SearchCache {
    pub fn new(
        database: Arc<MemoryDatabase>,
        knowledge: Arc<KnowledgeStore>,
        provider: Arc<dyn SearchProvider>,
    ) -> Self {
        Self { database, knowledge, provider }
    }

    /// Cached results if either store has them, otherwise a live search whose
    /// results are then remembered. Store failures are logged and degrade to
    /// a miss; only a failing provider fails the call.
    pub async fn search(&self, query: &str, max_age_hours: u32) -> anyhow::Result<SearchResponse> {
        if TextUtils::normalize_query(query).is_empty() {
            return Err(anyhow::anyhow!("Search query is empty"));
        }

        if let Some(response) = self.lookup(query, max_age_hours) {
            return Ok(response);
        }

        info!("Searching the web for '{}'", query);
        let outcome = self.provider.search(query).await?;
        self.remember(query, &outcome.results, &outcome.source);

        info!("{} results found ({})", outcome.results.len(), outcome.source);
        Ok(SearchResponse {
            query: query.to_string(),
            results: outcome.results,
            source: outcome.source,
            origin: SearchOrigin::Fresh,
            stored_at: None,
            hit_count: None,
            filename: None,
        })
    }

    /// Look in the relational cache, then the knowledge store. A knowledge hit
    /// re-primes the relational cache.
    pub fn lookup(&self, query: &str, max_age_hours: u32) -> Option<SearchResponse> {
        match self.database.search_cache.lookup(query, max_age_hours) {
            Ok(Some(hit)) => {
                debug!("Serving '{}' from cache ({} hits)", query, hit.hit_count);
                return Some(SearchResponse {
                    query: hit.query,
                    results: hit.results,
                    source: hit.source,
                    origin: SearchOrigin::Cache,
                    stored_at: Some(hit.cached_at),
                    hit_count: Some(hit.hit_count.max(0) as u64),
                    filename: None,
                });
            }
            Ok(None) => {}
            Err(e) => warn!("Search cache lookup failed, continuing: {:#}", e),
        }

        match self.knowledge.get(query) {
            Ok(Some(hit)) => {
                debug!("Serving '{}' from knowledge store ({} accesses)", query, hit.access_count);
                let original_source = hit.source.strip_suffix(KNOWLEDGE_SOURCE_SUFFIX).unwrap_or(&hit.source);
                if let Err(e) = self.database.search_cache.store(query, &hit.results, original_source) {
                    warn!("Failed to re-prime search cache: {:#}", e);
                }
                Some(SearchResponse {
                    query: hit.query,
                    results: hit.results,
                    source: hit.source,
                    origin: SearchOrigin::Knowledge,
                    stored_at: Some(hit.saved_at),
                    hit_count: Some(hit.access_count),
                    filename: Some(hit.filename),
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Knowledge store lookup failed, continuing: {:#}", e);
                None
            }
        }
    }

    /// Write results through to both stores
    pub fn remember(&self, query: &str, results: &[serde_json::Value], source: &str) {
        match self.database.search_cache.store(query, results, source) {
            Ok(_) => debug!("Results for '{}' cached", query),
            Err(e) => warn!("Failed to cache results: {:#}", e),
        }
        match self.knowledge.save(query, results, source) {
            Ok(receipt) => debug!("Results for '{}' saved to {}", query, receipt.filename),
            Err(e) => warn!("Failed to save results to knowledge store: {:#}", e),
        }
    }

    // Direct store access. Unlike `search`, these surface store errors.

    pub fn lookup_cache(&self, query: &str, max_age_hours: u32) -> anyhow::Result<Option<CachedSearch>> {
        self.database.search_cache.lookup(query, max_age_hours)
    }

    pub fn store_cache(&self, query: &str, results: &[serde_json::Value], source: &str) -> anyhow::Result<CacheWriteReceipt> {
        self.database.search_cache.store(query, results, source)
    }

    pub fn purge_cache(&self, older_than_hours: Option<u32>) -> anyhow::Result<usize> {
        self.database.search_cache.purge(older_than_hours)
    }

    pub fn save_knowledge(&self, query: &str, results: &[serde_json::Value], source: &str) -> anyhow::Result<KnowledgeSaveReceipt> {
        self.knowledge.save(query, results, source)
    }

    pub fn get_knowledge(&self, query: &str) -> anyhow::Result<Option<KnowledgeHit>> {
        self.knowledge.get(query)
    }

    pub fn list_knowledge(&self) -> anyhow::Result<Vec<KnowledgeSummary>> {
        self.knowledge.list_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SearchProvider for CountingProvider {
        async fn search(&self, query: &str) -> anyhow::Result<SearchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow::anyhow!("backend unreachable"));
            }
            Ok(SearchOutcome {
                results: vec![json!({"title": format!("About {}", query)})],
                source: "duckduckgo".to_string(),
            })
        }
    }

    fn setup(fail: bool) -> (TempDir, Arc<CountingProvider>, SearchCache) {
        let dir = TempDir::new().unwrap();
        let database = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let knowledge = Arc::new(KnowledgeStore::open(dir.path().join("knowledge")).unwrap());
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0), fail });
        let cache = SearchCache::new(database, knowledge, provider.clone());
        (dir, provider, cache)
    }

    #[tokio::test]
    async fn test_fresh_then_cached() {
        let (_dir, provider, cache) = setup(false);

        let first = cache.search("rust lifetimes", 24).await.unwrap();
        assert_eq!(first.origin, SearchOrigin::Fresh);
        assert_eq!(first.source, "duckduckgo");

        let second = cache.search("Rust lifetimes?", 24).await.unwrap();
        assert_eq!(second.origin, SearchOrigin::Cache);
        assert_eq!(second.results, first.results);
        assert_eq!(second.hit_count, Some(1));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_knowledge_store_backs_up_a_purged_cache() {
        let (_dir, provider, cache) = setup(false);
        cache.search("borrow checker", 24).await.unwrap();
        cache.database.search_cache.purge(None).unwrap();

        let from_knowledge = cache.search("borrow checker", 24).await.unwrap();
        assert_eq!(from_knowledge.origin, SearchOrigin::Knowledge);
        assert_eq!(from_knowledge.source, "duckduckgo (saved)");
        assert!(from_knowledge.filename.is_some());

        let primed = cache.search("borrow checker", 24).await.unwrap();
        assert_eq!(primed.origin, SearchOrigin::Cache);
        assert_eq!(primed.source, "duckduckgo (cache)");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broken_knowledge_store_falls_through_to_provider() {
        let (dir, provider, cache) = setup(false);
        let knowledge_dir = dir.path().join("knowledge");
        std::fs::remove_dir_all(&knowledge_dir).unwrap();
        std::fs::write(&knowledge_dir, b"no longer a directory").unwrap();

        let response = cache.search("pattern matching", 24).await.unwrap();
        assert_eq!(response.origin, SearchOrigin::Fresh);
        assert_eq!(response.results.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(cache.get_knowledge("pattern matching").is_err());
    }

    #[tokio::test]
    async fn test_provider_failure_is_surfaced() {
        let (_dir, _provider, cache) = setup(true);
        assert!(cache.search("anything", 24).await.is_err());
        assert!(cache.lookup("anything", 24).is_none());
    }

    #[test]
    fn test_direct_store_access() {
        let (_dir, provider, cache) = setup(false);
        let results = vec![json!({"title": "Ownership"})];

        assert!(cache.lookup_cache("ownership", 24).unwrap().is_none());
        cache.store_cache("Ownership?", &results, "duckduckgo").unwrap();
        assert_eq!(cache.lookup_cache("ownership", 24).unwrap().unwrap().results, results);
        assert_eq!(cache.purge_cache(None).unwrap(), 1);

        let receipt = cache.save_knowledge("ownership", &results, "duckduckgo").unwrap();
        assert_eq!(cache.get_knowledge("OWNERSHIP").unwrap().unwrap().filename, receipt.filename);
        assert_eq!(cache.list_knowledge().unwrap().len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let (_dir, provider, cache) = setup(false);
        let result = tokio_test::block_on(cache.search(" ?! ", 24));
        assert!(result.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
