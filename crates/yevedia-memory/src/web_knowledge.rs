//! Durable knowledge store: one human-readable JSON file per normalized query.
//!
//! Every file is both the cache entry and its own persistence; access counts
//! and timestamps live inside the file. Records never expire, they are only
//! removed by an explicit [`KnowledgeStore::delete`].
use crate::memory_db::SearchResults;
use crate::utils::TextUtils;
use anyhow::Context;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const KNOWLEDGE_SOURCE_SUFFIX: &str = " (saved)";
const DIGEST_LEN: usize = 8;

/// Full on-disk record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub query: String,
    #[serde(default)]
    pub query_normalized: String,
    #[serde(default)]
    pub results: SearchResults,
    #[serde(default)]
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSaveReceipt {
    pub filename: String,
    pub path: PathBuf,
    pub results_count: usize,
    pub access_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub query: String,
    pub results: SearchResults,
    /// Original source label with a ` (saved)` suffix
    pub source: String,
    pub saved_at: DateTime<Utc>,
    pub access_count: u64,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSummary {
    pub filename: String,
    pub query: String,
    pub source: String,
    pub results_count: usize,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub total_searches: usize,
    pub total_results: usize,
    pub total_accesses: u64,
    pub storage_path: PathBuf,
}

pub struct KnowledgeStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on the same file
    file_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KnowledgeStore {
    /// Open the store, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create knowledge directory {}", dir.display()))?;
        info!("Knowledge store at: {}", dir.display());
        Ok(Self { dir, file_locks: DashMap::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic filename for a query: sanitized prefix of the normalized
    /// query plus a short digest of it. Distinct queries with the same
    /// normalized form map to the same file.
    pub fn filename_for(query: &str) -> String {
        let normalized = TextUtils::normalize_query(query);
        format!(
            "{}_{}.json",
            TextUtils::sanitize_for_filename(&normalized),
            TextUtils::short_digest(&normalized, DIGEST_LEN)
        )
    }

    /// Write `results` for `query`, keeping the original `created_at` and
    /// bumping `access_count` when a record already exists.
    pub fn save(&self, query: &str, results: &[serde_json::Value], source: &str) -> anyhow::Result<KnowledgeSaveReceipt> {
        let filename = Self::filename_for(query);
        let path = self.dir.join(&filename);
        let lock = self.lock_for(&filename);
        let _guard = lock.lock().map_err(|_| anyhow::anyhow!("Knowledge file lock poisoned: {}", filename))?;

        let now = Utc::now();
        let (created_at, access_count) = match self.read_record(&path)? {
            Some(existing) => (existing.created_at, existing.access_count + 1),
            None => (now, 1),
        };

        let record = KnowledgeRecord {
            query: query.to_string(),
            query_normalized: TextUtils::normalize_query(query),
            results: results.to_vec(),
            source: source.to_string(),
            created_at,
            updated_at: now,
            access_count,
        };
        self.write_record(&path, &record)?;

        debug!("Saved {} results for '{}' to {}", results.len(), query, filename);
        Ok(KnowledgeSaveReceipt { filename, path, results_count: results.len(), access_count })
    }

    /// Stored results for `query`, counting the access. `Ok(None)` when there
    /// is no file or the file cannot be parsed.
    pub fn get(&self, query: &str) -> anyhow::Result<Option<KnowledgeHit>> {
        let filename = Self::filename_for(query);
        let path = self.dir.join(&filename);
        let lock = self.lock_for(&filename);
        let _guard = lock.lock().map_err(|_| anyhow::anyhow!("Knowledge file lock poisoned: {}", filename))?;

        let Some(mut record) = self.read_record(&path)? else {
            debug!("Knowledge miss for '{}'", query);
            return Ok(None);
        };
        record.access_count += 1;
        record.updated_at = Utc::now();
        self.write_record(&path, &record)?;

        debug!("Knowledge hit for '{}' ({} accesses)", query, record.access_count);
        Ok(Some(KnowledgeHit {
            query: record.query,
            results: record.results,
            source: format!("{}{}", record.source, KNOWLEDGE_SOURCE_SUFFIX),
            saved_at: record.created_at,
            access_count: record.access_count,
            filename,
        }))
    }

    /// Summaries of every readable record, newest first. Unreadable or
    /// malformed files are logged and skipped.
    pub fn list_all(&self) -> anyhow::Result<Vec<KnowledgeSummary>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read knowledge directory {}", self.dir.display()))?;

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let record = match self.read_record(&path) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping unreadable knowledge file {}: {:#}", filename, e);
                    continue;
                }
            };
            summaries.push(KnowledgeSummary {
                filename,
                query: record.query,
                source: record.source,
                results_count: record.results.len(),
                access_count: record.access_count,
                created_at: record.created_at,
                updated_at: record.updated_at,
            });
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Remove a record by exact filename; false when it did not exist.
    /// Also drops the file's lock entry unless another caller is holding it.
    pub fn delete(&self, filename: &str) -> anyhow::Result<bool> {
        let path = self.resolve(filename)?;
        let lock = self.lock_for(filename);
        let _guard = lock.lock().map_err(|_| anyhow::anyhow!("Knowledge file lock poisoned: {}", filename))?;

        let removed = match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted knowledge file {}", filename);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        };

        // the map and `lock` account for two references; more means a waiter
        self.file_locks.remove_if(filename, |_, entry| Arc::strong_count(entry) <= 2);
        removed
    }

    /// Full record by exact filename, without counting an access
    pub fn get_details(&self, filename: &str) -> anyhow::Result<Option<KnowledgeRecord>> {
        let path = self.resolve(filename)?;
        self.read_record(&path)
    }

    pub fn stats(&self) -> anyhow::Result<KnowledgeStats> {
        let summaries = self.list_all()?;
        Ok(KnowledgeStats {
            total_searches: summaries.len(),
            total_results: summaries.iter().map(|s| s.results_count).sum(),
            total_accesses: summaries.iter().map(|s| s.access_count).sum(),
            storage_path: self.dir.clone(),
        })
    }

    fn lock_for(&self, filename: &str) -> Arc<Mutex<()>> {
        self.file_locks
            .entry(filename.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Only bare `.json` names inside the store directory are addressable
    fn resolve(&self, filename: &str) -> anyhow::Result<PathBuf> {
        let is_bare_name = Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename);
        if !is_bare_name || !filename.ends_with(".json") {
            return Err(anyhow::anyhow!("Invalid knowledge filename: {}", filename));
        }
        Ok(self.dir.join(filename))
    }

    /// `Ok(None)` for a missing or malformed file; other I/O failures are errors.
    fn read_record(&self, path: &Path) -> anyhow::Result<Option<KnowledgeRecord>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        match serde_json::from_str(&text) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Malformed knowledge file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Write through a temporary file and rename, so readers never see a
    /// half-written record.
    fn write_record(&self, path: &Path, record: &KnowledgeRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let store = KnowledgeStore::open(dir.path().join("web_knowledge")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_unreachable_directory_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();
        assert!(KnowledgeStore::open(blocker.join("sub")).is_err());
    }

    #[test]
    fn test_filename_is_deterministic_and_readable() {
        let name = KnowledgeStore::filename_for("What is Rust?");
        assert_eq!(name, KnowledgeStore::filename_for("what is rust"));
        assert!(name.starts_with("what_is_rust_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "what_is_rust_".len() + DIGEST_LEN + ".json".len());
    }

    #[test]
    fn test_save_then_get() {
        let (_dir, store) = store();
        let receipt = store.save("rust traits", &[json!({"title": "Traits"})], "duckduckgo").unwrap();
        assert_eq!(receipt.access_count, 1);
        assert!(receipt.path.exists());

        let hit = store.get("Rust traits!").unwrap().unwrap();
        assert_eq!(hit.results, vec![json!({"title": "Traits"})]);
        assert_eq!(hit.source, "duckduckgo (saved)");
        assert_eq!(hit.access_count, 2);
        assert_eq!(hit.filename, receipt.filename);
    }

    #[test]
    fn test_resave_keeps_created_at_and_counts_accesses() {
        let (_dir, store) = store();
        store.save("q", &[json!(1)], "duckduckgo").unwrap();
        let first = store.get_details(&KnowledgeStore::filename_for("q")).unwrap().unwrap();

        store.save("q", &[json!(2), json!(3)], "google").unwrap();
        let hit = store.get("q").unwrap().unwrap();
        assert_eq!(hit.results, vec![json!(2), json!(3)]);
        assert_eq!(hit.saved_at, first.created_at);
        assert!(hit.access_count >= 2);

        let details = store.get_details(&hit.filename).unwrap().unwrap();
        assert_eq!(details.created_at, first.created_at);
        assert_eq!(details.access_count, 3);
        assert!(details.updated_at >= first.updated_at);
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_dir, store) = store();
        assert!(store.get("never saved").unwrap().is_none());
    }

    #[test]
    fn test_list_all_skips_corrupt_files_and_sorts_newest_first() {
        let (_dir, store) = store();
        store.save("older", &[json!(1)], "duckduckgo").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save("newer", &[json!(1), json!(2)], "duckduckgo").unwrap();
        fs::write(store.dir().join("broken_0000abcd.json"), "{ not json").unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let listed = store.list_all().unwrap();
        let queries: Vec<&str> = listed.iter().map(|s| s.query.as_str()).collect();
        assert_eq!(queries, vec!["newer", "older"]);
        assert_eq!(listed[0].results_count, 2);
    }

    #[test]
    fn test_corrupt_file_is_a_miss_and_gets_replaced_on_save() {
        let (_dir, store) = store();
        let filename = KnowledgeStore::filename_for("flaky");
        fs::write(store.dir().join(&filename), "[").unwrap();

        assert!(store.get("flaky").unwrap().is_none());
        let receipt = store.save("flaky", &[json!("ok")], "duckduckgo").unwrap();
        assert_eq!(receipt.access_count, 1);
        assert!(store.get("flaky").unwrap().is_some());
    }

    #[test]
    fn test_delete_by_filename() {
        let (_dir, store) = store();
        let receipt = store.save("to delete", &[], "duckduckgo").unwrap();
        assert!(store.delete(&receipt.filename).unwrap());
        assert!(!store.delete(&receipt.filename).unwrap());
        assert!(store.get("to delete").unwrap().is_none());
    }

    #[test]
    fn test_delete_releases_lock_entry() {
        let (_dir, store) = store();
        let kept = store.save("kept", &[json!(1)], "duckduckgo").unwrap();
        let gone = store.save("gone", &[json!(1)], "duckduckgo").unwrap();
        assert_eq!(store.file_locks.len(), 2);

        assert!(store.delete(&gone.filename).unwrap());
        assert_eq!(store.file_locks.len(), 1);
        assert!(store.file_locks.contains_key(&kept.filename));

        assert!(!store.delete(&gone.filename).unwrap());
        assert_eq!(store.file_locks.len(), 1);
    }

    #[test]
    fn test_filenames_outside_the_store_are_rejected() {
        let (_dir, store) = store();
        assert!(store.delete("../escape.json").is_err());
        assert!(store.get_details("sub/dir.json").is_err());
        assert!(store.get_details("plain.txt").is_err());
    }

    #[test]
    fn test_stats_sum_over_listing() {
        let (_dir, store) = store();
        store.save("a", &[json!(1), json!(2)], "duckduckgo").unwrap();
        store.save("b", &[json!(3)], "duckduckgo").unwrap();
        store.get("a").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_searches, 2);
        assert_eq!(stats.total_results, 3);
        assert_eq!(stats.total_accesses, 3);
        assert_eq!(stats.storage_path, store.dir());
    }

    #[test]
    fn test_concurrent_saves_do_not_lose_increments() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.save("race", &[json!(1)], "duckduckgo").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let details = store.get_details(&KnowledgeStore::filename_for("race")).unwrap().unwrap();
        assert_eq!(details.access_count, 8);
    }
}
