// yevedia/crates/yevedia-memory/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::memory_db::{DEFAULT_MAX_AGE_HOURS, DEFAULT_POOL_SIZE};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub knowledge_dir: PathBuf,
    pub cache_max_age_hours: u32,
    pub pool_size: u32,
    pub default_source: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/memory.db"),
            knowledge_dir: PathBuf::from("data/web_knowledge"),
            cache_max_age_hours: DEFAULT_MAX_AGE_HOURS,
            pool_size: DEFAULT_POOL_SIZE,
            default_source: "duckduckgo".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults, set but
    /// unparseable numbers are an error.
    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("YEVEDIA_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path);
        let knowledge_dir = lookup("YEVEDIA_KNOWLEDGE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.knowledge_dir);

        let cache_max_age_hours = match lookup("CACHE_MAX_AGE_HOURS") {
            Some(raw) => raw.trim().parse().with_context(|| format!("Invalid CACHE_MAX_AGE_HOURS: {}", raw))?,
            None => defaults.cache_max_age_hours,
        };
        let pool_size: u32 = match lookup("DB_POOL_SIZE") {
            Some(raw) => raw.trim().parse().with_context(|| format!("Invalid DB_POOL_SIZE: {}", raw))?,
            None => defaults.pool_size,
        };
        if pool_size == 0 {
            return Err(anyhow::anyhow!("DB_POOL_SIZE must be at least 1"));
        }

        let default_source = lookup("DEFAULT_SEARCH_SOURCE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.default_source);

        Ok(Self { db_path, knowledge_dir, cache_max_age_hours, pool_size, default_source })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.db_path.display());
        info!("- Knowledge Dir: {}", self.knowledge_dir.display());
        info!("- Cache Max Age: {}h", self.cache_max_age_hours);
        info!("- Pool Size: {}", self.pool_size);
        info!("- Default Source: {}", self.default_source);
    }
}
