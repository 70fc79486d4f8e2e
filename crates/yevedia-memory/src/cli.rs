// yevedia/crates/yevedia-memory/src/cli.rs
//! Command line front end. Every command prints one JSON document on stdout.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::memory_db::{MemoryDatabase, MemoryUpdate, Role, SearchResults, DEFAULT_CATEGORY};
use crate::memory_db::document_store::DEFAULT_DOCUMENT_TYPE;
use crate::web_knowledge::KnowledgeStore;

#[derive(Debug, Parser)]
#[command(name = "yevedia-memory", version, about = "Memory, history and search cache storage")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database and knowledge directory
    Init,
    /// Row counts and file size
    Stats,
    /// ANALYZE, vacuum and integrity check
    Maintain,
    #[command(subcommand)]
    Memory(MemoryCommand),
    #[command(subcommand)]
    Document(DocumentCommand),
    #[command(subcommand)]
    Conversation(ConversationCommand),
    #[command(subcommand)]
    Cache(CacheCommand),
    #[command(subcommand)]
    Knowledge(KnowledgeCommand),
}

#[derive(Debug, Args)]
pub struct Base64Flag {
    /// Text arguments are base64-encoded UTF-8
    #[arg(long)]
    pub base64: bool,
}

#[derive(Debug, Subcommand)]
pub enum MemoryCommand {
    Add {
        title: String,
        content: String,
        #[arg(long, default_value = DEFAULT_CATEGORY)]
        category: String,
        #[arg(long, default_value_t = 1)]
        priority: i64,
        #[command(flatten)]
        encoding: Base64Flag,
    },
    List {
        /// Include soft-deleted memories
        #[arg(long)]
        all: bool,
        #[arg(long)]
        category: Option<String>,
    },
    Search { text: String },
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
    },
    Delete {
        id: i64,
        /// Remove the row instead of deactivating it
        #[arg(long)]
        hard: bool,
    },
    Clear,
    Context,
}

#[derive(Debug, Subcommand)]
pub enum DocumentCommand {
    Add {
        name: String,
        content: String,
        #[arg(long = "type", default_value = DEFAULT_DOCUMENT_TYPE)]
        doc_type: String,
        /// Original size in bytes; defaults to the content length
        #[arg(long)]
        size: Option<i64>,
        #[command(flatten)]
        encoding: Base64Flag,
    },
    List {
        #[arg(long)]
        all: bool,
    },
    Show { id: i64 },
    Delete { id: i64 },
    Clear,
    Toggle {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConversationCommand {
    Create {
        /// Generated when omitted
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    List {
        #[arg(long)]
        session: Option<String>,
    },
    Message {
        conversation_id: i64,
        role: String,
        content: String,
    },
    Messages { conversation_id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    Lookup {
        query: String,
        /// Defaults to CACHE_MAX_AGE_HOURS
        #[arg(long)]
        max_age_hours: Option<u32>,
    },
    Store {
        query: String,
        /// JSON array of results
        results: String,
        #[arg(long)]
        source: Option<String>,
    },
    Stats,
    Purge {
        /// Only entries at least this old; everything when omitted
        #[arg(long)]
        older_than_hours: Option<u32>,
    },
}

#[derive(Debug, Subcommand)]
pub enum KnowledgeCommand {
    Save {
        query: String,
        /// JSON array of results
        results: String,
        #[arg(long)]
        source: Option<String>,
    },
    Get { query: String },
    List,
    Show { filename: String },
    Delete { filename: String },
    Stats,
}

/// Execute one command against the stores named by `cfg`
pub fn run(cli: Cli, cfg: &Config) -> anyhow::Result<Value> {
    debug!("Running {:?}", cli.command);
    match cli.command {
        Command::Init => {
            let db = open_database(cfg)?;
            let knowledge = KnowledgeStore::open(&cfg.knowledge_dir)?;
            Ok(json!({
                "database": cfg.db_path.display().to_string(),
                "schema_version": db.schema_version()?,
                "knowledge_dir": knowledge.dir().display().to_string(),
            }))
        }
        Command::Stats => Ok(serde_json::to_value(open_database(cfg)?.get_stats()?)?),
        Command::Maintain => {
            open_database(cfg)?.run_maintenance()?;
            Ok(json!({ "success": true }))
        }
        Command::Memory(cmd) => run_memory(cmd, &open_database(cfg)?),
        Command::Document(cmd) => run_document(cmd, &open_database(cfg)?),
        Command::Conversation(cmd) => run_conversation(cmd, &open_database(cfg)?),
        Command::Cache(cmd) => run_cache(cmd, &open_database(cfg)?, cfg),
        Command::Knowledge(cmd) => run_knowledge(cmd, &KnowledgeStore::open(&cfg.knowledge_dir)?, cfg),
    }
}

fn open_database(cfg: &Config) -> anyhow::Result<MemoryDatabase> {
    MemoryDatabase::new(&cfg.db_path, cfg.pool_size)
}

fn parse_results(raw: &str) -> anyhow::Result<SearchResults> {
    serde_json::from_str(raw).context("Results must be a JSON array")
}

fn run_memory(cmd: MemoryCommand, db: &MemoryDatabase) -> anyhow::Result<Value> {
    let value = match cmd {
        MemoryCommand::Add { title, content, category, priority, encoding } => {
            let memory = if encoding.base64 {
                db.memories.add_base64(&title, &content, &category, priority)?
            } else {
                db.memories.add(&title, &content, &category, priority)?
            };
            serde_json::to_value(memory)?
        }
        MemoryCommand::List { all, category } => match category {
            Some(category) => serde_json::to_value(db.memories.get_by_category(&category)?)?,
            None => serde_json::to_value(db.memories.get_all(!all)?)?,
        },
        MemoryCommand::Search { text } => serde_json::to_value(db.memories.search(&text)?)?,
        MemoryCommand::Update { id, title, content, category, priority } => {
            let update = MemoryUpdate { title, content, category, priority };
            json!({ "success": db.memories.update(id, &update)? })
        }
        MemoryCommand::Delete { id, hard } => json!({ "success": db.memories.delete(id, !hard)? }),
        MemoryCommand::Clear => json!({ "cleared": db.memories.clear_all()? }),
        MemoryCommand::Context => json!({ "context": db.memories.build_context()? }),
    };
    Ok(value)
}

fn run_document(cmd: DocumentCommand, db: &MemoryDatabase) -> anyhow::Result<Value> {
    let value = match cmd {
        DocumentCommand::Add { name, content, doc_type, size, encoding } => {
            let size = size.unwrap_or(content.len() as i64);
            let document = if encoding.base64 {
                db.documents.add_base64(&name, &content, &doc_type, size)?
            } else {
                db.documents.add(&name, &content, &doc_type, size)?
            };
            serde_json::to_value(document)?
        }
        DocumentCommand::List { all } => serde_json::to_value(db.documents.get_all(!all)?)?,
        DocumentCommand::Show { id } => json!({ "content": db.documents.get_content(id)? }),
        DocumentCommand::Delete { id } => json!({ "success": db.documents.delete(id)? }),
        DocumentCommand::Clear => json!({ "cleared": db.documents.clear_all()? }),
        DocumentCommand::Toggle { id, active } => json!({ "success": db.documents.toggle(id, active)? }),
    };
    Ok(value)
}

fn run_conversation(cmd: ConversationCommand, db: &MemoryDatabase) -> anyhow::Result<Value> {
    let value = match cmd {
        ConversationCommand::Create { session, title } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            serde_json::to_value(db.conversations.create(&session, title.as_deref())?)?
        }
        ConversationCommand::List { session } => match session {
            Some(session) => serde_json::to_value(db.conversations.get_by_session(&session)?)?,
            None => serde_json::to_value(db.conversations.get_all()?)?,
        },
        ConversationCommand::Message { conversation_id, role, content } => {
            let role: Role = role.parse()?;
            serde_json::to_value(db.conversations.add_message(conversation_id, role, &content)?)?
        }
        ConversationCommand::Messages { conversation_id } => {
            serde_json::to_value(db.conversations.get_messages(conversation_id)?)?
        }
    };
    Ok(value)
}

fn run_cache(cmd: CacheCommand, db: &MemoryDatabase, cfg: &Config) -> anyhow::Result<Value> {
    let value = match cmd {
        CacheCommand::Lookup { query, max_age_hours } => {
            let hours = max_age_hours.unwrap_or(cfg.cache_max_age_hours);
            match db.search_cache.lookup(&query, hours)? {
                Some(hit) => serde_json::to_value(hit)?,
                None => json!({ "found": false }),
            }
        }
        CacheCommand::Store { query, results, source } => {
            let results = parse_results(&results)?;
            let source = source.unwrap_or_else(|| cfg.default_source.clone());
            serde_json::to_value(db.search_cache.store(&query, &results, &source)?)?
        }
        CacheCommand::Stats => serde_json::to_value(db.search_cache.stats()?)?,
        CacheCommand::Purge { older_than_hours } => {
            json!({ "deleted": db.search_cache.purge(older_than_hours)? })
        }
    };
    Ok(value)
}

fn run_knowledge(cmd: KnowledgeCommand, store: &KnowledgeStore, cfg: &Config) -> anyhow::Result<Value> {
    let value = match cmd {
        KnowledgeCommand::Save { query, results, source } => {
            let results = parse_results(&results)?;
            let source = source.unwrap_or_else(|| cfg.default_source.clone());
            serde_json::to_value(store.save(&query, &results, &source)?)?
        }
        KnowledgeCommand::Get { query } => match store.get(&query)? {
            Some(hit) => serde_json::to_value(hit)?,
            None => json!({ "found": false }),
        },
        KnowledgeCommand::List => serde_json::to_value(store.list_all()?)?,
        KnowledgeCommand::Show { filename } => match store.get_details(&filename)? {
            Some(record) => serde_json::to_value(record)?,
            None => json!({ "found": false }),
        },
        KnowledgeCommand::Delete { filename } => json!({ "success": store.delete(&filename)? }),
        KnowledgeCommand::Stats => serde_json::to_value(store.stats()?)?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            db_path: dir.path().join("memory.db"),
            knowledge_dir: dir.path().join("web_knowledge"),
            pool_size: 2,
            ..Config::default()
        }
    }

    fn exec(cfg: &Config, args: &[&str]) -> anyhow::Result<Value> {
        let mut argv = vec!["yevedia-memory"];
        argv.extend_from_slice(args);
        run(Cli::try_parse_from(argv)?, cfg)
    }

    #[test]
    fn test_init_creates_both_stores() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);
        let out = exec(&cfg, &["init"]).unwrap();
        assert!(out["schema_version"].as_i64().unwrap() >= 3);
        assert!(cfg.db_path.exists());
        assert!(cfg.knowledge_dir.is_dir());
    }

    #[test]
    fn test_memory_commands() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);

        let title = STANDARD.encode("Nom");
        let content = STANDARD.encode("Je m'appelle Léa");
        let added = exec(&cfg, &["memory", "add", &title, &content, "--category", "identity", "--base64"]).unwrap();
        assert_eq!(added["content"], "Je m'appelle Léa");
        let id = added["id"].as_i64().unwrap().to_string();

        let found = exec(&cfg, &["memory", "search", "Léa"]).unwrap();
        assert_eq!(found.as_array().unwrap().len(), 1);

        let updated = exec(&cfg, &["memory", "update", &id, "--priority", "5"]).unwrap();
        assert_eq!(updated["success"], true);

        let context = exec(&cfg, &["memory", "context"]).unwrap();
        assert!(context["context"].as_str().unwrap().contains("Je m'appelle Léa"));

        exec(&cfg, &["memory", "delete", &id]).unwrap();
        assert!(exec(&cfg, &["memory", "list"]).unwrap().as_array().unwrap().is_empty());
        assert_eq!(exec(&cfg, &["memory", "list", "--all"]).unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_conversation_commands() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);

        let conv = exec(&cfg, &["conversation", "create"]).unwrap();
        assert!(!conv["session_id"].as_str().unwrap().is_empty());
        let id = conv["id"].as_i64().unwrap().to_string();

        exec(&cfg, &["conversation", "message", &id, "user", "Bonjour"]).unwrap();
        exec(&cfg, &["conversation", "message", &id, "assistant", "Salut"]).unwrap();
        assert!(exec(&cfg, &["conversation", "message", &id, "narrator", "x"]).is_err());

        let messages = exec(&cfg, &["conversation", "messages", &id]).unwrap();
        let messages = messages.as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_cache_commands_use_configured_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);

        assert_eq!(exec(&cfg, &["cache", "lookup", "rust"]).unwrap()["found"], false);
        exec(&cfg, &["cache", "store", "Rust!", r#"[{"title":"Rust"}]"#]).unwrap();

        let hit = exec(&cfg, &["cache", "lookup", "rust"]).unwrap();
        assert_eq!(hit["source"], "duckduckgo (cache)");

        assert!(exec(&cfg, &["cache", "store", "rust", "not json"]).is_err());
        assert_eq!(exec(&cfg, &["cache", "purge"]).unwrap()["deleted"], 1);
    }

    #[test]
    fn test_knowledge_commands() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);

        let saved = exec(&cfg, &["knowledge", "save", "tokio runtime", "[]", "--source", "searx"]).unwrap();
        let filename = saved["filename"].as_str().unwrap().to_string();

        let hit = exec(&cfg, &["knowledge", "get", "Tokio runtime"]).unwrap();
        assert_eq!(hit["source"], "searx (saved)");

        assert_eq!(exec(&cfg, &["knowledge", "list"]).unwrap().as_array().unwrap().len(), 1);
        assert_eq!(exec(&cfg, &["knowledge", "delete", &filename]).unwrap()["success"], true);
        assert_eq!(exec(&cfg, &["knowledge", "show", &filename]).unwrap()["found"], false);
    }
}
