//! ============================================================================
//! Memory Configuration - backend, layout and retrieval settings
//! ============================================================================
//! `MemoryConfig::default()` reads the process environment; load a `.env`
//! file first if one should apply.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::embeddings::{DEFAULT_DIMENSION, DEFAULT_EMBEDDING_MODEL};

/// Which vector index backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Remote Qdrant service
    Qdrant,
    /// Local redb file
    Embedded,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(StoreBackend::Qdrant),
            "embedded" | "local" | "redb" => Ok(StoreBackend::Embedded),
            _ => Err(format!("Unknown store backend: {}", s)),
        }
    }
}

/// How chat messages map onto indexes.
///
/// `PerChat` isolates each chat in its own index, so deleting a chat is a
/// single index drop, but the index count grows with the chat count.
/// `Shared` keeps one message index with `chat_id` as an exact filter, so the
/// index count stays constant, but deleting a chat is a filtered delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexLayout {
    PerChat,
    Shared,
}

impl FromStr for IndexLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-chat" | "per_chat" | "perchat" => Ok(IndexLayout::PerChat),
            "shared" => Ok(IndexLayout::Shared),
            _ => Err(format!("Unknown index layout: {}", s)),
        }
    }
}

/// Which embedding provider to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Http,
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "openai" => Ok(EmbeddingBackend::Http),
            "hashing" | "local" => Ok(EmbeddingBackend::Hashing),
            _ => Err(format!("Unknown embedding backend: {}", s)),
        }
    }
}

/// Memory subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub backend: StoreBackend,
    pub qdrant_url: String,
    /// Access credential for the vector store; never serialized
    #[serde(skip_serializing)]
    pub qdrant_api_key: Option<String>,
    /// Embedded database file; `None` resolves to ~/.chatmem/index.redb
    pub db_path: Option<PathBuf>,
    pub layout: IndexLayout,
    pub embedding: EmbeddingBackend,
    pub embedding_base_url: String,
    #[serde(skip_serializing)]
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub dimension: usize,
    /// Default number of exchanges injected as context
    pub context_limit: usize,
    /// Default cap for full message listings
    pub message_limit: usize,
    /// Upper bound on chats returned for one user
    pub chat_listing_cap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: env_parsed("CHATMEM_BACKEND", StoreBackend::Embedded),
            qdrant_url: std::env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6334".to_string()),
            qdrant_api_key: std::env::var("QDRANT_API_KEY").ok(),
            db_path: std::env::var("CHATMEM_DB_PATH").ok().map(PathBuf::from),
            layout: env_parsed("CHATMEM_LAYOUT", IndexLayout::PerChat),
            embedding: env_parsed("CHATMEM_EMBEDDING", EmbeddingBackend::Hashing),
            embedding_base_url: std::env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string()),
            dimension: env_parsed("EMBEDDING_DIM", DEFAULT_DIMENSION),
            context_limit: env_parsed("CHATMEM_CONTEXT_LIMIT", 3),
            message_limit: env_parsed("CHATMEM_MESSAGE_LIMIT", 500),
            chat_listing_cap: 1000,
        }
    }
}

impl MemoryConfig {
    /// Resolve the embedded database path, defaulting to ~/.chatmem/index.redb
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        self.db_path
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".chatmem").join("index.redb")))
    }
}

/// Read and parse an environment variable, keeping `default` when the
/// variable is unset or malformed.
fn env_parsed<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring {}={}: {} (using {:?})", key, raw, e, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parsing() {
        assert_eq!("qdrant".parse::<StoreBackend>().unwrap(), StoreBackend::Qdrant);
        assert_eq!("REDB".parse::<StoreBackend>().unwrap(), StoreBackend::Embedded);
        assert_eq!("shared".parse::<IndexLayout>().unwrap(), IndexLayout::Shared);
        assert_eq!("per_chat".parse::<IndexLayout>().unwrap(), IndexLayout::PerChat);
        assert_eq!("openai".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::Http);
        assert!("pinecone".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_env_parsed_falls_back_on_garbage() {
        assert_eq!(env_parsed("CHATMEM_TEST_UNSET_VARIABLE", 7usize), 7);

        std::env::set_var("CHATMEM_TEST_MALFORMED_LIMIT", "lots");
        assert_eq!(env_parsed("CHATMEM_TEST_MALFORMED_LIMIT", 7usize), 7);
        std::env::remove_var("CHATMEM_TEST_MALFORMED_LIMIT");
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let config = MemoryConfig {
            db_path: Some(PathBuf::from("/tmp/chatmem.redb")),
            ..MemoryConfig::default()
        };
        assert_eq!(
            config.resolved_db_path(),
            Some(PathBuf::from("/tmp/chatmem.redb"))
        );
    }

    #[test]
    fn test_credentials_are_not_serialized() {
        let config = MemoryConfig {
            qdrant_api_key: Some("secret".into()),
            embedding_api_key: Some("sk-secret".into()),
            ..MemoryConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
