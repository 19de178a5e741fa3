//! ============================================================================
//! CHATMEM-CORE: Conversational memory for chat assistants
//! ============================================================================
//! Persists question/answer exchanges per chat in a vector index and pulls
//! relevant earlier exchanges back as context for new queries:
//! - Vector index stores: Qdrant or an embedded redb database
//! - Embedding providers: OpenAI-compatible HTTP or offline hashing
//! - Per-user chat metadata (title, created/updated timestamps)
//! - Chat lifecycle: create, record, retrieve, list, rename, delete
//!
//! ## Usage
//! ```rust,ignore
//! use chatmem_core::{ChatMemory, MemoryConfig};
//!
//! let memory = ChatMemory::from_config(MemoryConfig::default())?;
//! let chat = memory.create_chat("u1", None).await?;
//! memory.record_exchange(&chat.chat_id, "u1", "Weather?", "Sunny").await;
//! let context = memory.fetch_context(&chat.chat_id, "And tomorrow?", None).await;
//! ```
//! ============================================================================

pub mod clock;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod ids;
pub mod index;
pub mod lifecycle;
pub mod messages;
pub mod metadata;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use clock::{Clock, SystemClock};
pub use config::{EmbeddingBackend, IndexLayout, MemoryConfig, StoreBackend};
pub use context::{build_prompt, format_context};
pub use embeddings::{create_embedding_provider, EmbeddingProvider, HashingEmbedder, HttpEmbeddingProvider};
pub use error::{MemoryError, MemoryResult, Outcome};
pub use index::{EmbeddedIndexStore, QdrantIndexStore, VectorIndexStore};
pub use lifecycle::{ChatMemory, CreatedChat};
pub use messages::{ChatMessageRepository, MessageRecord};
pub use metadata::{ChatMatch, ChatMetadataRecord, ChatMetadataRepository};
