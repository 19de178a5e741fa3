//! ============================================================================
//! Chat Memory - chat lifecycle over the message and metadata repositories
//! ============================================================================
//! High-level API used by a dialog layer: create chats, record exchanges,
//! pull context for a new query, list and delete chats.
//!
//! Structural operations (create, delete, rename) propagate every failure.
//! Context retrieval and message listing degrade to empty results, and the
//! metadata touch after a message write is best-effort.
//! ============================================================================

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{MemoryConfig, StoreBackend};
use crate::embeddings::{create_embedding_provider, EmbeddingProvider};
use crate::error::{MemoryError, MemoryResult, Outcome};
use crate::ids::validate_id;
use crate::index::{EmbeddedIndexStore, QdrantIndexStore, VectorIndexStore};
use crate::messages::{ChatMessageRepository, MessageRecord};
use crate::metadata::{ChatMatch, ChatMetadataRecord, ChatMetadataRepository};

/// Identifiers of a freshly created chat
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedChat {
    pub chat_id: String,
    pub metadata_id: Uuid,
    /// Index holding the chat's messages
    pub index_name: String,
    pub title: String,
}

/// Coordinates chat creation, exchange recording, retrieval and deletion
pub struct ChatMemory {
    store: Arc<dyn VectorIndexStore>,
    messages: ChatMessageRepository,
    metadata: ChatMetadataRepository,
    config: MemoryConfig,
}

impl ChatMemory {
    /// Create a chat memory on the wall clock
    pub fn new(
        store: Arc<dyn VectorIndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: MemoryConfig,
    ) -> Self {
        Self::with_clock(store, embedder, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: Arc<dyn VectorIndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        clock: Arc<dyn Clock>,
        config: MemoryConfig,
    ) -> Self {
        let messages = ChatMessageRepository::new(
            store.clone(),
            embedder.clone(),
            clock.clone(),
            config.layout,
        );
        let metadata =
            ChatMetadataRepository::new(store.clone(), embedder, clock, config.chat_listing_cap);

        Self {
            store,
            messages,
            metadata,
            config,
        }
    }

    /// Build the store and embedding provider the configuration selects
    pub fn from_config(config: MemoryConfig) -> MemoryResult<Self> {
        let store: Arc<dyn VectorIndexStore> = match config.backend {
            StoreBackend::Qdrant => {
                info!("Using Qdrant at {}", config.qdrant_url);
                Arc::new(QdrantIndexStore::connect(
                    &config.qdrant_url,
                    config.qdrant_api_key.clone(),
                )?)
            }
            StoreBackend::Embedded => {
                let path = config.resolved_db_path().ok_or_else(|| {
                    MemoryError::StoreUnavailable(
                        "No database path configured and no home directory".to_string(),
                    )
                })?;
                Arc::new(EmbeddedIndexStore::open(&path)?)
            }
        };
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_embedding_provider(&config));

        info!(
            "Chat memory ready ({:?} store, {:?} layout, {} embeddings, dim {})",
            config.backend,
            config.layout,
            embedder.model(),
            embedder.dimension()
        );
        Ok(Self::new(store, embedder, config))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn messages(&self) -> &ChatMessageRepository {
        &self.messages
    }

    pub fn metadata(&self) -> &ChatMetadataRepository {
        &self.metadata
    }

    /// Create a chat: its message index first, then its metadata record.
    ///
    /// Not transactional. If the metadata write fails the empty message index
    /// is left behind.
    pub async fn create_chat(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> MemoryResult<CreatedChat> {
        validate_id("user_id", user_id)?;

        let chat_id = Uuid::new_v4().to_string();
        let index_name = self.messages.ensure_chat_index(&chat_id).await?;
        let record = self.metadata.create(user_id, &chat_id, title).await?;

        info!("Created chat {} for user {}", chat_id, user_id);
        Ok(CreatedChat {
            chat_id,
            metadata_id: record.metadata_id,
            index_name,
            title: record.title,
        })
    }

    /// Persist one exchange and advance the chat's `last_updated`.
    ///
    /// A failed message write is `Failed`. A failed touch after a successful
    /// write is `Recovered` with the message id.
    pub async fn record_exchange(
        &self,
        chat_id: &str,
        user_id: &str,
        query: &str,
        response: &str,
    ) -> Outcome<Uuid> {
        let message_id = match self.messages.store(chat_id, query, response).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to record exchange in chat {}: {}", chat_id, e);
                return Outcome::Failed(e);
            }
        };

        match self.metadata.touch(user_id, chat_id).await {
            Ok(_) => Outcome::Complete(message_id),
            Err(error) => {
                warn!(
                    "Recorded message {} but could not touch chat {}: {}",
                    message_id, chat_id, error
                );
                Outcome::Recovered {
                    value: message_id,
                    error,
                }
            }
        }
    }

    /// Exchanges relevant to `query`, newest first.
    /// `limit` defaults to the configured context limit.
    pub async fn fetch_context(
        &self,
        chat_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Outcome<Vec<MessageRecord>> {
        let limit = limit.unwrap_or(self.config.context_limit);
        debug!("Fetching up to {} context messages for chat {}", limit, chat_id);
        self.messages.fetch_similar(chat_id, query, limit).await
    }

    /// The chat's exchanges, oldest first.
    /// `limit` defaults to the configured message limit.
    pub async fn list_messages(
        &self,
        chat_id: &str,
        limit: Option<usize>,
    ) -> Outcome<Vec<MessageRecord>> {
        self.messages
            .fetch_all(chat_id, limit.unwrap_or(self.config.message_limit))
            .await
    }

    pub async fn list_chats(&self, user_id: &str) -> MemoryResult<Vec<ChatMetadataRecord>> {
        self.metadata.list_for_user(user_id).await
    }

    pub async fn search_chats(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<ChatMatch>> {
        self.metadata.search(user_id, query, limit).await
    }

    pub async fn rename_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        title: &str,
    ) -> MemoryResult<ChatMetadataRecord> {
        self.metadata.rename(user_id, chat_id, title).await
    }

    /// Delete a chat's messages, then its metadata record.
    /// Missing pieces count as deleted; anything else is an error.
    pub async fn delete_chat(&self, user_id: &str, chat_id: &str) -> MemoryResult<()> {
        validate_id("user_id", user_id)?;
        validate_id("chat_id", chat_id)?;

        self.messages.delete_chat_messages(chat_id).await?;
        self.metadata.delete(user_id, chat_id).await?;

        info!("Deleted chat {} for user {}", chat_id, user_id);
        Ok(())
    }

    /// Every index in the store
    pub async fn index_names(&self) -> MemoryResult<BTreeSet<String>> {
        self.store.list_index_names().await
    }

    pub async fn health_check(&self) -> MemoryResult<bool> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual::ManualClock;
    use crate::config::IndexLayout;
    use crate::embeddings::HashingEmbedder;
    use crate::ids::METADATA_INDEX;
    use crate::index::IndexSpec;
    use crate::testing::FlakyStore;
    use chrono::Utc;

    struct Harness {
        memory: ChatMemory,
        store: Arc<FlakyStore>,
    }

    fn harness(layout: IndexLayout) -> Harness {
        let store = Arc::new(FlakyStore::new(Arc::new(
            EmbeddedIndexStore::in_memory().unwrap(),
        )));
        let config = MemoryConfig {
            layout,
            dimension: 1024,
            context_limit: 3,
            message_limit: 500,
            ..MemoryConfig::default()
        };
        let memory = ChatMemory::with_clock(
            store.clone(),
            Arc::new(HashingEmbedder::new(1024)),
            Arc::new(ManualClock::starting_at(Utc::now(), 1_000)),
            config,
        );
        Harness { memory, store }
    }

    #[tokio::test]
    async fn test_ensure_index_twice_leaves_one_index() {
        let h = harness(IndexLayout::PerChat);
        h.store.ensure_index("chat-x", IndexSpec::cosine(1024)).await.unwrap();
        h.store.ensure_index("chat-x", IndexSpec::cosine(1024)).await.unwrap();

        let names = h.memory.index_names().await.unwrap();
        assert_eq!(names.iter().filter(|n| *n == "chat-x").count(), 1);
    }

    #[tokio::test]
    async fn test_create_chat_builds_index_and_metadata() {
        let h = harness(IndexLayout::PerChat);
        let created = h.memory.create_chat("u1", None).await.unwrap();

        assert_eq!(created.index_name, format!("chat-{}", created.chat_id));
        assert_eq!(created.title, "Chat 1");
        let names = h.memory.index_names().await.unwrap();
        assert!(names.contains(&created.index_name));
        assert!(names.contains(METADATA_INDEX));

        let chats = h.memory.list_chats("u1").await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].metadata_id, created.metadata_id);
    }

    #[tokio::test]
    async fn test_record_then_list_messages() {
        let h = harness(IndexLayout::PerChat);
        let chat = h.memory.create_chat("u1", Some("Weather")).await.unwrap();

        let before = h.memory.list_chats("u1").await.unwrap()[0].last_updated;
        let outcome = h
            .memory
            .record_exchange(&chat.chat_id, "u1", "Q", "R")
            .await;
        assert!(outcome.is_complete());

        let messages = h
            .memory
            .list_messages(&chat.chat_id, None)
            .await
            .into_result()
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].query, "Q");
        assert_eq!(messages[0].response, "R");

        let after = h.memory.list_chats("u1").await.unwrap()[0].last_updated;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_context_prefers_recent_relevant_exchanges() {
        let h = harness(IndexLayout::PerChat);
        let chat = h.memory.create_chat("u1", None).await.unwrap();
        let id = &chat.chat_id;

        let t1 = h
            .memory
            .record_exchange(id, "u1", "paris weather", "mild")
            .await
            .into_result()
            .unwrap();
        let t2 = h
            .memory
            .record_exchange(id, "u1", "paris weather forecast", "paris weather forecast is rain")
            .await
            .into_result()
            .unwrap();
        let t3 = h
            .memory
            .record_exchange(id, "u1", "paris weather forecast today", "paris weather forecast sunny")
            .await
            .into_result()
            .unwrap();

        let context = h
            .memory
            .fetch_context(id, "paris weather forecast", Some(2))
            .await
            .into_result()
            .unwrap();
        let ids: Vec<Uuid> = context.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![t3, t2]);
        assert!(!ids.contains(&t1));
        assert!(context[0].timestamp > context[1].timestamp);
    }

    #[tokio::test]
    async fn test_chats_are_scoped_to_their_user() {
        let h = harness(IndexLayout::PerChat);
        let mut a_chats = Vec::new();
        for i in 0..6 {
            let user = if i % 2 == 0 { "alice" } else { "bob" };
            let created = h.memory.create_chat(user, None).await.unwrap();
            if user == "alice" {
                a_chats.push(created.chat_id);
            }
        }

        let listed = h.memory.list_chats("alice").await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|c| c.user_id == "alice"));
        assert!(listed.iter().all(|c| a_chats.contains(&c.chat_id)));
        // Newest first
        assert_eq!(listed[0].chat_id, a_chats[2]);
    }

    #[tokio::test]
    async fn test_metadata_creation_is_deterministic() {
        let h = harness(IndexLayout::PerChat);
        let first = h.memory.metadata().create("u1", "c1", None).await.unwrap();
        let second = h.memory.metadata().create("u1", "c1", None).await.unwrap();
        assert_eq!(first.metadata_id, second.metadata_id);

        let chats = h.memory.list_chats("u1").await.unwrap();
        assert_eq!(chats.iter().filter(|c| c.chat_id == "c1").count(), 1);
    }

    #[tokio::test]
    async fn test_delete_chat_cascades() {
        for layout in [IndexLayout::PerChat, IndexLayout::Shared] {
            let h = harness(layout);
            let keep = h.memory.create_chat("u1", None).await.unwrap();
            let gone = h.memory.create_chat("u1", None).await.unwrap();
            for chat in [&keep, &gone] {
                h.memory
                    .record_exchange(&chat.chat_id, "u1", "Q", "R")
                    .await
                    .into_result()
                    .unwrap();
            }

            h.memory.delete_chat("u1", &gone.chat_id).await.unwrap();

            let messages = h.memory.list_messages(&gone.chat_id, None).await;
            assert!(messages.value().unwrap().is_empty());
            let chats = h.memory.list_chats("u1").await.unwrap();
            assert!(chats.iter().all(|c| c.chat_id != gone.chat_id));
            assert_eq!(
                h.memory
                    .list_messages(&keep.chat_id, None)
                    .await
                    .into_result()
                    .unwrap()
                    .len(),
                1
            );

            // Second delete is a no-op
            h.memory.delete_chat("u1", &gone.chat_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_reads_but_fails_writes() {
        let h = harness(IndexLayout::PerChat);
        let chat = h.memory.create_chat("u1", None).await.unwrap();
        h.memory
            .record_exchange(&chat.chat_id, "u1", "Q", "R")
            .await
            .into_result()
            .unwrap();

        h.store.set_offline(true);

        let context = h.memory.fetch_context(&chat.chat_id, "Q", None).await;
        assert!(matches!(
            context,
            Outcome::Recovered { ref value, error: MemoryError::StoreUnavailable(_) } if value.is_empty()
        ));

        let recorded = h
            .memory
            .record_exchange(&chat.chat_id, "u1", "Q2", "R2")
            .await;
        assert!(recorded.is_failed());

        assert!(h.memory.create_chat("u1", None).await.is_err());
        assert!(h.memory.delete_chat("u1", &chat.chat_id).await.is_err());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_never_degraded() {
        let h = harness(IndexLayout::PerChat);
        let chat = h.memory.create_chat("u1", None).await.unwrap();

        // Same store, different embedding width
        let narrow = ChatMemory::new(
            h.store.clone(),
            Arc::new(HashingEmbedder::new(16)),
            h.memory.config().clone(),
        );
        let context = narrow.fetch_context(&chat.chat_id, "anything", None).await;
        assert!(matches!(
            context,
            Outcome::Failed(MemoryError::DimensionMismatch { .. })
        ));
        assert!(narrow
            .record_exchange(&chat.chat_id, "u1", "Q", "R")
            .await
            .is_failed());
    }

    #[tokio::test]
    async fn test_touch_without_metadata_still_completes() {
        let h = harness(IndexLayout::PerChat);
        let outcome = h
            .memory
            .record_exchange("orphan-chat", "u1", "Q", "R")
            .await;
        assert!(outcome.is_complete());
    }
}
