//! ============================================================================
//! Chat Message Repository - store and retrieve question/answer exchanges
//! ============================================================================
//! Every exchange is embedded from its canonical text
//! `Query: {query} Response: {response}` and written once; records are never
//! updated. Context retrieval is two-stage: similarity picks the candidate
//! set, recency orders it.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{from_micros, to_micros, Clock};
use crate::config::IndexLayout;
use crate::embeddings::EmbeddingProvider;
use crate::error::{MemoryError, MemoryResult, Outcome};
use crate::ids::{chat_index_name, validate_id, SHARED_MESSAGE_INDEX};
use crate::index::{AttributeValue, Attributes, Filter, IndexRecord, IndexSpec, VectorIndexStore};

/// Upper bound on records read by a full chat listing
const MAX_SCAN: usize = 100_000;

const ATTR_CHAT_ID: &str = "chat_id";
const ATTR_QUERY: &str = "query";
const ATTR_RESPONSE: &str = "response";
const ATTR_TIMESTAMP: &str = "timestamp";

/// One stored exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub chat_id: String,
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    /// Similarity to the retrieval query; only set by similarity retrieval
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score: Option<f32>,
}

impl MessageRecord {
    fn from_attributes(id: Uuid, attributes: &Attributes, score: Option<f32>) -> Option<Self> {
        let text = |key: &str| attributes.get(key).and_then(AttributeValue::as_text);
        Some(Self {
            id,
            chat_id: text(ATTR_CHAT_ID)?.to_string(),
            query: text(ATTR_QUERY)?.to_string(),
            response: text(ATTR_RESPONSE)?.to_string(),
            timestamp: from_micros(attributes.get(ATTR_TIMESTAMP)?.as_integer()?),
            score,
        })
    }
}

/// Canonical text an exchange is embedded from
pub fn exchange_text(query: &str, response: &str) -> String {
    format!("Query: {} Response: {}", query, response)
}

/// Persists and retrieves the exchanges of chats
pub struct ChatMessageRepository {
    store: Arc<dyn VectorIndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    clock: Arc<dyn Clock>,
    layout: IndexLayout,
}

impl ChatMessageRepository {
    pub fn new(
        store: Arc<dyn VectorIndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        clock: Arc<dyn Clock>,
        layout: IndexLayout,
    ) -> Self {
        Self {
            store,
            embedder,
            clock,
            layout,
        }
    }

    /// Index holding a chat's messages
    pub fn index_name(&self, chat_id: &str) -> String {
        match self.layout {
            IndexLayout::PerChat => chat_index_name(chat_id),
            IndexLayout::Shared => SHARED_MESSAGE_INDEX.to_string(),
        }
    }

    /// Per-chat indexes hold a single chat; the shared index needs a filter
    fn chat_filter(&self, chat_id: &str) -> Option<Filter> {
        match self.layout {
            IndexLayout::PerChat => None,
            IndexLayout::Shared => Some(Filter::field(ATTR_CHAT_ID, chat_id)),
        }
    }

    /// Create the chat's message index if absent; returns its name
    pub async fn ensure_chat_index(&self, chat_id: &str) -> MemoryResult<String> {
        validate_id("chat_id", chat_id)?;
        let index = self.index_name(chat_id);
        self.store
            .ensure_index(&index, IndexSpec::cosine(self.embedder.dimension()))
            .await?;
        Ok(index)
    }

    /// Embed and persist one exchange; returns the new message id
    pub async fn store(&self, chat_id: &str, query: &str, response: &str) -> MemoryResult<Uuid> {
        let index = self.ensure_chat_index(chat_id).await?;

        let vector = self.embedder.encode(&exchange_text(query, response)).await?;
        let message_id = Uuid::new_v4();
        let timestamp = self.clock.now();

        let mut attributes = Attributes::new();
        attributes.insert(ATTR_CHAT_ID.into(), chat_id.into());
        attributes.insert(ATTR_QUERY.into(), query.into());
        attributes.insert(ATTR_RESPONSE.into(), response.into());
        attributes.insert(ATTR_TIMESTAMP.into(), to_micros(timestamp).into());

        self.store
            .upsert(
                &index,
                IndexRecord {
                    id: message_id,
                    vector,
                    attributes,
                },
            )
            .await?;

        debug!("Stored message {} in chat {}", message_id, chat_id);
        Ok(message_id)
    }

    /// The `limit` exchanges most similar to `query`, newest first.
    ///
    /// Store failures degrade to an empty list; only a dimension mismatch
    /// fails the call.
    pub async fn fetch_similar(
        &self,
        chat_id: &str,
        query: &str,
        limit: usize,
    ) -> Outcome<Vec<MessageRecord>> {
        let result = self.try_fetch_similar(chat_id, query, limit).await;
        if let Err(e) = &result {
            warn!("Context lookup for chat {} degraded: {}", chat_id, e);
        }
        Outcome::degrade(result, Vec::new)
    }

    async fn try_fetch_similar(
        &self,
        chat_id: &str,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<MessageRecord>> {
        validate_id("chat_id", chat_id)?;
        if limit == 0 {
            return Ok(vec![]);
        }

        let index = self.index_name(chat_id);
        let vector = self.embedder.encode(query).await?;
        let filter = self.chat_filter(chat_id);
        let hits = self
            .store
            .similarity_query(&index, &vector, limit, filter.as_ref())
            .await?;

        let mut messages: Vec<MessageRecord> = hits
            .into_iter()
            .filter_map(|hit| {
                let record = MessageRecord::from_attributes(hit.id, &hit.attributes, Some(hit.score));
                if record.is_none() {
                    warn!("Skipping malformed message record {} in {}", hit.id, index);
                }
                record
            })
            .collect();

        // Stable: equal timestamps keep similarity order
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        messages.truncate(limit);

        debug!(
            "Found {} context messages for chat {}",
            messages.len(),
            chat_id
        );
        Ok(messages)
    }

    /// Every exchange of the chat in reading order (oldest first). When the
    /// chat holds more than `limit` exchanges the most recent `limit` are kept.
    pub async fn fetch_all(&self, chat_id: &str, limit: usize) -> Outcome<Vec<MessageRecord>> {
        let result = self.try_fetch_all(chat_id, limit).await;
        if let Err(e) = &result {
            warn!("Message listing for chat {} degraded: {}", chat_id, e);
        }
        Outcome::degrade(result, Vec::new)
    }

    async fn try_fetch_all(&self, chat_id: &str, limit: usize) -> MemoryResult<Vec<MessageRecord>> {
        validate_id("chat_id", chat_id)?;

        let index = self.index_name(chat_id);
        let filter = self.chat_filter(chat_id);
        let records = self.store.scan(&index, filter.as_ref(), MAX_SCAN).await?;

        let mut messages: Vec<MessageRecord> = records
            .into_iter()
            .filter_map(|r| MessageRecord::from_attributes(r.id, &r.attributes, None))
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    /// Remove every exchange of the chat. Missing indexes count as deleted.
    pub async fn delete_chat_messages(&self, chat_id: &str) -> MemoryResult<()> {
        validate_id("chat_id", chat_id)?;
        let index = self.index_name(chat_id);

        let result = match self.layout {
            IndexLayout::PerChat => self.store.delete_index(&index).await,
            IndexLayout::Shared => {
                self.store
                    .delete_where(&index, &Filter::field(ATTR_CHAT_ID, chat_id))
                    .await
            }
        };

        match result {
            Ok(()) => {
                info!("Deleted messages of chat {} ({})", chat_id, index);
                Ok(())
            }
            Err(MemoryError::IndexNotFound(_)) => {
                debug!("No message index for chat {}", chat_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
