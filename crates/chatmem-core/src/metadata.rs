//! ============================================================================
//! Chat Metadata Repository - one record per (user, chat) pair
//! ============================================================================
//! Records live in the shared metadata index under a deterministic id, so
//! re-creating a chat overwrites instead of duplicating. Listing is an exact
//! attribute scan on `user_id`; the vector only serves title search.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{from_micros, to_micros, Clock};
use crate::embeddings::EmbeddingProvider;
use crate::error::{MemoryError, MemoryResult};
use crate::ids::{metadata_id, validate_id, METADATA_INDEX};
use crate::index::{AttributeValue, Attributes, Filter, IndexRecord, IndexSpec, VectorIndexStore};

const ATTR_USER_ID: &str = "user_id";
const ATTR_CHAT_ID: &str = "chat_id";
const ATTR_TITLE: &str = "title";
const ATTR_CREATED_AT: &str = "created_at";
const ATTR_LAST_UPDATED: &str = "last_updated";

/// Descriptive record for one chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMetadataRecord {
    pub metadata_id: Uuid,
    pub user_id: String,
    pub chat_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ChatMetadataRecord {
    fn from_attributes(id: Uuid, attributes: &Attributes) -> Option<Self> {
        let text = |key: &str| attributes.get(key).and_then(AttributeValue::as_text);
        let created = attributes.get(ATTR_CREATED_AT)?.as_integer()?;
        // Records written before touch support carry no last_updated
        let updated = attributes
            .get(ATTR_LAST_UPDATED)
            .and_then(AttributeValue::as_integer)
            .unwrap_or(created);

        Some(Self {
            metadata_id: id,
            user_id: text(ATTR_USER_ID)?.to_string(),
            chat_id: text(ATTR_CHAT_ID)?.to_string(),
            title: text(ATTR_TITLE)?.to_string(),
            created_at: from_micros(created),
            last_updated: from_micros(updated),
        })
    }

    fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(ATTR_USER_ID.into(), self.user_id.as_str().into());
        attributes.insert(ATTR_CHAT_ID.into(), self.chat_id.as_str().into());
        attributes.insert(ATTR_TITLE.into(), self.title.as_str().into());
        attributes.insert(ATTR_CREATED_AT.into(), to_micros(self.created_at).into());
        attributes.insert(ATTR_LAST_UPDATED.into(), to_micros(self.last_updated).into());
        attributes
    }
}

/// A chat matched by title search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMatch {
    #[serde(flatten)]
    pub chat: ChatMetadataRecord,
    pub score: f32,
}

/// Text the metadata vector is computed from
fn searchable_text(user_id: &str, chat_id: &str, title: &str) -> String {
    format!("user:{} chat:{} title:{}", user_id, chat_id, title)
}

/// Maintains chat metadata records
pub struct ChatMetadataRepository {
    store: Arc<dyn VectorIndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    clock: Arc<dyn Clock>,
    listing_cap: usize,
}

impl ChatMetadataRepository {
    pub fn new(
        store: Arc<dyn VectorIndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        clock: Arc<dyn Clock>,
        listing_cap: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            clock,
            listing_cap,
        }
    }

    async fn ensure_index(&self) -> MemoryResult<()> {
        self.store
            .ensure_index(METADATA_INDEX, IndexSpec::cosine(self.embedder.dimension()))
            .await
    }

    async fn write(&self, record: &ChatMetadataRecord) -> MemoryResult<()> {
        let vector = self
            .embedder
            .encode(&searchable_text(&record.user_id, &record.chat_id, &record.title))
            .await?;
        self.store
            .upsert(
                METADATA_INDEX,
                IndexRecord {
                    id: record.metadata_id,
                    vector,
                    attributes: record.attributes(),
                },
            )
            .await
    }

    /// Create (or overwrite) the record for a chat.
    ///
    /// Without a title the chat is named `Chat {n+1}` where `n` is the user's
    /// current chat count. Overwriting keeps the original `created_at` and,
    /// when no title is given, the existing title.
    pub async fn create(
        &self,
        user_id: &str,
        chat_id: &str,
        title: Option<&str>,
    ) -> MemoryResult<ChatMetadataRecord> {
        validate_id("user_id", user_id)?;
        validate_id("chat_id", chat_id)?;
        self.ensure_index().await?;

        let now = self.clock.now();
        let existing = self.get(user_id, chat_id).await?;
        let title = match (title, &existing) {
            (Some(title), _) => title.to_string(),
            (None, Some(existing)) => existing.title.clone(),
            (None, None) => format!("Chat {}", self.list_for_user(user_id).await?.len() + 1),
        };

        let record = ChatMetadataRecord {
            metadata_id: metadata_id(user_id, chat_id),
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            title,
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            last_updated: now,
        };
        self.write(&record).await?;

        info!(
            "Created metadata for chat {} (user {}, title {:?})",
            chat_id, user_id, record.title
        );
        Ok(record)
    }

    pub async fn get(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> MemoryResult<Option<ChatMetadataRecord>> {
        let id = metadata_id(user_id, chat_id);
        match self.store.fetch_by_id(METADATA_INDEX, id).await {
            Ok(Some(stored)) => Ok(ChatMetadataRecord::from_attributes(id, &stored.attributes)),
            Ok(None) | Err(MemoryError::IndexNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Set `last_updated` to now. Returns false when the chat has no record.
    /// The title vector is left as is: the title did not change.
    pub async fn touch(&self, user_id: &str, chat_id: &str) -> MemoryResult<bool> {
        let id = metadata_id(user_id, chat_id);

        let mut patch = Attributes::new();
        patch.insert(ATTR_LAST_UPDATED.into(), to_micros(self.clock.now()).into());

        match self.store.set_attributes(METADATA_INDEX, id, patch).await {
            Ok(()) => {
                debug!("Touched chat {} (user {})", chat_id, user_id);
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                warn!("No metadata for chat {} (user {}); not touched", chat_id, user_id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Change the title and recompute the search vector
    pub async fn rename(
        &self,
        user_id: &str,
        chat_id: &str,
        title: &str,
    ) -> MemoryResult<ChatMetadataRecord> {
        validate_id("user_id", user_id)?;
        validate_id("chat_id", chat_id)?;

        let mut record = self
            .get(user_id, chat_id)
            .await?
            .ok_or_else(|| MemoryError::RecordNotFound {
                index: METADATA_INDEX.to_string(),
                id: metadata_id(user_id, chat_id).to_string(),
            })?;
        record.title = title.to_string();
        record.last_updated = self.clock.now();
        self.write(&record).await?;

        info!("Renamed chat {} to {:?}", chat_id, title);
        Ok(record)
    }

    /// All chats of a user, newest first (by `created_at`)
    pub async fn list_for_user(&self, user_id: &str) -> MemoryResult<Vec<ChatMetadataRecord>> {
        validate_id("user_id", user_id)?;

        let filter = Filter::field(ATTR_USER_ID, user_id);
        let stored = match self
            .store
            .scan(METADATA_INDEX, Some(&filter), self.listing_cap)
            .await
        {
            Ok(stored) => stored,
            Err(MemoryError::IndexNotFound(_)) => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut chats: Vec<ChatMetadataRecord> = stored
            .iter()
            .filter_map(|r| ChatMetadataRecord::from_attributes(r.id, &r.attributes))
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    /// A user's chats ranked by similarity of their title text to `query`
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> MemoryResult<Vec<ChatMatch>> {
        validate_id("user_id", user_id)?;
        if limit == 0 {
            return Ok(vec![]);
        }

        let vector = self.embedder.encode(query).await?;
        let filter = Filter::field(ATTR_USER_ID, user_id);
        let hits = match self
            .store
            .similarity_query(METADATA_INDEX, &vector, limit, Some(&filter))
            .await
        {
            Ok(hits) => hits,
            Err(MemoryError::IndexNotFound(_)) => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                ChatMetadataRecord::from_attributes(hit.id, &hit.attributes).map(|chat| ChatMatch {
                    chat,
                    score: hit.score,
                })
            })
            .collect())
    }

    /// Remove the record; absent records are fine
    pub async fn delete(&self, user_id: &str, chat_id: &str) -> MemoryResult<()> {
        match self
            .store
            .delete_records(METADATA_INDEX, &[metadata_id(user_id, chat_id)])
            .await
        {
            Ok(()) | Err(MemoryError::IndexNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual::ManualClock;
    use crate::embeddings::HashingEmbedder;
    use crate::index::EmbeddedIndexStore;

    fn repo() -> (ChatMetadataRepository, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(Utc::now(), 1_000));
        let repo = ChatMetadataRepository::new(
            Arc::new(EmbeddedIndexStore::in_memory().unwrap()),
            Arc::new(HashingEmbedder::new(256)),
            clock.clone(),
            1000,
        );
        (repo, clock)
    }

    #[tokio::test]
    async fn test_default_titles_count_existing_chats() {
        let (repo, _) = repo();
        let first = repo.create("u1", "c1", None).await.unwrap();
        let second = repo.create("u1", "c2", None).await.unwrap();
        let other_user = repo.create("u2", "c3", None).await.unwrap();

        assert_eq!(first.title, "Chat 1");
        assert_eq!(second.title, "Chat 2");
        assert_eq!(other_user.title, "Chat 1");
    }

    #[tokio::test]
    async fn test_recreate_overwrites_without_duplicating() {
        let (repo, _) = repo();
        let original = repo.create("u1", "c1", Some("Trip")).await.unwrap();
        let again = repo.create("u1", "c1", None).await.unwrap();

        assert_eq!(again.metadata_id, original.metadata_id);
        assert_eq!(again.title, "Trip");
        assert_eq!(again.created_at, original.created_at);
        assert_eq!(repo.list_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_newest_first() {
        let (repo, _) = repo();
        repo.create("u1", "c1", Some("a")).await.unwrap();
        repo.create("u2", "cx", Some("x")).await.unwrap();
        repo.create("u1", "c2", Some("b")).await.unwrap();

        let chats = repo.list_for_user("u1").await.unwrap();
        let ids: Vec<&str> = chats.iter().map(|c| c.chat_id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
        assert!(chats.iter().all(|c| c.user_id == "u1"));

        assert!(repo.list_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_last_updated_reads_as_created_at() {
        let store = Arc::new(EmbeddedIndexStore::in_memory().unwrap());
        let repo = ChatMetadataRepository::new(
            store.clone(),
            Arc::new(HashingEmbedder::new(256)),
            Arc::new(ManualClock::starting_at(Utc::now(), 1_000)),
            1000,
        );

        let created_micros = 1_700_000_000_123_456;
        let mut attributes = Attributes::new();
        attributes.insert(ATTR_USER_ID.into(), "u1".into());
        attributes.insert(ATTR_CHAT_ID.into(), "c1".into());
        attributes.insert(ATTR_TITLE.into(), "Legacy".into());
        attributes.insert(ATTR_CREATED_AT.into(), AttributeValue::Integer(created_micros));

        store
            .ensure_index(METADATA_INDEX, IndexSpec::cosine(256))
            .await
            .unwrap();
        store
            .upsert(
                METADATA_INDEX,
                IndexRecord {
                    id: metadata_id("u1", "c1"),
                    vector: HashingEmbedder::new(256).embed("user:u1 chat:c1 title:Legacy"),
                    attributes,
                },
            )
            .await
            .unwrap();

        let chats = repo.list_for_user("u1").await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].created_at, from_micros(created_micros));
        assert_eq!(chats[0].last_updated, chats[0].created_at);
    }

    #[tokio::test]
    async fn test_touch_updates_last_updated_only() {
        let (repo, clock) = repo();
        let created = repo.create("u1", "c1", Some("Trip")).await.unwrap();
        clock.advance(5_000_000);

        assert!(repo.touch("u1", "c1").await.unwrap());
        let touched = repo.get("u1", "c1").await.unwrap().unwrap();
        assert!(touched.last_updated > created.last_updated);
        assert_eq!(touched.created_at, created.created_at);
        assert_eq!(touched.title, "Trip");

        assert!(!repo.touch("u1", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_before_any_chat_is_a_noop() {
        let (repo, _) = repo();
        assert!(!repo.touch("u1", "c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_and_search() {
        let (repo, _) = repo();
        repo.create("u1", "c1", Some("groceries")).await.unwrap();
        repo.create("u1", "c2", Some("holiday planning")).await.unwrap();

        let renamed = repo.rename("u1", "c1", "tax return").await.unwrap();
        assert_eq!(renamed.title, "tax return");

        let hits = repo.search("u1", "title:tax return", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chat.chat_id, "c1");

        let err = repo.rename("u1", "nope", "x").await.unwrap_err();
        assert!(matches!(err, MemoryError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (repo, _) = repo();
        repo.delete("u1", "c1").await.unwrap();
        repo.create("u1", "c1", None).await.unwrap();
        repo.delete("u1", "c1").await.unwrap();
        repo.delete("u1", "c1").await.unwrap();
        assert!(repo.get("u1", "c1").await.unwrap().is_none());
    }
}
