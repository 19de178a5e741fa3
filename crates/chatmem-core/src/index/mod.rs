//! ============================================================================
//! Vector Index Store - named, dimension-typed vector indexes
//! ============================================================================
//! A store is a collection of named indexes. Each index holds records
//! (id + vector + typed attributes) and answers similarity queries, exact
//! scans and id lookups. Two backends:
//!
//! - [`QdrantIndexStore`]: remote Qdrant service, one collection per index
//! - [`EmbeddedIndexStore`]: local redb database, exact cosine search
//! ============================================================================

mod embedded;
mod qdrant;

pub use embedded::EmbeddedIndexStore;
pub use qdrant::QdrantIndexStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::MemoryResult;

/// Similarity metric an index is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cosine,
}

/// Configuration an index is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub dimension: usize,
    pub metric: Metric,
}

impl IndexSpec {
    pub fn cosine(dimension: usize) -> Self {
        Self {
            dimension,
            metric: Metric::Cosine,
        }
    }
}

/// A typed attribute value stored alongside a vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// Conjunction of exact `key == value` attribute matches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub must: Vec<(String, AttributeValue)>,
}

impl Filter {
    pub fn field(key: &str, value: impl Into<AttributeValue>) -> Self {
        Self::default().and(key, value)
    }

    pub fn and(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.must.push((key.to_string(), value.into()));
        self
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.must
            .iter()
            .all(|(key, expected)| attributes.get(key) == Some(expected))
    }
}

/// A record to insert or overwrite
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub attributes: Attributes,
}

/// A record read back from an index (vector omitted)
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: Uuid,
    pub attributes: Attributes,
}

/// A similarity query hit; `score` is higher-is-more-similar
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: Uuid,
    pub attributes: Attributes,
    pub score: f32,
}

/// Trait for vector index backends
#[async_trait]
pub trait VectorIndexStore: Send + Sync {
    /// Create the index if absent. Existing indexes are left untouched.
    async fn ensure_index(&self, name: &str, spec: IndexSpec) -> MemoryResult<()>;

    /// Insert or overwrite a record
    async fn upsert(&self, index: &str, record: IndexRecord) -> MemoryResult<()>;

    /// Up to `top_k` nearest records, best first. Tie order is unspecified.
    async fn similarity_query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> MemoryResult<Vec<ScoredRecord>>;

    async fn fetch_by_id(&self, index: &str, id: Uuid) -> MemoryResult<Option<StoredRecord>>;

    /// Exact enumeration of matching records, up to `limit`. Order unspecified.
    async fn scan(
        &self,
        index: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> MemoryResult<Vec<StoredRecord>>;

    /// Merge attributes into an existing record, keeping its vector
    async fn set_attributes(&self, index: &str, id: Uuid, attributes: Attributes)
        -> MemoryResult<()>;

    async fn delete_records(&self, index: &str, ids: &[Uuid]) -> MemoryResult<()>;

    async fn delete_where(&self, index: &str, filter: &Filter) -> MemoryResult<()>;

    /// Drop an index. Missing indexes are not an error.
    async fn delete_index(&self, name: &str) -> MemoryResult<()>;

    async fn list_index_names(&self) -> MemoryResult<BTreeSet<String>>;

    async fn health_check(&self) -> MemoryResult<bool>;
}

/// Cosine similarity; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
