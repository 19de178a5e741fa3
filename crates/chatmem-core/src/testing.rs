//! Test doubles.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{MemoryError, MemoryResult};
use crate::index::{
    Attributes, Filter, IndexRecord, IndexSpec, ScoredRecord, StoredRecord, VectorIndexStore,
};

/// Wraps a store and fails every call with `StoreUnavailable` while offline
pub struct FlakyStore {
    inner: Arc<dyn VectorIndexStore>,
    offline: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn VectorIndexStore>) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> MemoryResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MemoryError::StoreUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndexStore for FlakyStore {
    async fn ensure_index(&self, name: &str, spec: IndexSpec) -> MemoryResult<()> {
        self.check()?;
        self.inner.ensure_index(name, spec).await
    }

    async fn upsert(&self, index: &str, record: IndexRecord) -> MemoryResult<()> {
        self.check()?;
        self.inner.upsert(index, record).await
    }

    async fn similarity_query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> MemoryResult<Vec<ScoredRecord>> {
        self.check()?;
        self.inner.similarity_query(index, vector, top_k, filter).await
    }

    async fn fetch_by_id(&self, index: &str, id: Uuid) -> MemoryResult<Option<StoredRecord>> {
        self.check()?;
        self.inner.fetch_by_id(index, id).await
    }

    async fn scan(
        &self,
        index: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> MemoryResult<Vec<StoredRecord>> {
        self.check()?;
        self.inner.scan(index, filter, limit).await
    }

    async fn set_attributes(
        &self,
        index: &str,
        id: Uuid,
        attributes: Attributes,
    ) -> MemoryResult<()> {
        self.check()?;
        self.inner.set_attributes(index, id, attributes).await
    }

    async fn delete_records(&self, index: &str, ids: &[Uuid]) -> MemoryResult<()> {
        self.check()?;
        self.inner.delete_records(index, ids).await
    }

    async fn delete_where(&self, index: &str, filter: &Filter) -> MemoryResult<()> {
        self.check()?;
        self.inner.delete_where(index, filter).await
    }

    async fn delete_index(&self, name: &str) -> MemoryResult<()> {
        self.check()?;
        self.inner.delete_index(name).await
    }

    async fn list_index_names(&self) -> MemoryResult<BTreeSet<String>> {
        self.check()?;
        self.inner.list_index_names().await
    }

    async fn health_check(&self) -> MemoryResult<bool> {
        self.check()?;
        self.inner.health_check().await
    }
}
