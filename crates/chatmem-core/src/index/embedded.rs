// ============================================================================
// EmbeddedIndexStore - local vector indexes on redb
// ============================================================================
// One catalog table maps index name -> IndexSpec. Each index owns a table
// `records:{name}` mapping record id -> bincode(StoredPoint). Similarity is an
// exact cosine scan, which is fine for per-chat index sizes.
// ============================================================================

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    cosine_similarity, Attributes, Filter, IndexRecord, IndexSpec, ScoredRecord, StoredRecord,
    VectorIndexStore,
};
use crate::error::{MemoryError, MemoryResult};

// Table definitions
const CATALOG: TableDefinition<&str, &[u8]> = TableDefinition::new("catalog");

fn records_table_name(index: &str) -> String {
    format!("records:{}", index)
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPoint {
    vector: Vec<f32>,
    attributes: Attributes,
}

fn fail<E: Display>(context: &'static str) -> impl Fn(E) -> MemoryError {
    move |e| MemoryError::StoreUnavailable(format!("{}: {}", context, e))
}

fn decode_point(bytes: &[u8]) -> MemoryResult<StoredPoint> {
    bincode::deserialize(bytes).map_err(|e| MemoryError::Codec(e.to_string()))
}

fn parse_key(key: &str) -> MemoryResult<Uuid> {
    Uuid::parse_str(key).map_err(|e| MemoryError::Codec(format!("bad record key {}: {}", key, e)))
}

fn read_spec(
    catalog: &impl ReadableTable<&'static str, &'static [u8]>,
    index: &str,
) -> MemoryResult<IndexSpec> {
    match catalog.get(index).map_err(fail("Failed to read catalog"))? {
        Some(value) => {
            bincode::deserialize(value.value()).map_err(|e| MemoryError::Codec(e.to_string()))
        }
        None => Err(MemoryError::IndexNotFound(index.to_string())),
    }
}

fn check_dimension(index: &str, spec: &IndexSpec, vector: &[f32]) -> MemoryResult<()> {
    if vector.len() != spec.dimension {
        return Err(MemoryError::DimensionMismatch {
            index: index.to_string(),
            expected: spec.dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Local index store backed by an embedded redb database
pub struct EmbeddedIndexStore {
    db: Database,
}

impl EmbeddedIndexStore {
    /// Open (or create) the database file at `path`
    pub fn open(path: &Path) -> MemoryResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(fail("Failed to create database directory"))?;
            }
        }

        info!("Opening index database at: {}", path.display());

        let db = Database::create(path).map_err(fail("Failed to open database"))?;
        let store = Self { db };
        store.init_catalog()?;
        Ok(store)
    }

    /// Volatile store, used by tests and dry runs
    pub fn in_memory() -> MemoryResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(fail("Failed to create in-memory database"))?;
        let store = Self { db };
        store.init_catalog()?;
        Ok(store)
    }

    fn init_catalog(&self) -> MemoryResult<()> {
        let write_txn = self.db.begin_write().map_err(fail("Failed to begin write"))?;
        {
            let _ = write_txn
                .open_table(CATALOG)
                .map_err(fail("Failed to create catalog table"))?;
        }
        write_txn.commit().map_err(fail("Failed to commit init"))?;
        Ok(())
    }

    /// Read every point of an index that passes `filter`
    fn collect_points(
        &self,
        index: &str,
        filter: Option<&Filter>,
    ) -> MemoryResult<(IndexSpec, Vec<(Uuid, StoredPoint)>)> {
        let read_txn = self.db.begin_read().map_err(fail("Failed to begin read"))?;
        let catalog = read_txn
            .open_table(CATALOG)
            .map_err(fail("Failed to open catalog"))?;
        let spec = read_spec(&catalog, index)?;

        let table_name = records_table_name(index);
        let table = read_txn
            .open_table(TableDefinition::<&str, &[u8]>::new(&table_name))
            .map_err(|_| MemoryError::IndexNotFound(index.to_string()))?;

        let mut points = Vec::new();
        let iter = table.iter().map_err(fail("Failed to iterate records"))?;
        for entry in iter {
            let (key, value) = entry.map_err(fail("Failed to read entry"))?;
            let point = decode_point(value.value())?;
            if filter.map_or(true, |f| f.matches(&point.attributes)) {
                points.push((parse_key(key.value())?, point));
            }
        }
        Ok((spec, points))
    }
}

#[async_trait]
impl VectorIndexStore for EmbeddedIndexStore {
    async fn ensure_index(&self, name: &str, spec: IndexSpec) -> MemoryResult<()> {
        let write_txn = self.db.begin_write().map_err(fail("Failed to begin write"))?;
        let created;
        {
            let mut catalog = write_txn
                .open_table(CATALOG)
                .map_err(fail("Failed to open catalog"))?;
            match read_spec(&catalog, name) {
                Ok(existing) => {
                    if existing != spec {
                        warn!(
                            "Index {} exists with {:?}, requested {:?}; keeping existing",
                            name, existing, spec
                        );
                    }
                    created = false;
                }
                Err(MemoryError::IndexNotFound(_)) => {
                    let value = bincode::serialize(&spec)
                        .map_err(|e| MemoryError::Codec(e.to_string()))?;
                    catalog
                        .insert(name, value.as_slice())
                        .map_err(fail("Failed to insert index spec"))?;
                    created = true;
                }
                Err(e) => return Err(e),
            }
        }
        if created {
            let table_name = records_table_name(name);
            let _ = write_txn
                .open_table(TableDefinition::<&str, &[u8]>::new(&table_name))
                .map_err(fail("Failed to create records table"))?;
        }
        write_txn.commit().map_err(fail("Failed to commit"))?;

        if created {
            info!("Created index {} (dim {})", name, spec.dimension);
        } else {
            debug!("Index {} already exists", name);
        }
        Ok(())
    }

    async fn upsert(&self, index: &str, record: IndexRecord) -> MemoryResult<()> {
        let write_txn = self.db.begin_write().map_err(fail("Failed to begin write"))?;
        {
            let catalog = write_txn
                .open_table(CATALOG)
                .map_err(fail("Failed to open catalog"))?;
            let spec = read_spec(&catalog, index)?;
            check_dimension(index, &spec, &record.vector)?;
        }

        let key = record.id.to_string();
        let value = bincode::serialize(&StoredPoint {
            vector: record.vector,
            attributes: record.attributes,
        })
        .map_err(|e| MemoryError::Codec(e.to_string()))?;

        let table_name = records_table_name(index);
        {
            let mut table = write_txn
                .open_table(TableDefinition::<&str, &[u8]>::new(&table_name))
                .map_err(fail("Failed to open records table"))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(fail("Failed to insert record"))?;
        }
        write_txn.commit().map_err(fail("Failed to commit"))?;

        debug!("Upserted record {} into {}", key, index);
        Ok(())
    }

    async fn similarity_query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> MemoryResult<Vec<ScoredRecord>> {
        let (spec, points) = self.collect_points(index, filter)?;
        check_dimension(index, &spec, vector)?;

        let mut scored: Vec<ScoredRecord> = points
            .into_iter()
            .map(|(id, point)| ScoredRecord {
                id,
                score: cosine_similarity(vector, &point.vector),
                attributes: point.attributes,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        debug!("Similarity query on {} returned {} records", index, scored.len());
        Ok(scored)
    }

    async fn fetch_by_id(&self, index: &str, id: Uuid) -> MemoryResult<Option<StoredRecord>> {
        let read_txn = self.db.begin_read().map_err(fail("Failed to begin read"))?;
        let catalog = read_txn
            .open_table(CATALOG)
            .map_err(fail("Failed to open catalog"))?;
        read_spec(&catalog, index)?;

        let table_name = records_table_name(index);
        let table = read_txn
            .open_table(TableDefinition::<&str, &[u8]>::new(&table_name))
            .map_err(|_| MemoryError::IndexNotFound(index.to_string()))?;

        let key = id.to_string();
        match table.get(key.as_str()).map_err(fail("Failed to get record"))? {
            Some(value) => {
                let point = decode_point(value.value())?;
                Ok(Some(StoredRecord {
                    id,
                    attributes: point.attributes,
                }))
            }
            None => Ok(None),
        }
    }

    async fn scan(
        &self,
        index: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> MemoryResult<Vec<StoredRecord>> {
        let (_, points) = self.collect_points(index, filter)?;
        Ok(points
            .into_iter()
            .take(limit)
            .map(|(id, point)| StoredRecord {
                id,
                attributes: point.attributes,
            })
            .collect())
    }

    async fn set_attributes(
        &self,
        index: &str,
        id: Uuid,
        attributes: Attributes,
    ) -> MemoryResult<()> {
        let key = id.to_string();
        let table_name = records_table_name(index);

        let write_txn = self.db.begin_write().map_err(fail("Failed to begin write"))?;
        {
            let catalog = write_txn
                .open_table(CATALOG)
                .map_err(fail("Failed to open catalog"))?;
            read_spec(&catalog, index)?;
        }
        {
            let mut table = write_txn
                .open_table(TableDefinition::<&str, &[u8]>::new(&table_name))
                .map_err(fail("Failed to open records table"))?;

            let existing = table
                .get(key.as_str())
                .map_err(fail("Failed to get record"))?
                .map(|value| decode_point(value.value()));
            let mut point = match existing {
                Some(point) => point?,
                None => {
                    return Err(MemoryError::RecordNotFound {
                        index: index.to_string(),
                        id: key,
                    })
                }
            };

            point.attributes.extend(attributes);
            let value =
                bincode::serialize(&point).map_err(|e| MemoryError::Codec(e.to_string()))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(fail("Failed to update record"))?;
        }
        write_txn.commit().map_err(fail("Failed to commit"))?;

        debug!("Updated attributes of {} in {}", key, index);
        Ok(())
    }

    async fn delete_records(&self, index: &str, ids: &[Uuid]) -> MemoryResult<()> {
        let table_name = records_table_name(index);

        let write_txn = self.db.begin_write().map_err(fail("Failed to begin write"))?;
        {
            let catalog = write_txn
                .open_table(CATALOG)
                .map_err(fail("Failed to open catalog"))?;
            read_spec(&catalog, index)?;
        }
        {
            let mut table = write_txn
                .open_table(TableDefinition::<&str, &[u8]>::new(&table_name))
                .map_err(fail("Failed to open records table"))?;
            for id in ids {
                let key = id.to_string();
                table
                    .remove(key.as_str())
                    .map_err(fail("Failed to remove record"))?;
            }
        }
        write_txn.commit().map_err(fail("Failed to commit delete"))?;

        debug!("Deleted {} records from {}", ids.len(), index);
        Ok(())
    }

    async fn delete_where(&self, index: &str, filter: &Filter) -> MemoryResult<()> {
        let ids: Vec<Uuid> = self
            .collect_points(index, Some(filter))?
            .1
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.delete_records(index, &ids).await
    }

    async fn delete_index(&self, name: &str) -> MemoryResult<()> {
        let table_name = records_table_name(name);

        let write_txn = self.db.begin_write().map_err(fail("Failed to begin write"))?;
        let removed;
        {
            let mut catalog = write_txn
                .open_table(CATALOG)
                .map_err(fail("Failed to open catalog"))?;
            removed = catalog
                .remove(name)
                .map_err(fail("Failed to remove index spec"))?
                .is_some();
        }
        write_txn
            .delete_table(TableDefinition::<&str, &[u8]>::new(&table_name))
            .map_err(fail("Failed to drop records table"))?;
        write_txn.commit().map_err(fail("Failed to commit delete"))?;

        if removed {
            info!("Deleted index {}", name);
        } else {
            debug!("Index {} did not exist, nothing to delete", name);
        }
        Ok(())
    }

    async fn list_index_names(&self) -> MemoryResult<BTreeSet<String>> {
        let read_txn = self.db.begin_read().map_err(fail("Failed to begin read"))?;
        let catalog = read_txn
            .open_table(CATALOG)
            .map_err(fail("Failed to open catalog"))?;

        let mut names = BTreeSet::new();
        let iter = catalog.iter().map_err(fail("Failed to iterate catalog"))?;
        for entry in iter {
            let (key, _) = entry.map_err(fail("Failed to read entry"))?;
            names.insert(key.value().to_string());
        }
        Ok(names)
    }

    async fn health_check(&self) -> MemoryResult<bool> {
        match self.db.begin_read() {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Index database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}
