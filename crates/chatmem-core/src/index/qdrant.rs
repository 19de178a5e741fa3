//! ============================================================================
//! Qdrant Index Store - Qdrant vector database operations
//! ============================================================================
//! Each index is a Qdrant collection, each record a point, attributes are the
//! point payload. Scans page through `scroll`, attribute updates use
//! `set_payload` so the stored vector is never rewritten.
//! ============================================================================

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, points_selector::PointsSelectorOneOf, value::Kind, Condition,
    CreateCollectionBuilder, DeleteCollectionBuilder, DeletePointsBuilder, Distance, Filter as QdrantFilter,
    GetPointsBuilder, PointId, PointStruct, ScrollPointsBuilder,
    SearchPointsBuilder, SetPayloadPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AttributeValue, Attributes, Filter, IndexRecord, IndexSpec, Metric, ScoredRecord,
    StoredRecord, VectorIndexStore,
};
use crate::error::{MemoryError, MemoryResult};

/// Page size used when scrolling through a collection
const SCROLL_PAGE: u32 = 256;

/// Index store backed by a Qdrant service
pub struct QdrantIndexStore {
    client: Qdrant,
}

impl QdrantIndexStore {
    /// Create a client for the Qdrant service at `url`. No request is made
    /// until the first operation.
    pub fn connect(url: &str, api_key: Option<String>) -> MemoryResult<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(|e| {
                MemoryError::StoreUnavailable(format!("Failed to create Qdrant client: {}", e))
            })?;

        Ok(Self { client })
    }

    async fn collection_spec(&self, index: &str) -> MemoryResult<Option<usize>> {
        let info = self
            .client
            .collection_info(index)
            .await
            .map_err(|e| classify_error(index, "Failed to get collection info", e))?;

        Ok(info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|config| match config {
                qdrant_client::qdrant::vectors_config::Config::Params(params) => {
                    Some(params.size as usize)
                }
                _ => None,
            }))
    }

    /// Qdrant reports dimension errors as free text; look the size up so the
    /// caller gets a precise `DimensionMismatch`.
    async fn dimension_error(&self, index: &str, actual: usize, raw: MemoryError) -> MemoryError {
        if !matches!(raw, MemoryError::DimensionMismatch { .. }) {
            return raw;
        }
        match self.collection_spec(index).await {
            Ok(Some(expected)) => MemoryError::DimensionMismatch {
                index: index.to_string(),
                expected,
                actual,
            },
            _ => raw,
        }
    }
}

#[async_trait]
impl VectorIndexStore for QdrantIndexStore {
    async fn ensure_index(&self, name: &str, spec: IndexSpec) -> MemoryResult<()> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| classify_error(name, "Failed to check collection existence", e))?;

        if exists {
            debug!("Collection {} already exists", name);
            return Ok(());
        }

        info!("Creating collection: {}", name);

        let distance = match spec.metric {
            Metric::Cosine => Distance::Cosine,
        };
        let created = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(spec.dimension as u64, distance)),
            )
            .await;

        match created {
            Ok(_) => {
                info!("Collection {} created successfully", name);
                Ok(())
            }
            // Lost a creation race with another writer
            Err(e) if e.to_string().to_lowercase().contains("already exists") => {
                debug!("Collection {} created concurrently", name);
                Ok(())
            }
            Err(e) => Err(classify_error(name, "Failed to create collection", e)),
        }
    }

    async fn upsert(&self, index: &str, record: IndexRecord) -> MemoryResult<()> {
        let actual = record.vector.len();
        let point = PointStruct::new(
            record.id.to_string(),
            record.vector,
            to_payload(record.attributes),
        );

        let result = self
            .client
            .upsert_points(UpsertPointsBuilder::new(index, vec![point]).wait(true))
            .await;

        if let Err(e) = result {
            let raw = classify_error(index, "Failed to upsert point", e);
            return Err(self.dimension_error(index, actual, raw).await);
        }

        debug!("Point {} stored in {}", record.id, index);
        Ok(())
    }

    async fn similarity_query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> MemoryResult<Vec<ScoredRecord>> {
        let mut request =
            SearchPointsBuilder::new(index, vector.to_vec(), top_k as u64).with_payload(true);
        if let Some(filter) = filter {
            request = request.filter(to_qdrant_filter(filter));
        }

        let search_result = match self.client.search_points(request).await {
            Ok(result) => result,
            Err(e) => {
                let raw = classify_error(index, "Failed to search points", e);
                return Err(self.dimension_error(index, vector.len(), raw).await);
            }
        };

        let hits: Vec<ScoredRecord> = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let id = extract_uuid_from_point_id(point.id?)?;
                Some(ScoredRecord {
                    id,
                    attributes: from_payload(point.payload),
                    score: point.score,
                })
            })
            .collect();

        debug!("Found {} matching points in {}", hits.len(), index);
        Ok(hits)
    }

    async fn fetch_by_id(&self, index: &str, id: Uuid) -> MemoryResult<Option<StoredRecord>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(index, vec![PointId::from(id.to_string())])
                    .with_payload(true),
            )
            .await
            .map_err(|e| classify_error(index, "Failed to get point", e))?;

        Ok(response.result.into_iter().find_map(|point| {
            let point_id = extract_uuid_from_point_id(point.id?)?;
            Some(StoredRecord {
                id: point_id,
                attributes: from_payload(point.payload),
            })
        }))
    }

    async fn scan(
        &self,
        index: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> MemoryResult<Vec<StoredRecord>> {
        let mut records = Vec::new();
        let mut offset: Option<PointId> = None;

        while records.len() < limit {
            let page = SCROLL_PAGE.min((limit - records.len()) as u32);
            let mut request = ScrollPointsBuilder::new(index)
                .limit(page)
                .with_payload(true);
            if let Some(filter) = filter {
                request = request.filter(to_qdrant_filter(filter));
            }
            if let Some(next) = offset.take() {
                request = request.offset(next);
            }

            let scroll_result = self
                .client
                .scroll(request)
                .await
                .map_err(|e| classify_error(index, "Failed to scroll points", e))?;

            records.extend(scroll_result.result.into_iter().filter_map(|point| {
                let id = extract_uuid_from_point_id(point.id?)?;
                Some(StoredRecord {
                    id,
                    attributes: from_payload(point.payload),
                })
            }));

            match scroll_result.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        records.truncate(limit);
        debug!("Scanned {} points from {}", records.len(), index);
        Ok(records)
    }

    async fn set_attributes(
        &self,
        index: &str,
        id: Uuid,
        attributes: Attributes,
    ) -> MemoryResult<()> {
        if self.fetch_by_id(index, id).await?.is_none() {
            return Err(MemoryError::RecordNotFound {
                index: index.to_string(),
                id: id.to_string(),
            });
        }

        self.client
            .set_payload(
                SetPayloadPointsBuilder::new(index, to_payload(attributes))
                    .points_selector(vec![id.to_string()])
                    .wait(true),
            )
            .await
            .map_err(|e| classify_error(index, "Failed to set payload", e))?;

        debug!("Payload of {} updated in {}", id, index);
        Ok(())
    }

    async fn delete_records(&self, index: &str, ids: &[Uuid]) -> MemoryResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(index)
                    .points(ids.iter().map(Uuid::to_string).collect::<Vec<_>>())
                    .wait(true),
            )
            .await
            .map_err(|e| classify_error(index, "Failed to delete points", e))?;

        debug!("Deleted {} points from {}", ids.len(), index);
        Ok(())
    }

    async fn delete_where(&self, index: &str, filter: &Filter) -> MemoryResult<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(index)
                    .points(PointsSelectorOneOf::Filter(to_qdrant_filter(filter)))
                    .wait(true),
            )
            .await
            .map_err(|e| classify_error(index, "Failed to delete points by filter", e))?;

        // Qdrant doesn't return a count for filter deletes
        debug!("Deleted points matching {:?} from {}", filter.must, index);
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> MemoryResult<()> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| classify_error(name, "Failed to check collection existence", e))?;
        if !exists {
            debug!("Collection {} does not exist, nothing to delete", name);
            return Ok(());
        }

        match self.client.delete_collection(DeleteCollectionBuilder::new(name)).await {
            Ok(_) => {
                info!("Deleted collection {}", name);
                Ok(())
            }
            Err(e) => match classify_error(name, "Failed to delete collection", e) {
                MemoryError::IndexNotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn list_index_names(&self) -> MemoryResult<BTreeSet<String>> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| classify_error("*", "Failed to list collections", e))?;

        Ok(response.collections.into_iter().map(|c| c.name).collect())
    }

    async fn health_check(&self) -> MemoryResult<bool> {
        match self.client.health_check().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Map a Qdrant client error onto a memory error kind by its message.
fn classify_error(index: &str, context: &str, error: impl std::fmt::Display) -> MemoryError {
    let message = format!("{}: {}", context, error);
    let lower = message.to_lowercase();

    if lower.contains("dimension") || lower.contains("expected dim") {
        return MemoryError::DimensionMismatch {
            index: index.to_string(),
            expected: 0,
            actual: 0,
        };
    }

    if lower.contains("not found") || lower.contains("doesn't exist") || lower.contains("does not exist")
    {
        return MemoryError::IndexNotFound(index.to_string());
    }

    MemoryError::StoreUnavailable(message)
}

fn to_qdrant_filter(filter: &Filter) -> QdrantFilter {
    QdrantFilter::must(filter.must.iter().map(|(key, value)| match value {
        AttributeValue::Text(s) => Condition::matches(key.clone(), s.clone()),
        AttributeValue::Integer(i) => Condition::matches(key.clone(), *i),
        // Payload floats only support range matching; an exact float match
        // is expressed as the degenerate range [v, v].
        AttributeValue::Float(f) => Condition::range(
            key.clone(),
            qdrant_client::qdrant::Range {
                gte: Some(*f),
                lte: Some(*f),
                ..Default::default()
            },
        ),
    }))
}

fn to_payload(attributes: Attributes) -> Payload {
    let map: HashMap<String, Value> = attributes
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                AttributeValue::Text(s) => Value::from(s),
                AttributeValue::Integer(i) => Value::from(i),
                AttributeValue::Float(f) => Value::from(f),
            };
            (key, value)
        })
        .collect();
    Payload::from(map)
}

fn from_payload(payload: HashMap<String, Value>) -> Attributes {
    payload
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value.kind? {
                Kind::StringValue(s) => AttributeValue::Text(s),
                Kind::IntegerValue(i) => AttributeValue::Integer(i),
                Kind::DoubleValue(f) => AttributeValue::Float(f),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

// Helper to extract UUID from PointId
fn extract_uuid_from_point_id(point_id: PointId) -> Option<Uuid> {
    match point_id.point_id_options? {
        PointIdOptions::Uuid(uuid_str) => Uuid::parse_str(&uuid_str).ok(),
        PointIdOptions::Num(_) => None, // Record ids are always UUIDs
    }
}
