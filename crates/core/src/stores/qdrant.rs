use crate::models::{ChunkMetadata, IndexEntry, IndexStats, ScoredChunk, StoredChunk};
use crate::store::ensure_unique_ids;
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const SCROLL_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointPayload {
    chunk_id: String,
    source_file: String,
    page: u32,
    chunk_index: u64,
    content: String,
}

impl PointPayload {
    fn into_stored(self) -> StoredChunk {
        StoredChunk {
            id: self.chunk_id,
            content: self.content,
            metadata: ChunkMetadata {
                source_file: self.source_file,
                page: self.page,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: Option<PointPayload>,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    result: ScrollPage,
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    points: Vec<ScrolledPoint>,
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScrolledPoint {
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

/// Qdrant point ids must be integers or UUIDs; derive a stable UUID from the chunk id.
pub fn point_id(chunk_id: &str) -> Uuid {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn source_filter(filename: &str) -> Value {
    json!({
        "must": [
            { "key": "source_file", "match": { "value": filename } }
        ]
    })
}

pub struct QdrantStore {
    base: Url,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, StoreError> {
        let mut base = Url::parse(endpoint)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self, suffix: &str) -> Result<Url, StoreError> {
        Ok(self
            .base
            .join(&format!("collections/{}{suffix}", self.collection))?)
    }

    async fn send(
        &self,
        method: Method,
        suffix: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let mut request = self.client.request(method, self.collection_url(suffix)?);
        if let Some(body) = body {
            request = request.json(&body);
        }
        Ok(request.send().await?)
    }

    async fn send_checked(
        &self,
        method: Method,
        suffix: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let response = self.send(method, suffix, body).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("{status}: {text}"),
            });
        }
        Ok(response)
    }

    /// Creates the collection and its `source_file` payload index when missing.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.send(Method::GET, "", None).await?;
        if response.status().is_success() {
            let body: Value = response.json().await?;
            let existing = body
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .map(|size| size as usize);
            return match existing {
                Some(size) if size != self.vector_size => Err(StoreError::DimensionMismatch {
                    expected: size,
                    actual: self.vector_size,
                }),
                _ => Ok(()),
            };
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        info!(collection = %self.collection, size = self.vector_size, "creating qdrant collection");
        self.send_checked(
            Method::PUT,
            "",
            Some(json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            })),
        )
        .await?;
        self.send_checked(
            Method::PUT,
            "/index?wait=true",
            Some(json!({ "field_name": "source_file", "field_schema": "keyword" })),
        )
        .await?;
        Ok(())
    }

    async fn scroll(
        &self,
        filter: Option<Value>,
        with_payload: Value,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut payloads = Vec::new();
        let mut offset = Value::Null;

        loop {
            let page_size = match limit {
                Some(limit) => limit.saturating_sub(payloads.len()).min(SCROLL_PAGE_SIZE),
                None => SCROLL_PAGE_SIZE,
            };
            if page_size == 0 {
                break;
            }

            let mut body = json!({
                "limit": page_size,
                "with_payload": with_payload.clone(),
                "with_vector": false,
                "offset": offset,
            });
            if let (Some(filter), Some(object)) = (&filter, body.as_object_mut()) {
                object.insert("filter".to_string(), filter.clone());
            }

            let response = self
                .send_checked(Method::POST, "/points/scroll", Some(body))
                .await?;
            let ScrollResponse { result } = response.json().await?;
            payloads.extend(result.points.into_iter().filter_map(|point| point.payload));

            match result.next_page_offset {
                Some(next) if !next.is_null() => offset = next,
                _ => break,
            }
        }

        if let Some(limit) = limit {
            payloads.truncate(limit);
        }
        Ok(payloads)
    }

    fn check_dimension(&self, actual: usize) -> Result<(), StoreError> {
        if actual != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), StoreError> {
        ensure_unique_ids(&entries)?;
        if entries.is_empty() {
            return Ok(());
        }

        let points = entries
            .into_iter()
            .map(|entry| {
                self.check_dimension(entry.vector.len())?;
                let payload = PointPayload {
                    chunk_id: entry.id.clone(),
                    source_file: entry.metadata.source_file,
                    page: entry.metadata.page,
                    chunk_index: entry.ordinal,
                    content: entry.content,
                };
                Ok(json!({
                    "id": point_id(&entry.id).to_string(),
                    "vector": entry.vector,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        debug!(collection = %self.collection, points = points.len(), "upserting points");
        self.send_checked(
            Method::PUT,
            "/points?wait=true",
            Some(json!({ "points": points })),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_source(&self, filename: &str) -> Result<(), StoreError> {
        self.send_checked(
            Method::POST,
            "/points/delete?wait=true",
            Some(json!({ "filter": source_filter(filename) })),
        )
        .await?;
        Ok(())
    }

    async fn get_by_source(&self, filename: &str) -> Result<Vec<StoredChunk>, StoreError> {
        let payloads = self
            .scroll(Some(source_filter(filename)), json!(true), None)
            .await?;
        let mut points = payloads
            .into_iter()
            .map(serde_json::from_value::<PointPayload>)
            .collect::<Result<Vec<_>, _>>()?;
        points.sort_by_key(|payload| payload.chunk_index);
        Ok(points.into_iter().map(PointPayload::into_stored).collect())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(vector.len())?;

        let response = self
            .send_checked(
                Method::POST,
                "/points/search",
                Some(json!({
                    "vector": vector,
                    "limit": k,
                    "with_payload": true,
                })),
            )
            .await?;
        let SearchResponse { result } = response.json().await?;

        Ok(result
            .into_iter()
            .filter_map(|point| {
                point.payload.map(|payload| ScoredChunk {
                    chunk: payload.into_stored(),
                    score: point.score,
                })
            })
            .take(k)
            .collect())
    }

    async fn stats(&self, peek: usize) -> Result<IndexStats, StoreError> {
        let response = self
            .send_checked(Method::POST, "/points/count", Some(json!({ "exact": true })))
            .await?;
        let CountResponse { result } = response.json().await?;

        let sources = self
            .scroll(None, json!(["source_file"]), None)
            .await?
            .into_iter()
            .filter_map(|payload| {
                payload
                    .get("source_file")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect::<BTreeSet<_>>();

        let peeked = if peek == 0 {
            Vec::new()
        } else {
            self.scroll(None, json!(true), Some(peek))
                .await?
                .into_iter()
                .filter_map(|payload| serde_json::from_value::<PointPayload>(payload).ok())
                .map(PointPayload::into_stored)
                .collect()
        };

        Ok(IndexStats {
            total_entries: result.count,
            sources: sources.into_iter().collect(),
            dimension: Some(self.vector_size),
            updated_at: None,
            peek: peeked,
        })
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let response = self.send(Method::DELETE, "", None).await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }
        self.ensure_collection().await
    }
}
