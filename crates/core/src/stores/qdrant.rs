use crate::models::DocumentChunk;
use crate::traits::{ChunkHit, ChunkIndex};
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

/// Chunk index backed by a Qdrant collection using cosine distance.
///
/// Qdrant reports cosine *similarity*; hits are converted to distance as
/// `1 - score` so they order the same way as the SQLite backend.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status() == StatusCode::OK {
            let parsed: Value = response.json().await?;
            let size = parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .unwrap_or_default() as usize;
            if size != self.vector_size {
                return Err(StoreError::DimensionMismatch {
                    expected: self.vector_size,
                    actual: size,
                });
            }
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(format!("{}/index", self.collection_url()))
            .json(&json!({
                "field_name": "team_id",
                "field_schema": "keyword",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "qdrant team_id payload index was not created");
        }

        debug!(collection = %self.collection, "qdrant collection created");
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

#[async_trait]
impl ChunkIndex for QdrantStore {
    async fn insert_chunk(&self, team_id: Uuid, chunk: &DocumentChunk) -> Result<(), StoreError> {
        if chunk.embedding.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: chunk.embedding.len(),
            });
        }

        let point = json!({
            "id": chunk.id.to_string(),
            "vector": chunk.embedding,
            "payload": {
                "team_id": team_id.to_string(),
                "document_id": chunk.document_id.to_string(),
                "chunk_index": chunk.chunk_index,
                "text": chunk.text,
                "created_at": chunk.created_at.to_rfc3339(),
            },
        });

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": [point] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn nearest_chunks(
        &self,
        team_id: Uuid,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": limit,
                "with_payload": true,
                "filter": {
                    "must": [
                        { "key": "team_id", "match": { "value": team_id.to_string() } }
                    ]
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            match hit_from_value(&hit) {
                Some(chunk_hit) => result.push(chunk_hit),
                None => warn!(payload = %hit, "skipping malformed qdrant hit"),
            }
        }

        result.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        result.truncate(limit);
        Ok(result)
    }

    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({
                "filter": {
                    "must": [
                        { "key": "document_id", "match": { "value": document_id.to_string() } }
                    ]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }
}

fn hit_from_value(hit: &Value) -> Option<ChunkHit> {
    let chunk_id = hit
        .pointer("/id")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())?;
    let document_id = hit
        .pointer("/payload/document_id")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())?;
    let chunk_index = hit.pointer("/payload/chunk_index").and_then(Value::as_i64)?;
    let text = hit
        .pointer("/payload/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

    Some(ChunkHit {
        chunk_id,
        document_id,
        chunk_index,
        text,
        distance: 1.0 - score,
    })
}
