use crate::models::DocumentChunk;
use crate::StoreError;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i64,
    pub text: String,
    pub distance: f64,
}

#[async_trait]
pub trait ChunkIndex: Send + Sync {
    async fn insert_chunk(&self, team_id: Uuid, chunk: &DocumentChunk) -> Result<(), StoreError>;

    /// Up to `limit` chunks of documents owned by `team_id`, ordered by
    /// ascending cosine distance to `query_vector`.
    async fn nearest_chunks(
        &self,
        team_id: Uuid,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>, StoreError>;

    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<(), StoreError>;
}
