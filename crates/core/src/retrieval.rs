use crate::media::MediaStore;
use crate::models::{RetrievedChunk, EMBEDDING_DIMENSIONS, RETRIEVAL_TOP_K};
use crate::stores::SqliteStore;
use crate::traits::ChunkIndex;
use crate::StoreError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cosine distance `1 - cos(a, b)`. A zero-length vector is treated as
/// orthogonal to everything (distance 1).
pub fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;

    for (a, b) in left.iter().zip(right.iter()) {
        let (a, b) = (*a as f64, *b as f64);
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 1.0;
    }

    1.0 - dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn ChunkIndex>,
    store: SqliteStore,
    media: MediaStore,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: Arc<dyn ChunkIndex>, store: SqliteStore, media: MediaStore) -> Self {
        Self {
            index,
            store,
            media,
            top_k: RETRIEVAL_TOP_K,
        }
    }

    pub async fn retrieve(
        &self,
        team_id: Uuid,
        query_vector: &[f32],
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        if query_vector.len() != EMBEDDING_DIMENSIONS {
            return Err(StoreError::DimensionMismatch {
                expected: EMBEDDING_DIMENSIONS,
                actual: query_vector.len(),
            });
        }

        let hits = self
            .index
            .nearest_chunks(team_id, query_vector, self.top_k)
            .await?;

        let mut document_ids = hits.iter().map(|hit| hit.document_id).collect::<Vec<_>>();
        document_ids.sort_unstable();
        document_ids.dedup();

        let documents = self
            .store
            .documents_in_team(team_id, &document_ids)
            .await?
            .into_iter()
            .map(|document| (document.id, document))
            .collect::<HashMap<_, _>>();

        let mut retrieved = Vec::with_capacity(hits.len());
        for hit in hits.into_iter().take(self.top_k) {
            let Some(document) = documents.get(&hit.document_id) else {
                warn!(
                    document_id = %hit.document_id,
                    chunk_id = %hit.chunk_id,
                    "dropping hit whose document is outside the team"
                );
                continue;
            };

            retrieved.push(RetrievedChunk {
                chunk_id: hit.chunk_id,
                chunk_index: hit.chunk_index,
                text: hit.text,
                distance: hit.distance,
                document_link: self.media.html_link(document),
                document: document.clone(),
            });
        }

        debug!(team_id = %team_id, hits = retrieved.len(), "retrieved context chunks");
        Ok(retrieved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, DocumentChunk, Team, User};
    use crate::traits::ChunkHit;
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::tempdir;
    use url::Url;

    #[test]
    fn cosine_distance_boundaries() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 3.0]) - 1.0).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-12);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    struct FixedIndex {
        hits: Vec<ChunkHit>,
    }

    #[async_trait]
    impl ChunkIndex for FixedIndex {
        async fn insert_chunk(
            &self,
            _team_id: Uuid,
            _chunk: &DocumentChunk,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn nearest_chunks(
            &self,
            _team_id: Uuid,
            _query_vector: &[f32],
            limit: usize,
        ) -> Result<Vec<ChunkHit>, StoreError> {
            Ok(self.hits.iter().take(limit).cloned().collect())
        }

        async fn delete_document_chunks(&self, _document_id: Uuid) -> Result<(), StoreError> {
            Ok(())
        }
    }

    async fn team_with_document(store: &SqliteStore) -> (User, Team, Document) {
        let user = store.insert_user("bo@example.com", None, "hash").await.unwrap();
        let (team, _) = store
            .insert_team_with_admin("Ops", None, user.id)
            .await
            .unwrap();
        let document = Document {
            id: Uuid::new_v4(),
            team_id: team.id,
            name: "Runbook.pdf".to_string(),
            file_path: "documents/runbook.pdf".to_string(),
            size: Some(10),
            content_type: Some("application/pdf".to_string()),
            metadata: None,
            created_at: Utc::now(),
        };
        store.insert_document(&document).await.unwrap();
        (user, team, document)
    }

    fn media() -> (tempfile::TempDir, MediaStore) {
        let dir = tempdir().unwrap();
        let media = MediaStore::new(dir.path(), Url::parse("http://files.local/media/").unwrap());
        (dir, media)
    }

    #[tokio::test]
    async fn hits_outside_the_team_are_dropped() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (_user, team, document) = team_with_document(&store).await;
        let (_dir, media) = media();

        let foreign = ChunkHit {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            chunk_index: 1,
            text: "foreign".to_string(),
            distance: 0.01,
        };
        let own = ChunkHit {
            chunk_id: Uuid::new_v4(),
            document_id: document.id,
            chunk_index: 3,
            text: "own".to_string(),
            distance: 0.2,
        };

        let retriever = Retriever::new(
            Arc::new(FixedIndex {
                hits: vec![foreign, own],
            }),
            store,
            media,
        );

        let retrieved = retriever
            .retrieve(team.id, &vec![0.5; EMBEDDING_DIMENSIONS])
            .await
            .unwrap();
        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].chunk_index, 3);
        assert_eq!(retrieved[0].document.id, document.id);
        assert_eq!(
            retrieved[0].document_link,
            r#"<a href="http://files.local/media/documents/runbook.pdf" target="_blank">Runbook.pdf</a>"#
        );
    }

    #[tokio::test]
    async fn results_are_capped_and_monotonic() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (_user, team, document) = team_with_document(&store).await;
        let (_dir, media) = media();
        let store_index: Arc<dyn ChunkIndex> = Arc::new(store.clone());

        for index in 0..6 {
            let mut embedding = vec![0.0f32; EMBEDDING_DIMENSIONS];
            embedding[0] = 1.0;
            embedding[1] = index as f32;
            store_index
                .insert_chunk(
                    team.id,
                    &DocumentChunk {
                        id: Uuid::new_v4(),
                        document_id: document.id,
                        chunk_index: index,
                        text: format!("chunk {index}"),
                        embedding,
                        created_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let retriever = Retriever::new(store_index, store, media);
        let mut query = vec![0.0f32; EMBEDDING_DIMENSIONS];
        query[0] = 1.0;

        let retrieved = retriever.retrieve(team.id, &query).await.unwrap();
        assert_eq!(retrieved.len(), RETRIEVAL_TOP_K);
        assert!(retrieved
            .windows(2)
            .all(|pair| pair[0].distance <= pair[1].distance));
        assert_eq!(retrieved[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn wrong_query_dimension_is_an_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (_dir, media) = media();
        let retriever = Retriever::new(Arc::new(store.clone()), store, media);

        assert!(matches!(
            retriever.retrieve(Uuid::new_v4(), &[1.0, 2.0]).await,
            Err(StoreError::DimensionMismatch { .. })
        ));
    }
}
