use crate::error::IngestError;
use crate::ingest::{guess_content_type, IngestionPipeline};
use crate::media::MediaStore;
use crate::models::{Document, DocumentSummary, RequestContext};
use crate::stores::SqliteStore;
use crate::traits::ChunkIndex;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub document: Document,
    /// Units handed to the task queue; chunks appear once they are embedded.
    pub queued_units: usize,
}

#[derive(Clone)]
pub struct DocumentLibrary {
    store: SqliteStore,
    media: MediaStore,
    pipeline: IngestionPipeline,
    index: Arc<dyn ChunkIndex>,
}

impl DocumentLibrary {
    pub fn new(
        store: SqliteStore,
        media: MediaStore,
        pipeline: IngestionPipeline,
        index: Arc<dyn ChunkIndex>,
    ) -> Self {
        Self {
            store,
            media,
            pipeline,
            index,
        }
    }

    pub async fn upload(
        &self,
        ctx: &RequestContext,
        path: &Path,
        content_type: Option<&str>,
    ) -> Result<UploadReport, IngestError> {
        self.ensure_member(ctx).await?;
        if !path.is_file() {
            return Err(IngestError::InvalidArgument(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let content_type = content_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(path));

        let stored = self.media.save(path)?;
        let document = Document {
            id: Uuid::new_v4(),
            team_id: ctx.team_id,
            name: stored.name.clone(),
            file_path: stored.relative_path.clone(),
            size: Some(stored.size),
            content_type: Some(content_type),
            metadata: Some(json!({
                "sha256": stored.sha256,
                "original_name": stored.name,
            })),
            created_at: Utc::now(),
        };

        let units = match self.pipeline.plan_units(&document) {
            Ok(units) => units,
            Err(error) => {
                self.discard_upload(&stored.relative_path);
                return Err(error);
            }
        };
        if let Err(error) = self.store.insert_document(&document).await {
            self.discard_upload(&stored.relative_path);
            return Err(error.into());
        }
        info!(
            document_id = %document.id,
            team_id = %ctx.team_id,
            name = %document.name,
            size = stored.size,
            "stored document"
        );

        let queued_units = self.pipeline.submit(&document, units);
        Ok(UploadReport {
            document,
            queued_units,
        })
    }

    pub async fn documents(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<DocumentSummary>, IngestError> {
        self.ensure_member(ctx).await?;
        Ok(self.store.list_documents(ctx.team_id).await?)
    }

    /// Replaces the document's metadata; `None` clears it.
    pub async fn set_metadata(
        &self,
        ctx: &RequestContext,
        document_id: Uuid,
        metadata: Option<Value>,
    ) -> Result<(), IngestError> {
        self.ensure_member(ctx).await?;
        if let Some(value) = &metadata {
            if !value.is_object() {
                return Err(IngestError::InvalidArgument(
                    "document metadata must be a JSON object".to_string(),
                ));
            }
        }

        if !self
            .store
            .set_document_metadata(ctx.team_id, document_id, metadata.as_ref())
            .await?
        {
            return Err(IngestError::DocumentNotFound(document_id));
        }
        Ok(())
    }

    pub async fn delete(
        &self,
        ctx: &RequestContext,
        document_id: Uuid,
    ) -> Result<Document, IngestError> {
        self.ensure_member(ctx).await?;
        let document = self
            .store
            .document(ctx.team_id, document_id)
            .await?
            .ok_or(IngestError::DocumentNotFound(document_id))?;

        self.index.delete_document_chunks(document.id).await?;
        if !self.store.delete_document(ctx.team_id, document.id).await? {
            return Err(IngestError::DocumentNotFound(document_id));
        }
        self.media.remove(&document.file_path)?;

        info!(document_id = %document.id, team_id = %ctx.team_id, "deleted document");
        Ok(document)
    }

    fn discard_upload(&self, relative_path: &str) {
        if let Err(error) = self.media.remove(relative_path) {
            warn!(file_path = %relative_path, %error, "failed to remove orphaned upload");
        }
    }

    async fn ensure_member(&self, ctx: &RequestContext) -> Result<(), IngestError> {
        match self.store.team_for_member(ctx.team_id, ctx.user_id).await? {
            Some(_) => Ok(()),
            None => Err(IngestError::TeamNotFound(ctx.team_id)),
        }
    }
}
