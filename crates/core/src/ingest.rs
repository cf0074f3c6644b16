use crate::chunking::{split_segments, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::PdfExtractor;
use crate::media::MediaStore;
use crate::models::{Document, DocumentChunk, IngestionUnit, EMBEDDING_DIMENSIONS};
use crate::queue::TaskQueue;
use crate::traits::ChunkIndex;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Text,
}

impl ContentKind {
    /// Maps a MIME type to the ingestion path that handles it. Parameters
    /// such as `; charset=utf-8` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/pdf" => Some(ContentKind::Pdf),
            "text/plain" | "text/markdown" | "text/md" | "text/x-markdown" => {
                Some(ContentKind::Text)
            }
            _ => None,
        }
    }
}

pub fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if ContentKind::from_content_type(&guess_content_type(entry.path())).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Clone)]
pub struct IngestionPipeline {
    media: MediaStore,
    pdf: Arc<dyn PdfExtractor>,
    chunking: ChunkingConfig,
    queue: Arc<dyn TaskQueue>,
}

impl IngestionPipeline {
    pub fn new(
        media: MediaStore,
        pdf: Arc<dyn PdfExtractor>,
        chunking: ChunkingConfig,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            media,
            pdf,
            chunking,
            queue,
        }
    }

    /// Units for every non-empty page (PDF, 1-based page number) or segment
    /// (text, 1-based segment number). Unsupported types yield none.
    pub fn plan_units(&self, document: &Document) -> Result<Vec<IngestionUnit>, IngestError> {
        let content_type = document.content_type.as_deref().unwrap_or_default();
        let Some(kind) = ContentKind::from_content_type(content_type) else {
            warn!(
                document_id = %document.id,
                content_type,
                "unsupported content type; skipping ingestion"
            );
            return Ok(Vec::new());
        };

        let path = self.media.path_for(&document.file_path);
        let unit = |chunk_index: i64, text: String| IngestionUnit {
            team_id: document.team_id,
            document_id: document.id,
            chunk_index,
            text,
        };

        let units = match kind {
            ContentKind::Pdf => self
                .pdf
                .extract_pages(&path)?
                .into_iter()
                .filter(|page| !page.text.trim().is_empty())
                .map(|page| unit(page.number as i64, page.text.trim().to_string()))
                .collect(),
            ContentKind::Text => {
                let text = fs::read_to_string(&path)?;
                split_segments(&text, self.chunking)?
                    .into_iter()
                    .enumerate()
                    .map(|(position, segment)| unit(position as i64 + 1, segment))
                    .collect()
            }
        };

        Ok(units)
    }

    pub fn dispatch(&self, document: &Document) -> Result<usize, IngestError> {
        let units = self.plan_units(document)?;
        Ok(self.submit(document, units))
    }

    pub fn submit(&self, document: &Document, units: Vec<IngestionUnit>) -> usize {
        info!(document_id = %document.id, name = %document.name, "processing document");
        let count = units.len();

        for unit in units {
            self.queue.submit(unit);
        }

        if count == 0 {
            warn!(document_id = %document.id, "document produced no ingestion units");
        } else {
            info!(document_id = %document.id, units = count, "queued document for embedding");
        }
        count
    }
}

pub struct ChunkWorker {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn ChunkIndex>,
}

impl ChunkWorker {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn ChunkIndex>) -> Self {
        Self { embedder, index }
    }

    /// Returns the stored chunk, or `None` when the unit was dropped.
    pub async fn process(&self, unit: IngestionUnit) -> Option<DocumentChunk> {
        debug!(
            document_id = %unit.document_id,
            chunk_index = unit.chunk_index,
            "processing chunk"
        );

        let Some(embedding) = self.embedder.embed(&unit.text).await else {
            warn!(
                document_id = %unit.document_id,
                chunk_index = unit.chunk_index,
                "failed to get embedding; chunk dropped"
            );
            return None;
        };

        if embedding.len() != EMBEDDING_DIMENSIONS {
            warn!(
                document_id = %unit.document_id,
                chunk_index = unit.chunk_index,
                actual = embedding.len(),
                "embedding dimensionality mismatch; chunk dropped"
            );
            return None;
        }

        let chunk = DocumentChunk {
            id: Uuid::new_v4(),
            document_id: unit.document_id,
            chunk_index: unit.chunk_index,
            text: unit.text,
            embedding,
            created_at: Utc::now(),
        };

        if let Err(error) = self.index.insert_chunk(unit.team_id, &chunk).await {
            warn!(
                document_id = %chunk.document_id,
                chunk_index = chunk.chunk_index,
                %error,
                "failed to store chunk"
            );
            return None;
        }

        debug!(document_id = %chunk.document_id, chunk_index = chunk.chunk_index, "stored chunk");
        Some(chunk)
    }
}
