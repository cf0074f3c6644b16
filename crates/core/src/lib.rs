pub mod accounts;
pub mod chunking;
pub mod citations;
pub mod completion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod library;
pub mod media;
pub mod models;
pub mod openai;
pub mod orchestrator;
pub mod prompt;
pub mod queue;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use accounts::Accounts;
pub use chunking::{normalize_whitespace, single_line, split_segments, ChunkingConfig};
pub use citations::{parse_answer, Citation, CitationParser, ParsedAnswer};
pub use completion::{generate_chat_title, CompletionModel, CompletionRequest};
pub use config::OpenAiConfig;
pub use embeddings::{Embedder, HashingEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{AccountError, ChatError, ClientError, IngestError, StoreError};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{
    digest_file, discover_documents, guess_content_type, ChunkWorker, ContentKind,
    IngestionPipeline,
};
pub use library::{DocumentLibrary, UploadReport};
pub use media::{MediaStore, StoredFile};
pub use models::{
    Chat, ChatConversation, ChatState, ChatTranscript, Document, DocumentChunk, DocumentSummary,
    IngestionUnit, RequestContext, RetrievedChunk, Sender, Team, TeamMember, TeamRole, User,
};
pub use openai::OpenAiClient;
pub use orchestrator::{ChatOrchestrator, ChatTurn};
pub use prompt::{estimated_confidence, first_answer_prompt, follow_up_prompt};
pub use queue::{TaskQueue, TokioTaskQueue};
pub use retrieval::{cosine_distance, Retriever};
pub use stores::{FirstTurn, QdrantStore, SqliteStore};
pub use traits::{ChunkHit, ChunkIndex};
