pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod locks;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod retriever;
pub mod service;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{split_pages, split_text, ChunkingConfig};
pub use config::{EmbeddingBackend, EmbeddingConfig, OcrConfig, PipelineConfig, QdrantConfig};
pub use embeddings::{
    build_embedder, CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IngestError, StoreError};
pub use extractor::{extract_page_texts, LopdfExtractor, PdfExtractor};
pub use ingest::{digest_file, discover_pdf_files, is_pdf, source_filename};
pub use models::{
    Chunk, ChunkMetadata, DeleteOutcome, IndexEntry, IndexStats, IngestionOptions, PageRecord,
    ProgressEvent, ScoredChunk, StoredChunk, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
    DEFAULT_TOP_K,
};
pub use ocr::{OcrFallback, PageRasterizer, TextRecognizer, OCR_TEXT_THRESHOLD};
pub use orchestrator::IngestCoordinator;
pub use retriever::Retriever;
pub use service::RagService;
pub use stores::{LocalStore, QdrantStore};
pub use traits::VectorIndex;
