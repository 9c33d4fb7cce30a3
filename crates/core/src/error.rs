use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("{0}")]
    EmptyContent(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("Not a PDF file")]
    NotPdf(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl IngestError {
    /// Pipeline stage this error is attributed to, for logging.
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::Extraction(_) | IngestError::Io(_) => "load",
            IngestError::Ocr(_) | IngestError::EmptyContent(_) => "ocr",
            IngestError::InvalidChunkConfig(_) => "split",
            IngestError::Embedding(_) => "embed",
            IngestError::Store(_) => "replace_index",
            IngestError::MissingFileName(_)
            | IngestError::NotPdf(_)
            | IngestError::InvalidArgument(_)
            | IngestError::Task(_) => "start",
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model failed: {0}")]
    Model(String),

    #[error("embedding endpoint error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding endpoint returned {status}: {details}")]
    BackendResponse { status: u16, details: String },

    #[error("embedder returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("duplicate chunk id in upsert: {0}")]
    DuplicateId(String),

    #[error("store request failed: {0}")]
    Request(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
