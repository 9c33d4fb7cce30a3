use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::IngestError;

pub const DEFAULT_INDEX_DIR: &str = "./pdf_rag_index";
pub const DEFAULT_OCR_LANGUAGES: &str = "kor+eng";
pub const DEFAULT_OCR_DPI: u32 = 200;
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OcrConfig {
    pub languages: String,
    pub dpi: u32,
    pub pdftoppm_bin: String,
    pub tesseract_bin: String,
    /// When set, page images are recognized by this endpoint instead of tesseract.
    pub endpoint: Option<OcrEndpointConfig>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: DEFAULT_OCR_LANGUAGES.to_string(),
            dpi: DEFAULT_OCR_DPI,
            pdftoppm_bin: "pdftoppm".to_string(),
            tesseract_bin: "tesseract".to_string(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Ngram,
    Http,
    FastEmbed,
}

impl FromStr for EmbeddingBackend {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ngram" => Ok(Self::Ngram),
            "http" => Ok(Self::Http),
            "fastembed" | "local" => Ok(Self::FastEmbed),
            other => Err(IngestError::InvalidArgument(format!(
                "unknown embedding backend: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub batch_size: usize,
    /// Vector length for the n-gram backend; model backends report their own.
    pub dimensions: usize,
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ngram,
            endpoint: None,
            api_key: None,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    pub index_dir: PathBuf,
    pub ocr: OcrConfig,
    pub embedding: EmbeddingConfig,
    /// Use a Qdrant collection instead of the local index directory.
    pub qdrant: Option<QdrantConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            ocr: OcrConfig::default(),
            embedding: EmbeddingConfig::default(),
            qdrant: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `PDF_RAG_*` environment variables.
    pub fn from_env() -> Result<Self, IngestError> {
        Self::default().with_lookup(|name| std::env::var(name).ok())
    }

    fn with_lookup<F>(mut self, lookup: F) -> Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| {
            lookup(name).and_then(|raw| {
                let trimmed = raw.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            })
        };

        if let Some(dir) = value("PDF_RAG_INDEX_DIR") {
            self.index_dir = PathBuf::from(dir);
        }
        if let Some(languages) = value("PDF_RAG_OCR_LANGUAGES") {
            self.ocr.languages = languages;
        }
        if let Some(dpi) = value("PDF_RAG_OCR_DPI") {
            self.ocr.dpi = parse_number("PDF_RAG_OCR_DPI", &dpi)?;
        }
        if let Some(bin) = value("PDF_RAG_PDFTOPPM_BIN") {
            self.ocr.pdftoppm_bin = bin;
        }
        if let Some(bin) = value("PDF_RAG_TESSERACT_BIN") {
            self.ocr.tesseract_bin = bin;
        }
        if let Some(endpoint) = value("PDF_RAG_OCR_ENDPOINT") {
            self.ocr.endpoint = Some(OcrEndpointConfig {
                endpoint,
                api_key: value("PDF_RAG_OCR_API_KEY"),
            });
        }
        if let Some(backend) = value("PDF_RAG_EMBEDDING_BACKEND") {
            self.embedding.backend = backend.parse()?;
        }
        if let Some(endpoint) = value("PDF_RAG_EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = Some(endpoint);
        }
        if let Some(api_key) = value("PDF_RAG_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(api_key);
        }
        if let Some(batch) = value("PDF_RAG_EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = parse_number("PDF_RAG_EMBEDDING_BATCH_SIZE", &batch)?;
        }
        if let Some(dimensions) = value("PDF_RAG_EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions =
                parse_number("PDF_RAG_EMBEDDING_DIMENSIONS", &dimensions)?;
        }
        if let Some(cache_dir) = value("PDF_RAG_MODEL_CACHE_DIR") {
            self.embedding.cache_dir = Some(PathBuf::from(cache_dir));
        }
        if let Some(url) = value("PDF_RAG_QDRANT_URL") {
            self.qdrant = Some(QdrantConfig {
                url,
                collection: value("PDF_RAG_QDRANT_COLLECTION")
                    .unwrap_or_else(|| "pdf_chunks".to_string()),
            });
        }

        Ok(self)
    }
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> Result<T, IngestError> {
    raw.parse()
        .map_err(|_| IngestError::InvalidArgument(format!("{name} is not a number: {raw}")))
}
