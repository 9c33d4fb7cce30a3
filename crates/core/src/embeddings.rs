use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{EmbeddingError, IngestError};
use reqwest::blocking::Client;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Output size of `paraphrase-multilingual-MiniLM-L12-v2`; the n-gram embedder
/// matches it so an index can switch backends without a dimension change.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const MULTILINGUAL_MODEL_NAME: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";

/// Maps text to fixed-length vectors. Implementations are shared across all
/// ingestion and query calls and must be cheap to call concurrently.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        vectors
            .pop()
            .ok_or(EmbeddingError::CountMismatch { expected: 1, actual: 0 })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        // Texts shorter than a trigram still hash as a single window.
        let width = chars.len().min(3);
        for window in chars.windows(width) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

/// Client for a text-embeddings-inference style `/embed` endpoint serving the
/// multilingual model.
#[derive(Debug)]
pub struct HttpEmbedder {
    endpoint: String,
    api_key: Option<String>,
    batch_size: usize,
    dimensions: usize,
    client: OnceLock<Client>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        batch_size: usize,
        dimensions: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            batch_size: batch_size.max(1),
            dimensions,
            client: OnceLock::new(),
        }
    }

    fn embed_one_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self
            .client
            .get_or_init(Client::new)
            .post(&self.endpoint)
            .json(&EmbedRequest {
                inputs,
                truncate: true,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let details = response.text().unwrap_or_default();
            return Err(EmbeddingError::BackendResponse {
                status: status.as_u16(),
                details,
            });
        }

        let vectors: Vec<Vec<f32>> = response.json()?;
        if vectors.len() != inputs.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: inputs.len(),
                actual: vectors.len(),
            });
        }
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != self.dimensions) {
            return Err(EmbeddingError::Model(format!(
                "endpoint returned {}-dimensional vectors, expected {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(vectors)
    }
}

impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.endpoint
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_one_batch(batch)?);
        }
        Ok(vectors)
    }
}

#[cfg(feature = "local-model")]
pub use local::FastEmbedder;

#[cfg(feature = "local-model")]
mod local {
    use super::{Embedder, DEFAULT_EMBEDDING_DIMENSIONS, MULTILINGUAL_MODEL_NAME};
    use crate::error::EmbeddingError;
    use anyhow::Context;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tracing::info;

    /// Multilingual sentence-transformer run in-process through ONNX runtime.
    ///
    /// The model is downloaded and constructed on the first embedding call and
    /// reused for the lifetime of this value.
    pub struct FastEmbedder {
        cache_dir: Option<PathBuf>,
        batch_size: usize,
        model: Mutex<Option<TextEmbedding>>,
    }

    impl FastEmbedder {
        pub fn new(cache_dir: Option<PathBuf>, batch_size: usize) -> Self {
            Self {
                cache_dir,
                batch_size: batch_size.max(1),
                model: Mutex::new(None),
            }
        }

        fn load(&self) -> anyhow::Result<TextEmbedding> {
            info!(model = MULTILINGUAL_MODEL_NAME, "loading embedding model");
            let mut options = InitOptions::new(EmbeddingModel::ParaphraseMLMiniLML12V2)
                .with_show_download_progress(false);
            if let Some(cache_dir) = &self.cache_dir {
                options = options.with_cache_dir(cache_dir.clone());
            }
            TextEmbedding::try_new(options).context("failed to initialize embedding model")
        }
    }

    impl Embedder for FastEmbedder {
        fn model_name(&self) -> &str {
            MULTILINGUAL_MODEL_NAME
        }

        fn dimensions(&self) -> usize {
            DEFAULT_EMBEDDING_DIMENSIONS
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut guard = self
                .model
                .lock()
                .map_err(|_| EmbeddingError::Model("embedding model lock poisoned".to_string()))?;
            if guard.is_none() {
                *guard = Some(self.load().map_err(|error| EmbeddingError::Model(format!("{error:#}")))?);
            }
            let Some(model) = guard.as_mut() else {
                return Err(EmbeddingError::Model("embedding model unavailable".to_string()));
            };
            model
                .embed(texts.to_vec(), Some(self.batch_size))
                .map_err(|error| EmbeddingError::Model(format!("{error:#}")))
        }
    }
}

/// Builds the process-wide embedder selected by configuration.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, IngestError> {
    let embedder: Arc<dyn Embedder> = match config.backend {
        EmbeddingBackend::Ngram => Arc::new(CharacterNgramEmbedder {
            dimensions: config.dimensions,
        }),
        EmbeddingBackend::Http => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                IngestError::InvalidArgument(
                    "http embedding backend requires an endpoint".to_string(),
                )
            })?;
            Arc::new(HttpEmbedder::new(
                endpoint,
                config.api_key.clone(),
                config.batch_size,
                config.dimensions,
            ))
        }
        #[cfg(feature = "local-model")]
        EmbeddingBackend::FastEmbed => Arc::new(FastEmbedder::new(
            config.cache_dir.clone(),
            config.batch_size,
        )),
        #[cfg(not(feature = "local-model"))]
        EmbeddingBackend::FastEmbed => {
            return Err(IngestError::InvalidArgument(
                "fastembed backend requires the `local-model` feature".to_string(),
            ))
        }
    };

    info!(
        model = embedder.model_name(),
        dimensions = embedder.dimensions(),
        "embedder ready"
    );
    Ok(embedder)
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;

    pub struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimensions(&self) -> usize {
            DEFAULT_EMBEDDING_DIMENSIONS
        }

        fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Model("model crashed".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").expect("embed");
        let second = embedder.embed("Hydraulic pressure and flow").expect("embed");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").expect("embed");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn short_and_multilingual_texts_get_nonzero_vectors() {
        let embedder = CharacterNgramEmbedder::default();
        for text in ["ab", "안녕", "펌프 압력"] {
            let vector = embedder.embed(text).expect("embed");
            assert!(vector.iter().any(|value| *value > 0.0), "{text} embedded to zero");
        }
    }

    #[test]
    fn batch_returns_one_vector_per_input() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["one".to_string(), "two".to_string(), String::new()];
        let vectors = embedder.embed_batch(&texts).expect("embed");
        assert_eq!(vectors.len(), 3);
        assert!(vectors[2].iter().all(|value| *value == 0.0));
    }

    #[test]
    fn http_embedder_sends_batches() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embed").body_contains("\"truncate\":true");
            then.status(200).json_body(json!([[1.0, 0.0], [0.0, 1.0]]));
        });

        let embedder = HttpEmbedder::new(server.url("/embed"), None, 2, 2);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let vectors = embedder.embed_batch(&texts).expect("embed");

        mock.assert_hits(2);
        assert_eq!(vectors.len(), 4);
        assert_eq!(vectors[3], vec![0.0, 1.0]);
    }

    #[test]
    fn http_embedder_rejects_wrong_dimensions() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(json!([[1.0, 0.0, 0.5]]));
        });

        let embedder = HttpEmbedder::new(server.url("/embed"), None, 8, 2);
        let result = embedder.embed("text");
        assert!(matches!(result, Err(EmbeddingError::Model(_))));
    }

    #[test]
    fn http_embedder_reports_backend_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embed");
            then.status(503).body("overloaded");
        });

        let embedder = HttpEmbedder::new(server.url("/embed"), None, 8, 2);
        match embedder.embed("text") {
            Err(EmbeddingError::BackendResponse { status, details }) => {
                assert_eq!(status, 503);
                assert_eq!(details, "overloaded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn http_backend_requires_an_endpoint() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Http,
            ..EmbeddingConfig::default()
        };
        assert!(build_embedder(&config).is_err());
        assert!(build_embedder(&EmbeddingConfig::default()).is_ok());
    }
}
